//! Resource leveling: shift task starts until no resource is over-booked.
//!
//! Conflict-graph coloring decides who gets contended resources first;
//! placement then advances each task to the earliest date where its whole
//! duration fits, booking allocations as it goes. The pass iterates to a
//! fixed point of start dates because shifted dates can dissolve conflicts
//! that the first coloring assumed.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use thiserror::Error;

use crate::calendar::{next_day, Calendar};
use crate::config::SchedulerConfig;
use crate::graph::ancestors;
use crate::models::Task;
use crate::resource::{AllocationError, ResourceRegistry};
use crate::{log_checks, log_debug, EPS};

/// Errors raised by the leveler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LevelingError {
    #[error("Resource leveling did not reach a fixed point within the iteration bound")]
    DidNotConverge,
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Result of a converged leveling pass. Start/end dates and colors are
/// written onto the tasks; drivers record, per task, the task whose finish
/// determined its start (dependency or resource holder).
#[derive(Debug, Default)]
pub struct LevelingOutcome {
    pub drivers: FxHashMap<String, Option<String>>,
    pub iterations: usize,
}

/// Level the schedule. `critical_path` holds the zero-slack task set used
/// for priority; `min_starts` carries externally imposed lower bounds on
/// start dates (buffer placement uses these).
#[allow(clippy::too_many_arguments)]
pub fn level_schedule(
    tasks: &mut FxHashMap<String, Task>,
    topo: &[String],
    registry: &mut ResourceRegistry,
    calendar: &Calendar,
    project_start: NaiveDate,
    critical_path: &FxHashSet<String>,
    min_starts: &FxHashMap<String, NaiveDate>,
    config: &SchedulerConfig,
) -> Result<LevelingOutcome, LevelingError> {
    let anc = ancestors(tasks, topo);
    let verbosity = config.verbosity;

    let mut prev: Option<FxHashMap<String, (NaiveDate, NaiveDate)>> = None;

    for iteration in 1..=config.leveling_max_iterations {
        registry.clear_allocations();

        let conflicts = build_conflict_graph(tasks, topo, &anc, prev.as_ref());
        let colors = color_conflict_graph(tasks, topo, &conflicts, critical_path);

        log_debug!(
            verbosity,
            "Leveling iteration {}: {} conflict edges",
            iteration,
            conflicts.values().map(Vec::len).sum::<usize>() / 2
        );

        let (scheduled, drivers) = place_tasks(
            tasks,
            topo,
            &colors,
            registry,
            calendar,
            project_start,
            min_starts,
            config,
        )?;

        let converged = prev.as_ref() == Some(&scheduled);
        if converged {
            for (id, &(start, end)) in &scheduled {
                if let Some(task) = tasks.get_mut(id) {
                    task.start_date = Some(start);
                    task.end_date = Some(end);
                    task.color = colors.get(id).copied().unwrap_or(0);
                }
            }
            return Ok(LevelingOutcome {
                drivers,
                iterations: iteration,
            });
        }
        prev = Some(scheduled);
    }

    Err(LevelingError::DidNotConverge)
}

/// Conflict edges: tasks that share a resource and are not already ordered
/// by dependencies. Once dates exist, only pairs that actually overlap in
/// time keep their edge.
fn build_conflict_graph(
    tasks: &FxHashMap<String, Task>,
    topo: &[String],
    anc: &FxHashMap<String, FxHashSet<String>>,
    intervals: Option<&FxHashMap<String, (NaiveDate, NaiveDate)>>,
) -> FxHashMap<String, Vec<String>> {
    let mut edges: FxHashMap<String, Vec<String>> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());

    for (i, a_id) in topo.iter().enumerate() {
        let a = &tasks[a_id];
        for b_id in topo.iter().skip(i + 1) {
            let b = &tasks[b_id];

            if !shares_resource(a, b) {
                continue;
            }
            if anc[a_id].contains(b_id) || anc[b_id].contains(a_id) {
                continue;
            }
            if let Some(map) = intervals {
                let (Some(&ia), Some(&ib)) = (map.get(a_id), map.get(b_id)) else {
                    continue;
                };
                if !overlaps(ia, ib) {
                    continue;
                }
            }

            edges.entry(a_id.clone()).or_default().push(b_id.clone());
            edges.entry(b_id.clone()).or_default().push(a_id.clone());
        }
    }
    edges
}

fn shares_resource(a: &Task, b: &Task) -> bool {
    a.resources
        .iter()
        .any(|ra| b.resources.iter().any(|rb| ra.name == rb.name))
}

fn overlaps(a: (NaiveDate, NaiveDate), b: (NaiveDate, NaiveDate)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Greedy coloring. Priority order: critical-path tasks first, then earlier
/// early start, then shorter aggressive duration, ties by id, so the
/// critical path takes color zero.
fn color_conflict_graph(
    tasks: &FxHashMap<String, Task>,
    topo: &[String],
    conflicts: &FxHashMap<String, Vec<String>>,
    critical_path: &FxHashSet<String>,
) -> FxHashMap<String, u32> {
    let mut order: Vec<&String> = topo.iter().collect();
    order.sort_by(|a, b| {
        let ta = &tasks[*a];
        let tb = &tasks[*b];
        critical_path
            .contains(*b)
            .cmp(&critical_path.contains(*a))
            .then(cmp_f64(ta.early_start, tb.early_start))
            .then(cmp_f64(ta.aggressive_duration, tb.aggressive_duration))
            .then(a.cmp(b))
    });

    let mut colors: FxHashMap<String, u32> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    for id in order {
        let used: FxHashSet<u32> = conflicts
            .get(id)
            .map(|neighbors| {
                neighbors
                    .iter()
                    .filter_map(|n| colors.get(n).copied())
                    .collect()
            })
            .unwrap_or_default();
        let mut color = 0u32;
        while used.contains(&color) {
            color += 1;
        }
        colors.insert(id.clone(), color);
    }
    colors
}

type ScheduledMap = FxHashMap<String, (NaiveDate, NaiveDate)>;
type DriverMap = FxHashMap<String, Option<String>>;

/// Place every task: dependency order, lowest (color, early start, id)
/// first among ready tasks, each advanced to the first date where all of
/// its resource demands fit for the whole duration.
#[allow(clippy::too_many_arguments)]
fn place_tasks(
    tasks: &FxHashMap<String, Task>,
    topo: &[String],
    colors: &FxHashMap<String, u32>,
    registry: &mut ResourceRegistry,
    calendar: &Calendar,
    project_start: NaiveDate,
    min_starts: &FxHashMap<String, NaiveDate>,
    config: &SchedulerConfig,
) -> Result<(ScheduledMap, DriverMap), LevelingError> {
    let mut scheduled: ScheduledMap =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    let mut drivers: DriverMap =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    let mut pending: Vec<&String> = topo.iter().collect();

    while !pending.is_empty() {
        let mut best: Option<usize> = None;
        for (idx, id) in pending.iter().enumerate() {
            let task = &tasks[*id];
            let ready = task
                .dependencies
                .iter()
                .all(|dep| !tasks.contains_key(dep) || scheduled.contains_key(dep));
            if !ready {
                continue;
            }
            let better = match best {
                None => true,
                Some(best_idx) => {
                    let current = &tasks[pending[best_idx]];
                    colors[*id]
                        .cmp(&colors[pending[best_idx]])
                        .then(cmp_f64(task.early_start, current.early_start))
                        .then(id.as_str().cmp(pending[best_idx].as_str()))
                        == Ordering::Less
                }
            };
            if better {
                best = Some(idx);
            }
        }

        // Topo order guarantees at least one ready task.
        let idx = best.expect("no ready task in acyclic placement");
        let id = pending.remove(idx);
        let task = &tasks[id];

        let (start, end, driver) = place_one(
            task,
            &scheduled,
            registry,
            calendar,
            project_start,
            min_starts.get(id).copied(),
            config,
        )?;

        log_checks!(
            config.verbosity,
            "  Placed {} from {} to {} (color {})",
            id,
            start,
            end,
            colors[id]
        );

        scheduled.insert(id.clone(), (start, end));
        drivers.insert(id.clone(), driver);
    }

    Ok((scheduled, drivers))
}

/// Place a single task and book its allocations. Returns (start, end,
/// driver).
fn place_one(
    task: &Task,
    scheduled: &ScheduledMap,
    registry: &mut ResourceRegistry,
    calendar: &Calendar,
    project_start: NaiveDate,
    min_start: Option<NaiveDate>,
    config: &SchedulerConfig,
) -> Result<(NaiveDate, NaiveDate, Option<String>), LevelingError> {
    let mut candidate = project_start;
    for dep in &task.dependencies {
        if let Some(&(_, dep_end)) = scheduled.get(dep) {
            if dep_end > candidate {
                candidate = dep_end;
            }
        }
    }
    if let Some(min) = min_start {
        if min > candidate {
            candidate = min;
        }
    }
    candidate = calendar.next_working_day(candidate);

    // Task whose allocation blocked the final advance, if any.
    let mut last_block: Option<(String, NaiveDate)> = None;

    let (start, end) = 'search: loop {
        if (candidate - project_start).num_days() > config.horizon_days {
            let (resource, day, requested, available) = first_shortfall(task, candidate, registry);
            return Err(AllocationError::Overallocation {
                resource,
                day,
                requested,
                available,
            }
            .into());
        }

        if task.planned_duration <= EPS {
            break (candidate, candidate);
        }

        let end = calendar.add_workdays(candidate, task.planned_duration);
        let days: Vec<NaiveDate> = working_days(calendar, candidate, end);

        for &day in &days {
            for demand in &task.resources {
                let resource = registry.get(&demand.name)?;
                if resource.allow_overallocation {
                    continue;
                }
                if demand.units > resource.available_units(day) + EPS {
                    last_block = blocking_allocation(resource.allocations_on(day), scheduled)
                        .or(last_block);
                    candidate = calendar.next_working_day(next_day(day));
                    continue 'search;
                }
            }
        }

        // Book every demand; unwind this task entirely if a span fails.
        let mut booked: Vec<&str> = Vec::new();
        let mut failed = false;
        for demand in &task.resources {
            match registry.allocate_span(&demand.name, &task.id, &days, demand.units) {
                Ok(()) => booked.push(&demand.name),
                Err(_) => {
                    for name in &booked {
                        for &day in &days {
                            registry.deallocate(name, day, &task.id);
                        }
                    }
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            candidate = calendar.next_working_day(next_day(candidate));
            continue 'search;
        }

        break (candidate, end);
    };

    // The driver is whichever finish the start landed on: a dependency end
    // or the blocking holder's end. Ties go to the lower id.
    let mut driver: Option<&str> = None;
    for dep in &task.dependencies {
        if let Some(&(_, dep_end)) = scheduled.get(dep) {
            if dep_end == start && driver.map_or(true, |d| dep.as_str() < d) {
                driver = Some(dep.as_str());
            }
        }
    }
    if let Some((ref block_id, block_end)) = last_block {
        if block_end == start && driver.map_or(true, |d| block_id.as_str() < d) {
            driver = Some(block_id.as_str());
        }
    }

    Ok((start, end, driver.map(str::to_string)))
}

fn working_days(calendar: &Calendar, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day < end {
        if calendar.is_working_day(day) {
            days.push(day);
        }
        day = next_day(day);
    }
    days
}

/// Among the allocations holding a day, the one finishing last (ties by
/// lower task id) is the one the search will wait for.
fn blocking_allocation(
    allocations: &[crate::resource::Allocation],
    scheduled: &ScheduledMap,
) -> Option<(String, NaiveDate)> {
    let mut best: Option<(String, NaiveDate)> = None;
    for alloc in allocations {
        let Some(&(_, end)) = scheduled.get(&alloc.task_id) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((best_id, best_end)) => {
                end > *best_end || (end == *best_end && alloc.task_id < *best_id)
            }
        };
        if better {
            best = Some((alloc.task_id.clone(), end));
        }
    }
    best
}

fn first_shortfall(
    task: &Task,
    day: NaiveDate,
    registry: &ResourceRegistry,
) -> (String, NaiveDate, f64, f64) {
    for demand in &task.resources {
        if let Ok(resource) = registry.get(&demand.name) {
            let available = resource.available_units(day);
            if demand.units > available + EPS {
                return (demand.name.clone(), day, demand.units, available.max(0.0));
            }
        }
    }
    let name = task
        .resources
        .first()
        .map(|d| d.name.clone())
        .unwrap_or_default();
    let units = task.resources.first().map(|d| d.units).unwrap_or(0.0);
    (name, day, units, 0.0)
}
