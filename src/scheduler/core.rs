//! Schedule construction: owns the task and resource registries, composes
//! the planning phases and produces the immutable baseline.

use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::buffer_strategy::{duration_pairs, BufferStrategy};
use crate::calendar::Calendar;
use crate::chains::{identify_critical_chain, identify_feeding_chains};
use crate::config::SchedulerConfig;
use crate::graph::{sorted_ids, topo_order, GraphError};
use crate::leveling::{level_schedule, LevelingError};
use crate::models::{Buffer, BufferKind, Chain, Task, TaskStateError};
use crate::passes::{apply_timings, backward_pass, forward_pass};
use crate::resource::{AllocationError, Resource, ResourceRegistry};
use crate::{log_changes, log_debug, EPS};

use super::execution::ChainStatusRecord;

/// Errors surfaced by scheduler operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Invalid task: {0}")]
    InvalidTask(String),
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
    #[error(
        "Cannot allocate {requested} units of {resource} on {day}: only {available} available"
    )]
    ResourceOverallocation {
        resource: String,
        day: NaiveDate,
        requested: f64,
        available: f64,
    },
    #[error("Resource leveling did not reach a fixed point within the iteration bound")]
    LevelingDidNotConverge,
    #[error("Schedule has already been built")]
    ScheduleAlreadyBuilt,
    #[error("Task {0} is already completed")]
    TaskAlreadyCompleted(String),
    #[error("Unknown task id: {0}")]
    UnknownTaskId(String),
    #[error("Unknown resource name: {0}")]
    UnknownResourceName(String),
}

impl From<GraphError> for ScheduleError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected { path } => ScheduleError::CycleDetected { path },
        }
    }
}

impl From<AllocationError> for ScheduleError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Overallocation {
                resource,
                day,
                requested,
                available,
            } => ScheduleError::ResourceOverallocation {
                resource,
                day,
                requested,
                available,
            },
            AllocationError::UnknownResource(name) => ScheduleError::UnknownResourceName(name),
        }
    }
}

impl From<LevelingError> for ScheduleError {
    fn from(err: LevelingError) -> Self {
        match err {
            LevelingError::DidNotConverge => ScheduleError::LevelingDidNotConverge,
            LevelingError::Allocation(inner) => inner.into(),
        }
    }
}

impl From<TaskStateError> for ScheduleError {
    fn from(err: TaskStateError) -> Self {
        match err {
            TaskStateError::AlreadyCompleted(id) => ScheduleError::TaskAlreadyCompleted(id),
            TaskStateError::NegativeRemaining(value) => {
                ScheduleError::InvalidTask(format!("negative remaining duration {value}"))
            }
        }
    }
}

/// Snapshot returned by `schedule()`: the baseline the external renderers
/// and reports read.
#[derive(Clone, Debug)]
pub struct Schedule {
    /// Tasks with assigned dates, ascending id.
    pub tasks: Vec<Task>,
    /// The critical chain first, then feeding chains in discovery order.
    pub chains: Vec<Chain>,
    /// Project and feeding buffers, ascending id.
    pub buffers: Vec<Buffer>,
    /// End of the project buffer.
    pub project_end: NaiveDate,
}

/// CCPM scheduler. Exclusively owns its task registry, resource registry and
/// buffer list; single-threaded and non-reentrant.
pub struct Scheduler {
    pub(crate) start_date: NaiveDate,
    pub(crate) calendar: Calendar,
    pub(crate) strategy: BufferStrategy,
    pub(crate) config: SchedulerConfig,

    pub(crate) tasks: FxHashMap<String, Task>,
    pub(crate) registry: ResourceRegistry,
    pub(crate) chains: Vec<Chain>,
    pub(crate) buffers: BTreeMap<String, Buffer>,

    pub(crate) built: bool,
    pub(crate) topo: Vec<String>,
    pub(crate) baseline_chain_end: Option<NaiveDate>,
    pub(crate) project_end: Option<NaiveDate>,
    pub(crate) chain_status: FxHashMap<String, Vec<ChainStatusRecord>>,
    pub(crate) last_status_date: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(start_date: NaiveDate, strategy: BufferStrategy) -> Self {
        Self::with_config(start_date, strategy, SchedulerConfig::default())
    }

    pub fn with_config(
        start_date: NaiveDate,
        strategy: BufferStrategy,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            start_date,
            calendar: Calendar::full_time(),
            strategy,
            config,
            tasks: FxHashMap::default(),
            registry: ResourceRegistry::new(),
            chains: Vec::new(),
            buffers: BTreeMap::new(),
            built: false,
            topo: Vec::new(),
            baseline_chain_end: None,
            project_end: None,
            chain_status: FxHashMap::default(),
            last_status_date: None,
        }
    }

    fn ensure_planning(&self) -> Result<(), ScheduleError> {
        if self.built {
            return Err(ScheduleError::ScheduleAlreadyBuilt);
        }
        Ok(())
    }

    pub fn set_start_date(&mut self, start_date: NaiveDate) -> Result<(), ScheduleError> {
        self.ensure_planning()?;
        self.start_date = start_date;
        Ok(())
    }

    pub fn set_calendar(&mut self, calendar: Calendar) -> Result<(), ScheduleError> {
        self.ensure_planning()?;
        self.calendar = calendar;
        Ok(())
    }

    /// Register the project's resources, replacing any previous set.
    pub fn set_resources(&mut self, resources: Vec<Resource>) -> Result<(), ScheduleError> {
        self.ensure_planning()?;
        self.registry = ResourceRegistry::new();
        for resource in resources {
            self.registry.register(resource);
        }
        Ok(())
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<(), ScheduleError> {
        self.ensure_planning()?;
        self.registry.register(resource);
        Ok(())
    }

    /// Planning-phase task insertion with field validation. Referential
    /// checks (dependencies, resource names) run at `schedule()` so tasks
    /// may arrive in any order.
    pub fn add_task(&mut self, task: Task) -> Result<(), ScheduleError> {
        self.ensure_planning()?;
        if task.id.is_empty() {
            return Err(ScheduleError::InvalidTask("empty task id".to_string()));
        }
        if self.tasks.contains_key(&task.id) {
            return Err(ScheduleError::InvalidTask(format!(
                "duplicate task id {}",
                task.id
            )));
        }
        if task.aggressive_duration < 0.0 {
            return Err(ScheduleError::InvalidTask(format!(
                "task {} has negative duration",
                task.id
            )));
        }
        if task.safe_duration < task.aggressive_duration - EPS {
            return Err(ScheduleError::InvalidTask(format!(
                "task {} has safe duration below aggressive",
                task.id
            )));
        }
        for demand in &task.resources {
            if demand.name.is_empty() {
                return Err(ScheduleError::InvalidTask(format!(
                    "task {} has an unnamed resource demand",
                    task.id
                )));
            }
            if demand.units <= 0.0 {
                return Err(ScheduleError::InvalidTask(format!(
                    "task {} requests {} units of {}",
                    task.id, demand.units, demand.name
                )));
            }
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn task(&self, id: &str) -> Result<&Task, ScheduleError> {
        self.tasks
            .get(id)
            .ok_or_else(|| ScheduleError::UnknownTaskId(id.to_string()))
    }

    /// Tasks in ascending id order.
    pub fn tasks(&self) -> Vec<&Task> {
        sorted_ids(&self.tasks)
            .iter()
            .map(|id| &self.tasks[id])
            .collect()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.values()
    }

    pub fn buffer(&self, id: &str) -> Option<&Buffer> {
        self.buffers.get(id)
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn project_end(&self) -> Option<NaiveDate> {
        self.project_end
    }

    fn validate_references(&self) -> Result<(), ScheduleError> {
        for id in sorted_ids(&self.tasks) {
            let task = &self.tasks[&id];
            for dep in &task.dependencies {
                if !self.tasks.contains_key(dep) {
                    return Err(ScheduleError::InvalidTask(format!(
                        "task {id} depends on unknown task {dep}"
                    )));
                }
            }
            for demand in &task.resources {
                if !self.registry.contains(&demand.name) {
                    return Err(ScheduleError::InvalidTask(format!(
                        "task {id} requires unregistered resource {}",
                        demand.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the baseline: topo order, forward/backward pass, leveling,
    /// chain identification, buffer sizing and placement. Atomic: all phases
    /// run on working copies committed only on success.
    pub fn schedule(&mut self) -> Result<Schedule, ScheduleError> {
        self.ensure_planning()?;
        if self.tasks.is_empty() {
            return Err(ScheduleError::InvalidTask(
                "project has no tasks".to_string(),
            ));
        }
        self.validate_references()?;

        let mut tasks = self.tasks.clone();
        let mut registry = self.registry.clone();

        let topo = topo_order(&tasks)?;
        let mut timings = forward_pass(&tasks, &topo);
        backward_pass(&tasks, &topo, &mut timings);
        apply_timings(&mut tasks, &timings);

        let critical_path: FxHashSet<String> = timings
            .iter()
            .filter(|(_, timing)| timing.is_critical())
            .map(|(id, _)| id.clone())
            .collect();

        // Leveling and chain identification rerun when a feeding buffer does
        // not fit its gap: the merge task gains a minimum start and the
        // schedule is rebuilt around it.
        let mut min_starts: FxHashMap<String, NaiveDate> = FxHashMap::default();
        // Merge tasks pushed right to make room for a feeding buffer are
        // driven by the feeding chain's last task, not a dependency finish.
        let mut pushed_by: FxHashMap<String, String> = FxHashMap::default();
        let mut rounds = 0usize;
        let (critical_chain, feeding_chains) = loop {
            rounds += 1;
            if rounds > self.config.leveling_max_iterations {
                return Err(ScheduleError::LevelingDidNotConverge);
            }
            for task in tasks.values_mut() {
                task.is_critical = false;
                task.chain_id = None;
            }

            let mut outcome = level_schedule(
                &mut tasks,
                &topo,
                &mut registry,
                &self.calendar,
                self.start_date,
                &critical_path,
                &min_starts,
                &self.config,
            )?;
            for (merge_id, feeder_id) in &pushed_by {
                if let Some(driver) = outcome.drivers.get_mut(merge_id) {
                    if driver.is_none() {
                        *driver = Some(feeder_id.clone());
                    }
                }
            }
            let critical_chain = identify_critical_chain(&mut tasks, &outcome.drivers);
            let feeding_chains = identify_feeding_chains(
                &mut tasks,
                &critical_chain,
                self.config.feeding_buffer_ratio,
            );

            let mut pushed = false;
            for chain in &feeding_chains {
                let size = self.feeding_buffer_size(&tasks, chain);
                if size <= EPS {
                    continue;
                }
                let merge_id = chain.merges_into.as_deref().unwrap_or_default();
                let merge_start = tasks[merge_id].start_date.unwrap_or(self.start_date);
                let buffer_start = self.calendar.sub_workdays(merge_start, size);
                let chain_end = tasks[chain.last_task()].end_date.unwrap_or(self.start_date);
                if chain_end > buffer_start {
                    let needed = self.calendar.add_workdays(chain_end, size);
                    let grows = min_starts.get(merge_id).map_or(true, |&d| d < needed);
                    if grows {
                        log_debug!(
                            self.config.verbosity,
                            "Feeding buffer of {} does not fit; pushing {} to {}",
                            chain.id,
                            merge_id,
                            needed
                        );
                        min_starts.insert(merge_id.to_string(), needed);
                        pushed_by.insert(merge_id.to_string(), chain.last_task().to_string());
                        pushed = true;
                    }
                }
            }

            if !pushed {
                break (critical_chain, feeding_chains);
            }
        };

        log_changes!(
            self.config.verbosity,
            "Critical chain: {}",
            critical_chain.tasks.join(" -> ")
        );

        // Buffers: project buffer after the last critical task, feeding
        // buffers as late as possible before their merge tasks.
        let mut buffers: BTreeMap<String, Buffer> = BTreeMap::new();
        let mut chains: Vec<Chain> = Vec::new();

        let mut critical_chain = critical_chain;
        let pb_size = self
            .strategy
            .project_buffer(&chain_pairs(&tasks, &critical_chain));
        let last_critical = critical_chain.last_task().to_string();
        let chain_end = tasks[&last_critical]
            .end_date
            .unwrap_or(self.start_date);
        let mut project_buffer = Buffer::new(
            "PB",
            BufferKind::Project,
            pb_size,
            last_critical,
            critical_chain.id.clone(),
        );
        project_buffer.start_date = Some(chain_end);
        project_buffer.end_date = Some(self.calendar.add_workdays(chain_end, pb_size));
        let project_end = project_buffer.end_date.unwrap_or(chain_end);
        critical_chain.buffer = Some(project_buffer.id.clone());
        log_changes!(
            self.config.verbosity,
            "Project buffer: {} days ending {}",
            pb_size,
            project_end
        );
        buffers.insert(project_buffer.id.clone(), project_buffer);
        chains.push(critical_chain);

        for mut chain in feeding_chains {
            let size = self.feeding_buffer_size(&tasks, &chain);
            let merge_id = chain.merges_into.clone().unwrap_or_default();
            let merge_start = tasks[&merge_id].start_date.unwrap_or(self.start_date);
            let buffer_id = format!("FB_{}", chain.id);
            let mut buffer = Buffer::new(
                &buffer_id,
                BufferKind::Feeding,
                size,
                merge_id,
                chain.id.clone(),
            );
            buffer.end_date = Some(merge_start);
            buffer.start_date = Some(self.calendar.sub_workdays(merge_start, size));
            chain.buffer = Some(buffer_id.clone());
            buffers.insert(buffer_id, buffer);
            chains.push(chain);
        }

        // Final allocations stand; record the flow of work per resource.
        for id in sorted_ids(&tasks) {
            let task = &tasks[&id];
            let (Some(start), Some(end)) = (task.start_date, task.end_date) else {
                continue;
            };
            for demand in &task.resources {
                if let Ok(resource) = registry.get_mut(&demand.name) {
                    resource.record_arrival(&id, start);
                    resource.record_departure(&id, end);
                }
            }
        }

        // Commit.
        self.tasks = tasks;
        self.registry = registry;
        self.chains = chains;
        self.buffers = buffers;
        self.topo = topo;
        self.built = true;
        self.baseline_chain_end = Some(chain_end);
        self.project_end = Some(project_end);
        self.record_chain_status(self.start_date);

        Ok(self.snapshot())
    }

    pub(crate) fn feeding_buffer_size(
        &self,
        tasks: &FxHashMap<String, Task>,
        chain: &Chain,
    ) -> f64 {
        self.strategy
            .feeding_buffer(&chain_pairs(tasks, chain), chain.buffer_ratio)
    }

    fn snapshot(&self) -> Schedule {
        Schedule {
            tasks: self.tasks().into_iter().cloned().collect(),
            chains: self.chains.clone(),
            buffers: self.buffers.values().cloned().collect(),
            project_end: self.project_end.unwrap_or(self.start_date),
        }
    }
}

fn chain_pairs(tasks: &FxHashMap<String, Task>, chain: &Chain) -> Vec<(f64, f64)> {
    duration_pairs(chain.tasks.iter().filter_map(|id| tasks.get(id)))
}
