//! Dependency-graph utilities: topological sort, reverse graph, longest path.
//!
//! All functions iterate tasks in ascending id order so identical inputs
//! yield identical outputs regardless of map insertion order.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::models::Task;
use crate::EPS;

/// Errors raised by graph traversal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
}

/// Task ids in ascending order.
pub fn sorted_ids(tasks: &FxHashMap<String, Task>) -> Vec<String> {
    let mut ids: Vec<String> = tasks.keys().cloned().collect();
    ids.sort();
    ids
}

/// Reverse graph: task id -> ids of tasks depending on it, each list sorted.
pub fn dependents_map(tasks: &FxHashMap<String, Task>) -> FxHashMap<String, Vec<String>> {
    let mut dependents: FxHashMap<String, Vec<String>> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    for id in sorted_ids(tasks) {
        for dep in &tasks[&id].dependencies {
            if tasks.contains_key(dep) {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
        }
    }
    dependents
}

/// Kahn topological sort: predecessors before successors, ties resolved by
/// ascending id. Fails with the offending cycle when the graph is not a DAG.
pub fn topo_order(tasks: &FxHashMap<String, Task>) -> Result<Vec<String>, GraphError> {
    let dependents = dependents_map(tasks);

    let mut in_degree: FxHashMap<&str, usize> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    for (id, task) in tasks {
        let degree = task
            .dependencies
            .iter()
            .filter(|dep| tasks.contains_key(dep.as_str()))
            .count();
        in_degree.insert(id.as_str(), degree);
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut result: Vec<String> = Vec::with_capacity(tasks.len());
    while let Some(&id) = ready.iter().next() {
        ready.remove(id);
        result.push(id.to_string());

        if let Some(deps) = dependents.get(id) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
    }

    if result.len() != tasks.len() {
        let remaining: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree > 0)
            .map(|(&id, _)| id)
            .collect();
        return Err(GraphError::CycleDetected {
            path: extract_cycle(tasks, &remaining),
        });
    }

    Ok(result)
}

/// Walk through the unresolved remainder of a failed Kahn pass until a node
/// repeats; the loop between the repeats is a concrete cycle.
fn extract_cycle(tasks: &FxHashMap<String, Task>, remaining: &BTreeSet<&str>) -> Vec<String> {
    let Some(&start) = remaining.iter().next() else {
        return Vec::new();
    };

    let mut path: Vec<&str> = vec![start];
    let mut seen: FxHashMap<&str, usize> = FxHashMap::default();
    seen.insert(start, 0);

    let mut current = start;
    loop {
        // Every unresolved node keeps at least one unresolved dependency.
        let Some(next) = tasks[current]
            .dependencies
            .iter()
            .map(String::as_str)
            .find(|dep| remaining.contains(dep))
        else {
            return path.iter().map(|s| s.to_string()).collect();
        };

        if let Some(&first) = seen.get(next) {
            let mut cycle: Vec<String> = path[first..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            cycle.reverse();
            return cycle;
        }

        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

/// Ancestor sets (transitive dependencies) per task.
pub fn ancestors(
    tasks: &FxHashMap<String, Task>,
    topo: &[String],
) -> FxHashMap<String, FxHashSet<String>> {
    let mut reach: FxHashMap<String, FxHashSet<String>> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    for id in topo {
        let mut set: FxHashSet<String> = FxHashSet::default();
        for dep in &tasks[id].dependencies {
            if !tasks.contains_key(dep) {
                continue;
            }
            set.insert(dep.clone());
            if let Some(dep_reach) = reach.get(dep) {
                set.extend(dep_reach.iter().cloned());
            }
        }
        reach.insert(id.clone(), set);
    }
    reach
}

/// Ordered task sequence maximizing the summed weight along a dependency
/// path. Ties prefer the lower task id, both at interior steps and at the
/// terminal.
pub fn longest_path_by_duration<F>(
    tasks: &FxHashMap<String, Task>,
    weight: F,
) -> Result<Vec<String>, GraphError>
where
    F: Fn(&Task) -> f64,
{
    let topo = topo_order(tasks)?;
    let mut dist: FxHashMap<&str, f64> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());
    let mut best_pred: FxHashMap<&str, Option<&str>> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());

    for id in &topo {
        let task = &tasks[id];
        let mut best: Option<(&str, f64)> = None;
        for dep in &task.dependencies {
            let Some(&dep_dist) = dist.get(dep.as_str()) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_id, best_dist)) => {
                    dep_dist > best_dist + EPS
                        || ((dep_dist - best_dist).abs() <= EPS && dep.as_str() < best_id)
                }
            };
            if better {
                best = Some((dep.as_str(), dep_dist));
            }
        }
        let base = best.map(|(_, d)| d).unwrap_or(0.0);
        dist.insert(id.as_str(), base + weight(task));
        best_pred.insert(id.as_str(), best.map(|(p, _)| p));
    }

    let mut terminal: Option<(&str, f64)> = None;
    for id in &topo {
        let d = dist[id.as_str()];
        let better = match terminal {
            None => true,
            Some((best_id, best_dist)) => {
                d > best_dist + EPS || ((d - best_dist).abs() <= EPS && id.as_str() < best_id)
            }
        };
        if better {
            terminal = Some((id.as_str(), d));
        }
    }

    let mut path: Vec<String> = Vec::new();
    let mut current = terminal.map(|(id, _)| id);
    while let Some(id) = current {
        path.push(id.to_string());
        current = best_pred.get(id).copied().flatten();
    }
    path.reverse();
    Ok(path)
}
