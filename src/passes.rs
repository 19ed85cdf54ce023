//! Forward and backward passes over the dependency DAG.
//!
//! Both passes work in fractional day offsets from the project start; the
//! leveler turns offsets into calendar dates afterwards.

use rustc_hash::FxHashMap;

use crate::graph::dependents_map;
use crate::models::Task;
use crate::EPS;

/// Per-task timing computed by the passes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskTiming {
    pub early_start: f64,
    pub early_finish: f64,
    pub late_start: f64,
    pub late_finish: f64,
    pub slack: f64,
}

impl TaskTiming {
    pub fn is_critical(&self) -> bool {
        self.slack.abs() < EPS
    }
}

/// Compute earliest start/finish per task: a task starts when its latest
/// predecessor finishes.
pub fn forward_pass(tasks: &FxHashMap<String, Task>, topo: &[String]) -> FxHashMap<String, TaskTiming> {
    let mut timings: FxHashMap<String, TaskTiming> =
        FxHashMap::with_capacity_and_hasher(tasks.len(), Default::default());

    for id in topo {
        let task = &tasks[id];
        let mut earliest_start = 0.0f64;
        for dep in &task.dependencies {
            if let Some(dep_timing) = timings.get(dep) {
                if dep_timing.early_finish > earliest_start {
                    earliest_start = dep_timing.early_finish;
                }
            }
        }
        timings.insert(
            id.clone(),
            TaskTiming {
                early_start: earliest_start,
                early_finish: earliest_start + task.planned_duration,
                ..TaskTiming::default()
            },
        );
    }

    timings
}

/// Fill in latest start/finish and slack, walking the topo order backwards.
/// End tasks anchor at the project duration; zero slack marks the critical
/// path.
pub fn backward_pass(
    tasks: &FxHashMap<String, Task>,
    topo: &[String],
    timings: &mut FxHashMap<String, TaskTiming>,
) {
    let project_duration = timings
        .values()
        .map(|t| t.early_finish)
        .fold(0.0f64, f64::max);

    let dependents = dependents_map(tasks);

    for id in topo.iter().rev() {
        let duration = tasks[id].planned_duration;

        let mut latest_finish = f64::MAX;
        if let Some(succs) = dependents.get(id) {
            for succ in succs {
                if let Some(succ_timing) = timings.get(succ) {
                    if succ_timing.late_start < latest_finish {
                        latest_finish = succ_timing.late_start;
                    }
                }
            }
        }
        if latest_finish == f64::MAX {
            latest_finish = project_duration;
        }

        if let Some(timing) = timings.get_mut(id) {
            timing.late_finish = latest_finish;
            timing.late_start = latest_finish - duration;
            timing.slack = timing.late_start - timing.early_start;
        }
    }
}

/// Copy computed timings onto the tasks themselves.
pub fn apply_timings(tasks: &mut FxHashMap<String, Task>, timings: &FxHashMap<String, TaskTiming>) {
    for (id, timing) in timings {
        if let Some(task) = tasks.get_mut(id) {
            task.early_start = timing.early_start;
            task.early_finish = timing.early_finish;
            task.late_start = timing.late_start;
            task.late_finish = timing.late_finish;
            task.slack = timing.slack;
        }
    }
}
