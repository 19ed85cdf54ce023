//! Execution tracking: progress updates, network re-propagation, buffer
//! consumption accounting and fever-chart data.

use chrono::NaiveDate;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{BufferKind, Chain, ChainKind, TaskStatus};
use crate::{log_changes, log_debug, EPS};

use super::core::{ScheduleError, Scheduler};

/// Fever-chart classification of a (completion %, consumption %) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeverZone {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for FeverZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeverZone::Green => write!(f, "green"),
            FeverZone::Yellow => write!(f, "yellow"),
            FeverZone::Red => write!(f, "red"),
        }
    }
}

/// Zone for a chain at `completion` percent done with `consumption` percent
/// of its buffer eaten. Pure and total.
pub fn fever_zone(completion_pct: f64, consumption_pct: f64) -> FeverZone {
    if consumption_pct < 10.0 + 0.6 * completion_pct {
        FeverZone::Green
    } else if consumption_pct < 30.0 + 0.6 * completion_pct {
        FeverZone::Yellow
    } else {
        FeverZone::Red
    }
}

/// Per-chain status snapshot, appended at every recalculation with a new
/// status date.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainStatusRecord {
    pub date: NaiveDate,
    pub completion_pct: f64,
    pub consumption_pct: f64,
    pub zone: FeverZone,
}

/// Timeline series for one chain, shaped for the fever-chart renderer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeverSeries {
    pub dates: Vec<NaiveDate>,
    pub completion: Vec<f64>,
    pub consumption: Vec<f64>,
    pub status: Vec<FeverZone>,
}

impl Scheduler {
    fn ensure_built(&self) -> Result<(), ScheduleError> {
        if !self.built {
            return Err(ScheduleError::InvalidTask(
                "schedule has not been built".to_string(),
            ));
        }
        Ok(())
    }

    /// Record a progress report for a task. The first report starts the
    /// task; zero remaining completes it.
    pub fn update_task_progress(
        &mut self,
        task_id: &str,
        remaining_days: f64,
        as_of: NaiveDate,
    ) -> Result<(), ScheduleError> {
        self.ensure_built()?;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ScheduleError::UnknownTaskId(task_id.to_string()))?;
        task.update_remaining(remaining_days, as_of)?;
        log_changes!(
            self.config.verbosity,
            "Progress for {}: {} days remaining as of {}",
            task_id,
            remaining_days,
            as_of
        );
        Ok(())
    }

    /// Re-propagate start/end dates forward from progressed tasks and update
    /// buffer consumption.
    ///
    /// Completed tasks keep their actual dates. In-progress tasks finish at
    /// `as_of` plus remaining workdays. A not-started task is re-dated only
    /// when one of its predecessors was touched, to max(predecessor ends,
    /// as_of); untouched subgraphs keep their baseline.
    pub fn recalculate_network_from_progress(
        &mut self,
        as_of: NaiveDate,
    ) -> Result<(), ScheduleError> {
        self.ensure_built()?;

        let mut touched: FxHashSet<String> = self
            .tasks
            .values()
            .filter(|t| t.status != TaskStatus::Planned)
            .map(|t| t.id.clone())
            .collect();

        let topo = self.topo.clone();
        for id in &topo {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            match task.status {
                TaskStatus::Completed => {
                    if let Some(task) = self.tasks.get_mut(id) {
                        task.projected_start = task.actual_start_date;
                        task.projected_end = task.actual_end_date;
                    }
                }
                TaskStatus::InProgress => {
                    let end = self.calendar.add_workdays(as_of, task.remaining_duration);
                    if let Some(task) = self.tasks.get_mut(id) {
                        task.projected_start = task.actual_start_date;
                        task.projected_end = Some(end);
                    }
                }
                TaskStatus::Planned => {
                    let has_touched_pred =
                        task.dependencies.iter().any(|dep| touched.contains(dep));
                    if !has_touched_pred {
                        continue;
                    }
                    let mut start = as_of;
                    for dep in &task.dependencies {
                        if let Some(end) = self.tasks.get(dep).and_then(|t| t.effective_end()) {
                            if end > start {
                                start = end;
                            }
                        }
                    }
                    let end = self.calendar.add_workdays(start, task.remaining_duration);
                    log_debug!(
                        self.config.verbosity,
                        "Re-propagated {} to {} -> {}",
                        id,
                        start,
                        end
                    );
                    if let Some(task) = self.tasks.get_mut(id) {
                        task.projected_start = Some(start);
                        task.projected_end = Some(end);
                    }
                    touched.insert(id.clone());
                }
            }
        }

        self.update_buffer_consumption();

        let is_new_date = self.last_status_date.map_or(true, |d| as_of > d);
        if is_new_date {
            for buffer in self.buffers.values_mut() {
                let remaining = buffer.remaining;
                buffer.record_consumption(remaining, as_of);
            }
            self.record_chain_status(as_of);
            self.last_status_date = Some(as_of);
        }

        Ok(())
    }

    /// Recompute buffer remaining sizes from the re-propagated network.
    /// Buffers absorb delay in accounting only; they are not precedence
    /// constraints during execution.
    fn update_buffer_consumption(&mut self) {
        let mut targets: Vec<(String, f64)> = Vec::new();

        for chain in &self.chains {
            let Some(buffer_id) = chain.buffer.clone() else {
                continue;
            };
            let Some(buffer) = self.buffers.get(&buffer_id) else {
                continue;
            };

            let delay = match buffer.kind {
                BufferKind::Feeding => {
                    // Overshoot of the feeding chain's last task past the
                    // buffer's planned start.
                    let last_end = self
                        .tasks
                        .get(chain.last_task())
                        .and_then(|t| t.effective_end());
                    match (last_end, buffer.start_date) {
                        (Some(end), Some(planned_start)) if end > planned_start => {
                            self.calendar.workdays_between(planned_start, end)
                        }
                        _ => 0.0,
                    }
                }
                BufferKind::Project => {
                    // Overshoot of the critical chain's last task past its
                    // baseline end.
                    let last_end = self
                        .tasks
                        .get(chain.last_task())
                        .and_then(|t| t.effective_end());
                    match (last_end, self.baseline_chain_end) {
                        (Some(end), Some(baseline)) if end > baseline => {
                            self.calendar.workdays_between(baseline, end)
                        }
                        _ => 0.0,
                    }
                }
            };

            targets.push((buffer_id, (buffer.original_size - delay).max(0.0)));
        }

        for (buffer_id, target) in targets {
            if let Some(buffer) = self.buffers.get_mut(&buffer_id) {
                // Remaining only shrinks; a recovering chain does not refill
                // its buffer.
                buffer.remaining = buffer.remaining.min(target);
            }
        }
    }

    /// Completion of a chain, work-based: completed work over planned work.
    pub fn chain_completion_pct(&self, chain: &Chain) -> f64 {
        let mut planned = 0.0;
        let mut completed = 0.0;
        for id in &chain.tasks {
            if let Some(task) = self.tasks.get(id) {
                planned += task.planned_duration;
                completed += task.completed_work();
            }
        }
        if planned <= EPS {
            return 0.0;
        }
        (completed / planned * 100.0).clamp(0.0, 100.0)
    }

    pub(crate) fn record_chain_status(&mut self, date: NaiveDate) {
        let records: Vec<(String, ChainStatusRecord)> = self
            .chains
            .iter()
            .map(|chain| {
                let completion_pct = self.chain_completion_pct(chain);
                let consumption_pct = chain
                    .buffer
                    .as_ref()
                    .and_then(|id| self.buffers.get(id))
                    .map(|b| b.consumption_pct())
                    .unwrap_or(0.0);
                (
                    chain.id.clone(),
                    ChainStatusRecord {
                        date,
                        completion_pct,
                        consumption_pct,
                        zone: fever_zone(completion_pct, consumption_pct),
                    },
                )
            })
            .collect();

        for (chain_id, record) in records {
            self.chain_status.entry(chain_id).or_default().push(record);
        }
    }

    /// Per-chain timeline of (date, completion, consumption, zone), keyed by
    /// chain id. Feeds the fever-chart renderer.
    pub fn fever_chart_data(&self) -> BTreeMap<String, FeverSeries> {
        let mut data = BTreeMap::new();
        for chain in &self.chains {
            let mut series = FeverSeries::default();
            if let Some(records) = self.chain_status.get(&chain.id) {
                for record in records {
                    series.dates.push(record.date);
                    series.completion.push(record.completion_pct);
                    series.consumption.push(record.consumption_pct);
                    series.status.push(record.zone);
                }
            }
            data.insert(chain.id.clone(), series);
        }
        data
    }

    /// Current fever zone of a chain.
    pub fn chain_zone(&self, chain_id: &str) -> Option<FeverZone> {
        self.chain_status
            .get(chain_id)
            .and_then(|records| records.last())
            .map(|record| record.zone)
    }

    /// Elapsed working days between actual start and end of a completed
    /// task. `None` while the task is not complete.
    pub fn actual_duration(&self, task_id: &str) -> Result<Option<f64>, ScheduleError> {
        let task = self.task(task_id)?;
        match (task.actual_start_date, task.actual_end_date) {
            (Some(start), Some(end)) if task.status == TaskStatus::Completed => {
                Ok(Some(self.calendar.workdays_between(start, end)))
            }
            _ => Ok(None),
        }
    }

    /// Completion of the whole project, work-based.
    pub fn project_completion_pct(&self) -> f64 {
        let mut planned = 0.0;
        let mut completed = 0.0;
        for task in self.tasks.values() {
            planned += task.planned_duration;
            completed += task.completed_work();
        }
        if planned <= EPS {
            return 0.0;
        }
        (completed / planned * 100.0).clamp(0.0, 100.0)
    }

    /// The critical chain, if the schedule is built.
    pub fn critical_chain(&self) -> Option<&Chain> {
        self.chains.iter().find(|c| c.kind == ChainKind::Critical)
    }
}
