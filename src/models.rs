//! Core data types for the scheduling engine.

use chrono::NaiveDate;
use thiserror::Error;

use crate::EPS;

/// A resource requirement on a task: named resource and the units consumed
/// per working day (fractional units are allowed, e.g. 0.5 of a designer).
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDemand {
    pub name: String,
    pub units: f64,
}

impl ResourceDemand {
    pub fn new(name: impl Into<String>, units: f64) -> Self {
        Self {
            name: name.into(),
            units,
        }
    }
}

/// Execution state of a task. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Planned,
    InProgress,
    Completed,
}

/// One progress report. Records are append-only and self-contained so
/// downstream renderers can replay timelines.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressRecord {
    pub date: NaiveDate,
    pub remaining: f64,
    pub completed_work: f64,
    pub progress_pct: f64,
}

/// Errors raised by task state-machine mutators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskStateError {
    #[error("Task {0} is already completed")]
    AlreadyCompleted(String),
    #[error("Remaining duration must be non-negative, got {0}")]
    NegativeRemaining(f64),
}

/// A unit of work with duration estimates, dependencies and resource
/// demands. Scheduling attributes are assigned by the engine during
/// `schedule()`; execution attributes during progress tracking.
#[derive(Clone, Debug)]
pub struct Task {
    pub id: String,
    pub name: String,

    /// Median (50th percentile) estimate used for scheduling, in days.
    pub aggressive_duration: f64,
    /// Conservative estimate; the gap to aggressive feeds buffer sizing.
    pub safe_duration: f64,
    /// Duration the plan is built with. Locked to aggressive.
    pub planned_duration: f64,

    pub resources: Vec<ResourceDemand>,
    /// Predecessor task ids, kept sorted and deduplicated.
    pub dependencies: Vec<String>,

    // Scheduling attributes (day offsets from project start).
    pub early_start: f64,
    pub early_finish: f64,
    pub late_start: f64,
    pub late_finish: f64,
    pub slack: f64,
    pub is_critical: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub chain_id: Option<String>,
    /// Color assigned by the leveler (conflict-graph time slot).
    pub color: u32,

    // Execution attributes.
    pub status: TaskStatus,
    pub actual_start_date: Option<NaiveDate>,
    pub actual_end_date: Option<NaiveDate>,
    pub remaining_duration: f64,
    pub progress_history: Vec<ProgressRecord>,
    /// Dates maintained by execution-time re-propagation; `None` until the
    /// first recalculation touches this task.
    pub projected_start: Option<NaiveDate>,
    pub projected_end: Option<NaiveDate>,
}

impl Task {
    /// Create a task with an aggressive estimate. The safe estimate defaults
    /// to 1.5x aggressive until overridden.
    pub fn new(id: impl Into<String>, name: impl Into<String>, aggressive_duration: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aggressive_duration,
            safe_duration: aggressive_duration * 1.5,
            planned_duration: aggressive_duration,
            resources: Vec::new(),
            dependencies: Vec::new(),
            early_start: 0.0,
            early_finish: 0.0,
            late_start: 0.0,
            late_finish: 0.0,
            slack: 0.0,
            is_critical: false,
            start_date: None,
            end_date: None,
            chain_id: None,
            color: 0,
            status: TaskStatus::Planned,
            actual_start_date: None,
            actual_end_date: None,
            remaining_duration: aggressive_duration,
            progress_history: Vec::new(),
            projected_start: None,
            projected_end: None,
        }
    }

    pub fn with_safe_duration(mut self, safe_duration: f64) -> Self {
        self.safe_duration = safe_duration;
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self.dependencies.sort();
        self.dependencies.dedup();
        self
    }

    pub fn with_resource(mut self, name: &str, units: f64) -> Self {
        self.resources.push(ResourceDemand::new(name, units));
        self
    }

    /// Record a progress report. The first report starts the task; a report
    /// of zero remaining completes it. Completed tasks reject further
    /// updates.
    pub fn update_remaining(
        &mut self,
        remaining: f64,
        date: NaiveDate,
    ) -> Result<(), TaskStateError> {
        if self.status == TaskStatus::Completed {
            return Err(TaskStateError::AlreadyCompleted(self.id.clone()));
        }
        if remaining < -EPS {
            return Err(TaskStateError::NegativeRemaining(remaining));
        }

        if self.status == TaskStatus::Planned {
            self.status = TaskStatus::InProgress;
            self.actual_start_date = Some(date);
        }

        let remaining = remaining.max(0.0);
        self.remaining_duration = remaining;

        let completed_work = (self.planned_duration - remaining).max(0.0);
        let progress_pct = if self.planned_duration > EPS {
            (completed_work / self.planned_duration * 100.0).min(100.0)
        } else {
            100.0
        };
        self.progress_history.push(ProgressRecord {
            date,
            remaining,
            completed_work,
            progress_pct,
        });

        if remaining <= EPS {
            self.status = TaskStatus::Completed;
            self.actual_end_date = Some(date);
            self.remaining_duration = 0.0;
        }

        Ok(())
    }

    /// Work completed so far, in planned-duration terms.
    pub fn completed_work(&self) -> f64 {
        match self.status {
            TaskStatus::Planned => 0.0,
            _ => (self.planned_duration - self.remaining_duration).max(0.0),
        }
    }

    /// The end date execution currently expects: actual for completed tasks,
    /// re-propagated projection when available, baseline otherwise.
    pub fn effective_end(&self) -> Option<NaiveDate> {
        match self.status {
            TaskStatus::Completed => self.actual_end_date,
            _ => self.projected_end.or(self.end_date),
        }
    }

    /// Same selection as [`effective_end`](Self::effective_end) for starts.
    pub fn effective_start(&self) -> Option<NaiveDate> {
        match self.status {
            TaskStatus::Completed | TaskStatus::InProgress => self.actual_start_date,
            TaskStatus::Planned => self.projected_start.or(self.start_date),
        }
    }
}

/// Buffer kind: one project buffer per schedule, one feeding buffer per
/// feeding chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Project,
    Feeding,
}

/// One consumption snapshot, appended on every recalculation with a new
/// status date.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumptionRecord {
    pub date: NaiveDate,
    pub remaining: f64,
    pub consumption_pct: f64,
}

/// A time reserve in the schedule. Not a task: it consumes no resources and
/// is never worked; it absorbs delay.
#[derive(Clone, Debug)]
pub struct Buffer {
    pub id: String,
    pub kind: BufferKind,
    pub size_days: f64,
    pub original_size: f64,
    pub remaining: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Task the buffer sits behind: the last critical task for the project
    /// buffer, the merge-point critical task for a feeding buffer.
    pub attaches_to: String,
    pub source_chain: String,
    pub consumption_history: Vec<ConsumptionRecord>,
}

impl Buffer {
    pub fn new(
        id: impl Into<String>,
        kind: BufferKind,
        size_days: f64,
        attaches_to: impl Into<String>,
        source_chain: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            size_days,
            original_size: size_days,
            remaining: size_days,
            start_date: None,
            end_date: None,
            attaches_to: attaches_to.into(),
            source_chain: source_chain.into(),
            consumption_history: Vec::new(),
        }
    }

    pub fn consumption_pct(&self) -> f64 {
        if self.original_size <= EPS {
            return 0.0;
        }
        (self.original_size - self.remaining) / self.original_size * 100.0
    }

    /// Set remaining size and append a consumption record. Remaining never
    /// increases between records.
    pub fn record_consumption(&mut self, remaining: f64, date: NaiveDate) {
        self.remaining = remaining.clamp(0.0, self.remaining);
        self.consumption_history.push(ConsumptionRecord {
            date,
            remaining: self.remaining,
            consumption_pct: self.consumption_pct(),
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainKind {
    Critical,
    Feeding,
}

/// An ordered run of tasks: the critical chain, or a feeding chain that
/// merges into it. Back-references are by id; the scheduler owns the
/// registries.
#[derive(Clone, Debug)]
pub struct Chain {
    pub id: String,
    pub kind: ChainKind,
    pub tasks: Vec<String>,
    pub buffer: Option<String>,
    pub buffer_ratio: f64,
    /// For feeding chains: the critical task the chain merges into.
    pub merges_into: Option<String>,
}

impl Chain {
    pub fn new(id: impl Into<String>, kind: ChainKind, tasks: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            tasks,
            buffer: None,
            buffer_ratio: 0.5,
            merges_into: None,
        }
    }

    pub fn last_task(&self) -> &str {
        self.tasks.last().map(String::as_str).unwrap_or("")
    }
}
