//! Critical Chain Project Management scheduling and execution engine.
//!
//! Given tasks with dependencies, duration estimates and resource demands,
//! the engine builds a resource-feasible baseline (forward/backward pass,
//! leveling, critical-chain and feeding-chain identification, buffer sizing
//! and placement) and then tracks buffer consumption as actuals are
//! reported during execution.

pub mod buffer_strategy;
pub mod calendar;
pub mod chains;
pub mod config;
pub mod graph;
pub mod leveling;
pub mod logging;
pub mod models;
pub mod passes;
pub mod resource;
pub mod scheduler;

pub use buffer_strategy::BufferStrategy;
pub use calendar::Calendar;
pub use config::SchedulerConfig;
pub use models::{
    Buffer, BufferKind, Chain, ChainKind, ConsumptionRecord, ProgressRecord, ResourceDemand, Task,
    TaskStatus,
};
pub use resource::{AllocationError, Resource, ResourceRegistry};
pub use scheduler::{
    fever_zone, ChainStatusRecord, FeverSeries, FeverZone, Schedule, ScheduleError, Scheduler,
};

/// Tolerance for fractional-day arithmetic.
pub(crate) const EPS: f64 = 1e-9;
