//! Configuration types for the scheduling engine.

/// Tunable parameters for schedule construction and execution tracking.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Ratio applied to feeding-buffer sizes on top of the strategy result.
    pub feeding_buffer_ratio: f64,
    /// Maximum resource-leveling iterations before giving up.
    pub leveling_max_iterations: usize,
    /// Forward search horizon for task placement, in calendar days from the
    /// project start. Exhausting it surfaces the blocking day as an
    /// overallocation error.
    pub horizon_days: i64,
    /// Logging verbosity (0 silent .. 3 debug).
    pub verbosity: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            feeding_buffer_ratio: 0.5,
            leveling_max_iterations: 8,
            horizon_days: 3650,
            verbosity: 0,
        }
    }
}
