//! Buffer sizing strategies.
//!
//! Each strategy is a pure function from a chain's (aggressive, safe)
//! duration pairs to a raw buffer size in days. Sizes are rounded up to
//! whole working days at the call sites that place buffers.

use crate::models::Task;

/// Estimate pairs for one chain: (aggressive, safe) per task.
pub type DurationPairs = Vec<(f64, f64)>;

/// How buffer sizes are derived from a chain's estimates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BufferStrategy {
    /// Half the sum of aggressive durations along the chain.
    CutAndPaste,
    /// Square root of the summed squared safe-minus-aggressive gaps.
    SumOfSquares,
    /// Caller-supplied sizing function over the chain's duration pairs.
    Custom(fn(&[(f64, f64)]) -> f64),
}

impl BufferStrategy {
    /// Raw (unrounded, unscaled) size for a chain.
    pub fn raw_size(&self, pairs: &[(f64, f64)]) -> f64 {
        match self {
            Self::CutAndPaste => 0.5 * pairs.iter().map(|(agg, _)| agg).sum::<f64>(),
            Self::SumOfSquares => pairs
                .iter()
                .map(|(agg, safe)| (safe - agg) * (safe - agg))
                .sum::<f64>()
                .sqrt(),
            Self::Custom(f) => f(pairs),
        }
    }

    /// Project buffer size for a chain: raw size, rounded up to whole days.
    pub fn project_buffer(&self, pairs: &[(f64, f64)]) -> f64 {
        self.raw_size(pairs).ceil()
    }

    /// Feeding buffer size: raw size scaled by the chain's ratio, rounded up
    /// to whole days.
    pub fn feeding_buffer(&self, pairs: &[(f64, f64)], ratio: f64) -> f64 {
        (self.raw_size(pairs) * ratio).ceil()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CutAndPaste => "Cut-and-Paste",
            Self::SumOfSquares => "Sum-of-Squares",
            Self::Custom(_) => "Custom",
        }
    }
}

/// Collect the (aggressive, safe) pairs for the given chain members.
pub fn duration_pairs<'a, I>(tasks: I) -> DurationPairs
where
    I: IntoIterator<Item = &'a Task>,
{
    tasks
        .into_iter()
        .map(|t| (t.aggressive_duration, t.safe_duration))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_and_paste() {
        let pairs = vec![(30.0, 45.0), (20.0, 30.0), (30.0, 45.0)];
        let strategy = BufferStrategy::CutAndPaste;
        assert!((strategy.raw_size(&pairs) - 40.0).abs() < 1e-9);
        assert!((strategy.project_buffer(&pairs) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_sum_of_squares() {
        // Gaps 15, 10, 15 -> sqrt(225 + 100 + 225) ~ 23.45
        let pairs = vec![(30.0, 45.0), (20.0, 30.0), (30.0, 45.0)];
        let strategy = BufferStrategy::SumOfSquares;
        assert!((strategy.raw_size(&pairs) - 550.0f64.sqrt()).abs() < 1e-9);
        assert!((strategy.project_buffer(&pairs) - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_feeding_buffer_scaled_and_ceiled() {
        // C&P raw = 15; half of it is 7.5, rounded up to 8.
        let pairs = vec![(20.0, 30.0), (10.0, 15.0)];
        let strategy = BufferStrategy::CutAndPaste;
        assert!((strategy.feeding_buffer(&pairs, 0.5) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_task_chain_uses_plain_formula() {
        let pairs = vec![(10.0, 16.0)];
        assert!((BufferStrategy::CutAndPaste.feeding_buffer(&pairs, 0.5) - 3.0).abs() < 1e-9);
        assert!((BufferStrategy::SumOfSquares.feeding_buffer(&pairs, 0.5) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_strategy() {
        fn fixed(_: &[(f64, f64)]) -> f64 {
            12.5
        }
        let strategy = BufferStrategy::Custom(fixed);
        assert!((strategy.project_buffer(&[]) - 13.0).abs() < 1e-9);
        assert_eq!(strategy.name(), "Custom");
    }

    #[test]
    fn test_empty_chain_sizes_to_zero() {
        assert!((BufferStrategy::CutAndPaste.raw_size(&[])).abs() < 1e-9);
        assert!((BufferStrategy::SumOfSquares.raw_size(&[])).abs() < 1e-9);
    }
}
