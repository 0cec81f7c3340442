//! Per-block timing.

use std::time::Duration;

/// Timing of processed blocks against their real-time budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockStats {
    /// Blocks completed.
    pub blocks: u64,
    /// Samples produced.
    pub samples: u64,
    /// Blocks that failed.
    pub failed_blocks: u64,
    /// Duration of the most recent block.
    pub last_duration: Duration,
    /// Longest block.
    pub max_duration: Duration,
    /// Blocks slower than their budget.
    pub over_budget: u64,
    total_duration: Duration,
}

impl BlockStats {
    /// Record a completed block. Returns `true` if it missed its budget.
    pub fn record(&mut self, samples: usize, elapsed: Duration, budget: Duration) -> bool {
        self.blocks += 1;
        self.samples += samples as u64;
        self.last_duration = elapsed;
        self.max_duration = self.max_duration.max(elapsed);
        self.total_duration += elapsed;

        let late = !budget.is_zero() && elapsed > budget;
        if late {
            self.over_budget += 1;
        }
        late
    }

    /// Record a failed block.
    pub fn record_failure(&mut self) {
        self.failed_blocks += 1;
    }

    /// Mean block duration.
    pub fn mean_duration(&self) -> Duration {
        if self.blocks == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.blocks as u32
        }
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let mut stats = BlockStats::default();
        let budget = Duration::from_millis(10);

        assert!(!stats.record(64, Duration::from_millis(4), budget));
        assert!(stats.record(64, Duration::from_millis(12), budget));

        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.samples, 128);
        assert_eq!(stats.over_budget, 1);
        assert_eq!(stats.max_duration, Duration::from_millis(12));
        assert_eq!(stats.last_duration, Duration::from_millis(12));
        assert_eq!(stats.mean_duration(), Duration::from_millis(8));
    }

    #[test]
    fn test_zero_budget_never_late() {
        let mut stats = BlockStats::default();
        assert!(!stats.record(1, Duration::from_secs(1), Duration::ZERO));
    }
}
