//! Batch vs. interactive dispatch

/// Smallest unit size that goes through an asynchronous batch job
pub const BATCH_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Batch,
    Interactive,
}

/// Picks the execution path for a unit of `n` prepared records
///
/// Batch jobs carry fixed overhead (role propagation, scheduling latency)
/// that small units never amortize.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    threshold: usize,
}

impl DispatchPolicy {
    pub fn new() -> Self {
        Self {
            threshold: BATCH_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn select(&self, n: usize) -> DispatchMode {
        if n >= self.threshold {
            DispatchMode::Batch
        } else {
            DispatchMode::Interactive
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        let policy = DispatchPolicy::new();
        assert_eq!(policy.select(0), DispatchMode::Interactive);
        assert_eq!(policy.select(99), DispatchMode::Interactive);
        assert_eq!(policy.select(100), DispatchMode::Batch);
        assert_eq!(policy.select(101), DispatchMode::Batch);
    }

    #[test]
    fn test_custom_threshold() {
        let policy = DispatchPolicy::with_threshold(3);
        assert_eq!(policy.select(2), DispatchMode::Interactive);
        assert_eq!(policy.select(3), DispatchMode::Batch);
    }
}
