use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ArgumentError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WORKERS: usize = 16;
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Tuning knobs for one scan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Deadline for each individual connect attempt.
    pub timeout: Duration,
    /// Upper bound on concurrently in-flight connect attempts.
    pub max_workers: usize,
    /// Capacity of the dispatch queue between workers and the result sink.
    pub queue_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ScanConfig {
    /// Build a config from a (possibly fractional) timeout in seconds.
    pub fn new(timeout_seconds: f64, max_workers: usize) -> Result<Self, ArgumentError> {
        let config = Self {
            timeout: timeout_from_secs(timeout_seconds)?,
            max_workers,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), ArgumentError> {
        if self.timeout.is_zero() {
            return Err(ArgumentError::ZeroTimeout);
        }
        if self.max_workers == 0 {
            return Err(ArgumentError::ZeroWorkers);
        }
        if self.max_workers > Semaphore::MAX_PERMITS {
            return Err(ArgumentError::TooManyWorkers {
                got: self.max_workers,
                max: Semaphore::MAX_PERMITS,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ArgumentError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

fn timeout_from_secs(secs: f64) -> Result<Duration, ArgumentError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ArgumentError::InvalidTimeout(secs));
    }
    let timeout = Duration::try_from_secs_f64(secs).map_err(|_| ArgumentError::InvalidTimeout(secs))?;
    if timeout.is_zero() {
        return Err(ArgumentError::ZeroTimeout);
    }
    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ScanConfig::default();
        assert_eq!(c.timeout, Duration::from_secs(2));
        assert_eq!(c.max_workers, 16);
        assert_eq!(c.queue_capacity, 8192);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn fractional_timeouts_are_accepted() {
        let c = ScanConfig::new(0.25, 4).unwrap();
        assert_eq!(c.timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_timeouts_are_rejected() {
        assert_eq!(ScanConfig::new(0.0, 4), Err(ArgumentError::InvalidTimeout(0.0)));
        assert_eq!(ScanConfig::new(-1.0, 4), Err(ArgumentError::InvalidTimeout(-1.0)));
        assert!(matches!(
            ScanConfig::new(f64::NAN, 4),
            Err(ArgumentError::InvalidTimeout(_))
        ));
        assert!(matches!(
            ScanConfig::new(f64::INFINITY, 4),
            Err(ArgumentError::InvalidTimeout(_))
        ));
        assert_eq!(ScanConfig::new(1e-12, 4), Err(ArgumentError::ZeroTimeout));
    }

    #[test]
    fn zero_workers_and_queue_are_rejected() {
        assert_eq!(ScanConfig::new(1.0, 0), Err(ArgumentError::ZeroWorkers));
        let c = ScanConfig::default().with_queue_capacity(0);
        assert_eq!(c.validate(), Err(ArgumentError::ZeroQueueCapacity));
    }
}
