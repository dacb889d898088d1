use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter shared between probe workers and observers.
///
/// Clones share the same underlying value. Increments never block, and
/// `value()` is a plain atomic snapshot, so polling it from a status loop
/// never contends with the workers on the hot path.
#[derive(Clone, Debug, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live counters for one scan run, readable while the scan is in flight.
#[derive(Clone, Debug, Default)]
pub struct ScanProgress {
    /// Probes handed to the worker pool.
    pub submitted: ProgressCounter,
    /// Probes whose connect attempt has resolved.
    pub finished: ProgressCounter,
    /// Endpoints confirmed open.
    pub open: ProgressCounter,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_count() {
        let a = ProgressCounter::new();
        let b = a.clone();
        a.increment();
        b.increment();
        assert_eq!(a.value(), 2);
        assert_eq!(b.value(), 2);
    }

    #[test]
    fn reads_do_not_advance_the_count() {
        let c = ProgressCounter::new();
        c.increment();
        assert_eq!(c.value(), 1);
        assert_eq!(c.value(), 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counter = ProgressCounter::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        counter.increment();
                    }
                })
            })
            .collect();
        let mut snapshots = Vec::new();
        while snapshots.len() < 50 {
            snapshots.push(counter.value());
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(snapshots.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(counter.value(), 8_000);
    }
}
