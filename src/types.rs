use serde::{Deserialize, Serialize};

/// One open endpoint, delivered to the result sink.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub host: String,
    pub port: u16,
    pub label: Option<String>,
    pub latency_ms: u64,
}

/// Why a probe resolved as not open.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Refused,
    Reset,
    TimedOut,
    Unreachable,
    Unresolved,
}

/// Terminal state of a single probe task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Open,
    Closed(CloseReason),
    /// Unexpected error while connecting; counted as attempted.
    Fault,
    /// Skipped before connecting because the scan was cancelled.
    Cancelled,
}

/// Closed probes broken down by [`CloseReason`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosedTally {
    pub refused: u64,
    pub reset: u64,
    pub timed_out: u64,
    pub unreachable: u64,
    pub unresolved: u64,
}

impl ClosedTally {
    pub fn record(&mut self, reason: CloseReason) {
        let slot = match reason {
            CloseReason::Refused => &mut self.refused,
            CloseReason::Reset => &mut self.reset,
            CloseReason::TimedOut => &mut self.timed_out,
            CloseReason::Unreachable => &mut self.unreachable,
            CloseReason::Unresolved => &mut self.unresolved,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.refused + self.reset + self.timed_out + self.unreachable + self.unresolved
    }
}

/// Aggregate counts for one scan run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Probes that ran (open, closed, faulted, or whose task failed).
    pub attempted: u64,
    /// Final value of the open-endpoint progress counter.
    pub open: u64,
    pub closed: ClosedTally,
    pub faults: u64,
    pub internal_errors: u64,
    pub cancelled: u64,
    /// Number of times the result sink was invoked.
    pub delivered: u64,
    pub elapsed_ms: u64,
}

impl ScanSummary {
    /// `(attempted, open)`
    pub fn counts(&self) -> (u64, u64) {
        (self.attempted, self.open)
    }

    pub(crate) fn record(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Open => self.attempted += 1,
            ProbeOutcome::Closed(reason) => {
                self.attempted += 1;
                self.closed.record(reason);
            }
            ProbeOutcome::Fault => {
                self.attempted += 1;
                self.faults += 1;
            }
            ProbeOutcome::Cancelled => self.cancelled += 1,
        }
    }
}
