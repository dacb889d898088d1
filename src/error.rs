use std::io;

use thiserror::Error;
use tokio::task::JoinError;

use crate::types::CloseReason;

/// A host or port sequence handed to [`Target::new`](crate::target::Target::new) was malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("host #{index} is blank")]
    BlankHost { index: usize },

    #[error("port 0 is not a valid TCP port")]
    ZeroPort,

    #[error("invalid port range {start}-{end} (start > end)")]
    InvertedRange { start: u16, end: u16 },
}

/// Rejected scan arguments. Always raised before any probe is submitted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("timeout must be a positive, finite number of seconds (got {0})")]
    InvalidTimeout(f64),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max workers must be at least 1")]
    ZeroWorkers,

    #[error("max workers must not exceed {max} (got {got})")]
    TooManyWorkers { got: usize, max: usize },

    #[error("dispatch queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

/// Connect-level failure of a single probe.
///
/// Everything except [`ProbeError::Fault`] simply means "not open". A fault is
/// an error the scan did not expect (descriptor exhaustion, allocation failure)
/// and is logged, but it is still recovered inside the worker.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection refused")]
    Refused,

    #[error("connection reset")]
    Reset,

    #[error("connect timed out")]
    TimedOut,

    #[error("unreachable: {0}")]
    Unreachable(#[source] io::Error),

    #[error("name resolution failed: {0}")]
    Unresolved(String),

    #[error("unexpected i/o failure: {0}")]
    Fault(#[source] io::Error),
}

#[cfg(windows)]
const EXHAUSTION_ERRNOS: &[i32] = &[10024, 10055]; // WSAEMFILE, WSAENOBUFS
#[cfg(not(windows))]
const EXHAUSTION_ERRNOS: &[i32] = &[23, 24]; // ENFILE, EMFILE

impl ProbeError {
    /// Classify an error returned by a connect attempt.
    pub fn from_io(err: io::Error) -> Self {
        if err
            .raw_os_error()
            .is_some_and(|code| EXHAUSTION_ERRNOS.contains(&code))
        {
            return ProbeError::Fault(err);
        }
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ProbeError::Refused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => ProbeError::Reset,
            io::ErrorKind::TimedOut => ProbeError::TimedOut,
            io::ErrorKind::OutOfMemory => ProbeError::Fault(err),
            _ => ProbeError::Unreachable(err),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, ProbeError::Fault(_))
    }

    /// The closed-port reason this failure maps to, or `None` for faults.
    pub fn reason(&self) -> Option<CloseReason> {
        match self {
            ProbeError::Refused => Some(CloseReason::Refused),
            ProbeError::Reset => Some(CloseReason::Reset),
            ProbeError::TimedOut => Some(CloseReason::TimedOut),
            ProbeError::Unreachable(_) => Some(CloseReason::Unreachable),
            ProbeError::Unresolved(_) => Some(CloseReason::Unresolved),
            ProbeError::Fault(_) => None,
        }
    }
}

/// Plumbing failures inside the engine. These are logged and folded into
/// `ScanSummary::internal_errors`; `scan()` never returns them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("probe task failed: {0}")]
    TaskFailed(#[source] JoinError),

    #[error("dispatch queue closed before the end-of-stream marker was sent")]
    DispatchClosed,

    #[error("delivery consumer failed: {0}")]
    Delivery(#[source] JoinError),
}
