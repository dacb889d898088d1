//! Concurrent TCP connect-scan engine with bounded parallelism and ordered,
//! single-consumer delivery of open endpoints.
pub mod config;
pub mod dispatch;
pub mod error;
pub mod probe;
pub mod progress;
pub mod scanner;
pub mod target;
pub mod types;

pub use config::ScanConfig;
pub use dispatch::ResultSink;
pub use error::{ArgumentError, ProbeError, TargetError};
pub use probe::{Connector, TcpConnector};
pub use progress::{ProgressCounter, ScanProgress};
pub use scanner::Engine;
pub use target::{Hosts, IntoHosts, IntoPorts, Ports, Target, TargetRegistry};
pub use types::{CloseReason, ScanResult, ScanSummary};
