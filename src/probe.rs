use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatch::Dispatch;
use crate::error::ProbeError;
use crate::progress::ScanProgress;
use crate::types::{ProbeOutcome, ScanResult};

/// Transport used to test whether `host:port` accepts a TCP handshake.
///
/// Implementations only establish and drop the connection; no application
/// data is exchanged. The engine applies the per-attempt deadline around
/// `connect`, so implementations need not enforce one themselves.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ProbeError>;
}

/// Real TCP transport backed by `tokio::net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| ProbeError::Unresolved(e.to_string()))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                // dropping the stream closes the socket
                Ok(_stream) => return Ok(()),
                Err(e) => last_err = Some(ProbeError::from_io(e)),
            }
        }
        Err(last_err.unwrap_or_else(|| ProbeError::Unresolved(format!("no addresses for {host}"))))
    }
}

/// Everything one probe task needs besides its endpoint.
#[derive(Clone)]
pub(crate) struct ProbeContext {
    pub connector: Arc<dyn Connector>,
    pub timeout: Duration,
    pub queue: mpsc::Sender<Dispatch>,
    pub progress: ScanProgress,
    pub cancel: CancellationToken,
}

/// Task body for a single `(host, port)` attempt. Holds its pool permit until
/// it returns.
pub(crate) async fn run_probe(
    ctx: ProbeContext,
    host: Arc<str>,
    port: u16,
    label: Option<Arc<str>>,
    permit: OwnedSemaphorePermit,
) -> ProbeOutcome {
    let _permit = permit;

    if ctx.cancel.is_cancelled() {
        return ProbeOutcome::Cancelled;
    }

    let start = Instant::now();
    let attempt = match time::timeout(ctx.timeout, ctx.connector.connect(&host, port)).await {
        Ok(res) => res,
        Err(_elapsed) => Err(ProbeError::TimedOut),
    };
    ctx.progress.finished.increment();

    match attempt {
        Ok(()) => {
            let result = ScanResult {
                host: host.to_string(),
                port,
                label: label.as_deref().map(str::to_owned),
                latency_ms: start.elapsed().as_millis() as u64,
            };
            debug!(%host, port, latency_ms = result.latency_ms, "endpoint open");
            if ctx.queue.send(Dispatch::Open(result)).await.is_err() {
                warn!(%host, port, "dispatch queue closed, open endpoint not delivered");
            }
            ctx.progress.open.increment();
            ProbeOutcome::Open
        }
        Err(err) => match err.reason() {
            Some(reason) => {
                debug!(%host, port, error = %err, "endpoint closed");
                ProbeOutcome::Closed(reason)
            }
            None => {
                warn!(%host, port, error = %err, "probe failed unexpectedly");
                ProbeOutcome::Fault
            }
        },
    }
}
