use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ScanConfig;
use crate::dispatch::{self, Dispatch, ResultSink};
use crate::error::{ArgumentError, EngineError};
use crate::probe::{run_probe, Connector, ProbeContext, TcpConnector};
use crate::progress::ScanProgress;
use crate::target::Target;
use crate::types::{ProbeOutcome, ScanSummary};

/// Concurrent TCP connect-scan engine.
///
/// Targets are queued with [`Engine::add_target`] / [`Engine::add_targets`]
/// and consumed by the next scan. Each scan:
///
/// - Enumerates targets in submission order and spawns one probe task per
///   `(host, port)` pair, after acquiring one of `max_workers` semaphore permits.
/// - Delivers open endpoints to the sink from a single consumer thread, in the
///   order the probes completed.
/// - Returns only after every probe has finished and the consumer has drained
///   the queue up to the end-of-stream marker.
pub struct Engine {
    connector: Arc<dyn Connector>,
    targets: Vec<Target>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            targets: Vec::new(),
        }
    }

    pub fn add_target(&mut self, target: Target) {
        self.targets.push(target);
    }

    /// Queue several targets at once; accepts a `TargetRegistry`.
    pub fn add_targets(&mut self, targets: impl IntoIterator<Item = Target>) {
        self.targets.extend(targets);
    }

    pub fn pending_targets(&self) -> usize {
        self.targets.len()
    }

    pub async fn scan<S: ResultSink>(
        &mut self,
        sink: S,
        config: &ScanConfig,
    ) -> Result<ScanSummary, ArgumentError> {
        self.scan_internal(sink, config, None, None).await
    }

    /// Variant that accepts a `CancellationToken` to stop submitting early.
    pub async fn scan_with_cancel<S: ResultSink>(
        &mut self,
        sink: S,
        config: &ScanConfig,
        cancel: CancellationToken,
    ) -> Result<ScanSummary, ArgumentError> {
        self.scan_internal(sink, config, Some(cancel), None).await
    }

    /// Variant that also publishes live counters through `shared`. Pass a
    /// fresh `ScanProgress` per run.
    pub async fn scan_with_shared<S: ResultSink>(
        &mut self,
        sink: S,
        config: &ScanConfig,
        cancel: CancellationToken,
        shared: ScanProgress,
    ) -> Result<ScanSummary, ArgumentError> {
        self.scan_internal(sink, config, Some(cancel), Some(shared))
            .await
    }

    async fn scan_internal<S: ResultSink>(
        &mut self,
        sink: S,
        config: &ScanConfig,
        cancel_opt: Option<CancellationToken>,
        shared_opt: Option<ScanProgress>,
    ) -> Result<ScanSummary, ArgumentError> {
        config.validate()?;

        let targets = std::mem::take(&mut self.targets);
        let cancel = cancel_opt.unwrap_or_default();
        let progress = shared_opt.unwrap_or_default();
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        info!(
            targets = targets.len(),
            max_workers = config.max_workers,
            timeout_ms = config.timeout.as_millis() as u64,
            "start scanning"
        );

        let (tx, rx) = dispatch::queue(config.queue_capacity);
        let delivery = dispatch::spawn_delivery(rx, sink);

        let ctx = ProbeContext {
            connector: self.connector.clone(),
            timeout: config.timeout,
            queue: tx.clone(),
            progress: progress.clone(),
            cancel: cancel.clone(),
        };
        let sem = Arc::new(Semaphore::new(config.max_workers));
        let mut set = JoinSet::new();

        'targets: for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            info!(scan_target = ?target, "submit scan target");
            let label: Option<Arc<str>> = target.label().map(Arc::from);

            for (host, port) in target.iterate() {
                let acquired = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'targets,
                    acquired = sem.clone().acquire_owned() => acquired,
                };
                // the pool semaphore is owned here and never closed
                let Ok(permit) = acquired else {
                    break 'targets;
                };

                progress.submitted.increment();
                set.spawn(run_probe(ctx.clone(), host, port, label.clone(), permit));

                // Reap finished probes so the set stays bounded by the pool size.
                while let Some(res) = set.try_join_next() {
                    tally(&mut summary, res);
                }
            }
        }

        while let Some(res) = set.join_next().await {
            tally(&mut summary, res);
        }
        drop(ctx);

        // Every producer has finished; End is the last message on the queue.
        if tx.send(Dispatch::End).await.is_err() {
            report(&mut summary, EngineError::DispatchClosed);
        }
        drop(tx);

        match delivery.await {
            Ok(delivered) => summary.delivered = delivered,
            Err(e) => report(&mut summary, EngineError::Delivery(e)),
        }

        summary.open = progress.open.value();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            attempted = summary.attempted,
            open = summary.open,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed_ms,
            "scan finished"
        );
        Ok(summary)
    }
}

fn tally(summary: &mut ScanSummary, res: Result<ProbeOutcome, JoinError>) {
    match res {
        Ok(outcome) => summary.record(outcome),
        Err(e) => {
            // the probe ran (or started to) before failing
            summary.attempted += 1;
            report(summary, EngineError::TaskFailed(e));
        }
    }
}

fn report(summary: &mut ScanSummary, err: EngineError) {
    error!(error = %err, "scan engine error");
    summary.internal_errors += 1;
}
