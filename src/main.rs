use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use connect_scan::{
    Engine, Ports, ResultSink, ScanConfig, ScanProgress, ScanResult, ScanSummary, Target,
};
use serde::Serialize;
use time::{format_description::well_known, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// connect-scan — concurrent TCP connect scanner.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "connect-scan",
    version,
    about = "Concurrent TCP connect scanner with bounded parallelism.",
    long_about = None
)]
struct Cli {
    /// Host to scan (name or address). Repeat for several hosts.
    #[arg(long = "host", required = true, num_args = 1..)]
    hosts: Vec<String>,

    /// Port to scan. Repeatable; combined with --port-range.
    #[arg(long = "port", num_args = 1.., value_parser = clap::value_parser!(u16).range(1..))]
    ports: Vec<u16>,

    /// Inclusive port range, e.g. `--port-range 1 1024`.
    #[arg(long = "port-range", num_args = 2, value_names = ["START", "END"],
          value_parser = clap::value_parser!(u16).range(1..))]
    port_range: Option<Vec<u16>>,

    /// Label attached to every result of this target.
    #[arg(long)]
    label: Option<String>,

    /// Max concurrent TCP connect attempts.
    #[arg(long, default_value_t = 16)]
    workers: usize,

    /// Connect timeout in seconds (fractions allowed).
    #[arg(long, default_value_t = 2.0)]
    timeout: f64,

    /// Capacity of the queue between probes and the printer.
    #[arg(long = "queue-capacity", default_value_t = 8192)]
    queue_capacity: usize,

    /// Log scan progress every SECS seconds.
    #[arg(long = "status-every", value_name = "SECS")]
    status_every: Option<u64>,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print results and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Serialize)]
struct ScanReport {
    started_at: String,
    config: ScanConfig,
    summary: ScanSummary,
    entries: Vec<ScanResult>,
}

/// Prints each open endpoint and keeps it for the JSON report.
struct ReportSink {
    entries: Arc<Mutex<Vec<ScanResult>>>,
}

impl ResultSink for ReportSink {
    fn deliver(&mut self, result: &ScanResult) {
        match &result.label {
            Some(label) => println!("Opened endpoint: [{label}] {}:{}", result.host, result.port),
            None => println!("Opened endpoint: {}:{}", result.host, result.port),
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(result.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = ScanConfig::new(cli.timeout, cli.workers)
        .context("invalid scan arguments")?
        .with_queue_capacity(cli.queue_capacity);
    let ports = build_ports(&cli)?;
    let mut target = Target::new(cli.hosts.clone(), ports).context("invalid scan target")?;
    if let Some(label) = cli.label.clone() {
        target = target.with_label(label);
    }

    let mut engine = Engine::new();
    engine.add_target(target);

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight probes");
            cancel_ctrlc.cancel();
        }
    });

    let progress = ScanProgress::new();
    if let Some(secs) = cli.status_every.filter(|s| *s > 0) {
        spawn_status(progress.clone(), cancel.clone(), Duration::from_secs(secs));
    }

    let entries = Arc::new(Mutex::new(Vec::new()));
    let sink = ReportSink {
        entries: entries.clone(),
    };
    let started_at = now_iso_like();
    let summary = engine
        .scan_with_shared(sink, &config, cancel.clone(), progress)
        .await
        .context("scan rejected")?;
    // stop the status loop
    cancel.cancel();

    print_summary(&summary);

    if let Some(path) = cli.output.as_deref() {
        let entries = entries.lock().map(|e| e.clone()).unwrap_or_default();
        let report = ScanReport {
            started_at,
            config,
            summary,
            entries,
        };
        write_report_json(path, &report)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("connect_scan={level},{level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_ports(cli: &Cli) -> Result<Ports> {
    let mut ports = cli.ports.clone();
    if let Some([start, end]) = cli.port_range.as_deref() {
        anyhow::ensure!(start <= end, "invalid port range {start}-{end} (start > end)");
        ports.extend(*start..=*end);
    }
    // Ports::list drops ports named by both --port and --port-range
    if ports.is_empty() {
        return Ports::range(1, 1024).context("default port range");
    }
    Ok(Ports::list(ports)?)
}

fn spawn_status(progress: ScanProgress, cancel: CancellationToken, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => info!(
                    submitted = progress.submitted.value(),
                    finished = progress.finished.value(),
                    open = progress.open.value(),
                    "scan progress"
                ),
            }
        }
    });
}

fn print_summary(summary: &ScanSummary) {
    let secs = (summary.elapsed_ms as f64 / 1000.0).max(0.001);
    println!(
        "Scan finished. {} endpoints are open ({} in total). Time elapsed: {:.2}s. Average speed: {:.2} try per second.",
        summary.open,
        summary.attempted,
        secs,
        summary.attempted as f64 / secs
    );
    let c = &summary.closed;
    println!(
        "Closed: {} refused, {} reset, {} timed out, {} unreachable, {} unresolved; {} faults, {} cancelled",
        c.refused, c.reset, c.timed_out, c.unreachable, c.unresolved, summary.faults, summary.cancelled
    );
}

fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

fn now_iso_like() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("connect-scan").chain(args.iter().copied()))
    }

    #[test]
    fn overlapping_port_flags_scan_each_port_once() {
        let cli = cli(&["--host", "h", "--port", "80", "--port-range", "1", "100"]);
        let target = Target::new("h", build_ports(&cli).unwrap()).unwrap();
        assert_eq!(target.pair_count(), Some(100));
        let ports: Vec<u16> = target.iterate().map(|(_, p)| p).collect();
        assert_eq!(ports.iter().filter(|&&p| p == 80).count(), 1);
    }

    #[test]
    fn no_port_flags_default_to_the_well_known_range() {
        let cli = cli(&["--host", "h"]);
        let target = Target::new("h", build_ports(&cli).unwrap()).unwrap();
        assert_eq!(target.pair_count(), Some(1024));
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let cli = cli(&["--host", "h", "--port-range", "100", "1"]);
        assert!(build_ports(&cli).is_err());
    }
}
