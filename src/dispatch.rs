//! Hand-off from probe workers to the single delivery consumer.
//!
//! Workers push [`Dispatch::Open`] into a bounded channel; one blocking
//! consumer drains it and is the only caller of the [`ResultSink`]. The engine
//! sends [`Dispatch::End`] once every probe has finished, so it is always the
//! last message the consumer sees.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::types::ScanResult;

/// Message on the dispatch queue.
#[derive(Debug)]
pub enum Dispatch {
    Open(ScanResult),
    End,
}

/// Receiver of confirmed-open endpoints.
///
/// Every `FnMut(&str, u16, Option<&str>)` closure is a sink, called as
/// `(host, port, label)`.
pub trait ResultSink: Send + 'static {
    fn deliver(&mut self, result: &ScanResult);
}

impl<F> ResultSink for F
where
    F: FnMut(&str, u16, Option<&str>) + Send + 'static,
{
    fn deliver(&mut self, result: &ScanResult) {
        self(&result.host, result.port, result.label.as_deref())
    }
}

pub(crate) fn queue(capacity: usize) -> (mpsc::Sender<Dispatch>, mpsc::Receiver<Dispatch>) {
    mpsc::channel(capacity)
}

/// Start the delivery consumer on a dedicated blocking thread. Resolves to the
/// number of results handed to the sink.
pub(crate) fn spawn_delivery<S: ResultSink>(
    mut rx: mpsc::Receiver<Dispatch>,
    mut sink: S,
) -> JoinHandle<u64> {
    tokio::task::spawn_blocking(move || {
        info!("delivery consumer started");
        let mut delivered = 0u64;
        while let Some(msg) = rx.blocking_recv() {
            match msg {
                Dispatch::Open(result) => {
                    sink.deliver(&result);
                    delivered += 1;
                }
                Dispatch::End => break,
            }
        }
        info!(delivered, "delivery consumer stopped");
        delivered
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn result(port: u16) -> ScanResult {
        ScanResult {
            host: "127.0.0.1".into(),
            port,
            label: Some("t".into()),
            latency_ms: 0,
        }
    }

    #[tokio::test]
    async fn consumer_delivers_in_queue_order_and_stops_at_end() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let (tx, rx) = queue(4);
        let consumer = spawn_delivery(rx, move |_: &str, port: u16, label: Option<&str>| {
            assert_eq!(label, Some("t"));
            sink_seen.lock().unwrap().push(port);
        });

        for port in [3, 1, 2] {
            tx.send(Dispatch::Open(result(port))).await.unwrap();
        }
        tx.send(Dispatch::End).await.unwrap();

        assert_eq!(consumer.await.unwrap(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2]);
        // the receiver is gone once the consumer has stopped
        assert!(tx.send(Dispatch::Open(result(9))).await.is_err());
    }

    #[tokio::test]
    async fn consumer_stops_when_all_senders_drop() {
        let (tx, rx) = queue(1);
        let consumer = spawn_delivery(rx, |_: &str, _: u16, _: Option<&str>| {});
        drop(tx);
        assert_eq!(consumer.await.unwrap(), 0);
    }
}
