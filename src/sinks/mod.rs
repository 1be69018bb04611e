//! Consumers of finished measurements.
//!
//! Every sink runs in its own task behind a bounded queue. The pipeline sends
//! each measurement into every sink queue in turn; the sink task applies its
//! own rate limit and publishes. A failed publish is logged and dropped, never
//! retried.

pub mod debug;
pub mod influxdb;

use crate::limiter::RateLimiter;
use crate::measurement::Measurement;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use debug::DebugSink;
pub use influxdb::InfluxLineSink;

/// Errors a sink can hit while publishing.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to serialize measurement: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A destination for finished measurements.
///
/// Sinks receive shared, immutable measurements and must not try to change them.
pub trait Sink: Send + 'static {
    fn name(&self) -> &'static str;

    fn publish(&mut self, measurement: &Measurement) -> Result<(), SinkError>;

    /// Called once after the queue has been closed and drained.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Counters reported by a sink task when it finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub published: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// The pipeline's end of a sink queue.
#[derive(Debug)]
pub struct SinkHandle {
    name: &'static str,
    tx: mpsc::Sender<Arc<Measurement>>,
    task: Option<JoinHandle<SinkStats>>,
}

impl SinkHandle {
    /// A bare queue for consumers that are not a [`Sink`]; the caller drains
    /// the returned receiver itself.
    pub fn channel(
        name: &'static str,
        capacity: usize,
    ) -> (SinkHandle, mpsc::Receiver<Arc<Measurement>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            SinkHandle {
                name,
                tx,
                task: None,
            },
            rx,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<Arc<Measurement>> {
        &self.tx
    }

    /// Close the queue and wait for the sink to publish what is left in it.
    pub async fn close(self) -> SinkStats {
        let SinkHandle { name, tx, task } = self;
        drop(tx);
        match task {
            Some(task) => task.await.unwrap_or_else(|error| {
                tracing::error!(sink = name, %error, "Sink task failed");
                SinkStats::default()
            }),
            None => SinkStats::default(),
        }
    }
}

/// Start a task publishing to `sink`, fed by a queue of `capacity` items.
///
/// Each tag is published at most once per `min_interval`; a zero interval
/// publishes everything. A zero capacity is raised to one.
pub fn spawn<S: Sink>(sink: S, capacity: usize, min_interval: Duration) -> SinkHandle {
    let name = sink.name();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let limiter = RateLimiter::new(min_interval);
    tracing::info!(sink = name, ?min_interval, "Starting sink");
    let task = tokio::spawn(run(sink, rx, limiter));
    SinkHandle {
        name,
        tx,
        task: Some(task),
    }
}

async fn run<S: Sink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<Measurement>>,
    limiter: RateLimiter,
) -> SinkStats {
    let mut stats = SinkStats::default();

    while let Some(measurement) = rx.recv().await {
        if !limiter.admit(&measurement.mac) {
            tracing::trace!(
                sink = sink.name(),
                mac = %measurement.mac,
                "Skipping publish due to interval limit"
            );
            stats.skipped += 1;
            continue;
        }

        match sink.publish(&measurement) {
            Ok(()) => stats.published += 1,
            Err(error) => {
                tracing::error!(sink = sink.name(), mac = %measurement.mac, %error, "Failed to publish measurement");
                stats.failed += 1;
            }
        }
    }

    if let Err(error) = sink.flush() {
        tracing::error!(sink = sink.name(), %error, "Failed to flush sink");
    }
    tracing::debug!(sink = sink.name(), ?stats, "Sink stopped");
    stats
}
