//! The coordinator between sources and sinks.
//!
//! Sources push decoded measurements into one bounded inbound queue. For each
//! item the pipeline applies the [`TagPolicy`], optionally enriches it with
//! calculated values, and sends it into every attached sink queue in attach
//! order. A full sink queue blocks the whole loop; that backpressure reaches
//! back to the sources through the inbound queue.
//!
//! The pipeline has no stop of its own. It drains once every producer sender
//! has been dropped, closes the sink queues and waits for the sinks to finish.

use crate::calculator;
use crate::measurement::Measurement;
use crate::policy::TagPolicy;
use crate::sinks::SinkHandle;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Queue capacity used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Knobs for the processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingSettings {
    /// Run [`calculator::enrich`] on every admitted measurement.
    pub extended_values: bool,
    /// Capacity of the inbound and every sink queue. Zero is raised to one.
    pub queue_capacity: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        ProcessingSettings {
            extended_values: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ProcessingSettings {
    pub fn capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Counters returned by [`Pipeline::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Measurements taken off the inbound queue
    pub received: u64,
    /// Measurements rejected by the tag policy
    pub filtered: u64,
    /// Successful sends into sink queues, summed over sinks
    pub delivered: u64,
}

pub struct Pipeline {
    settings: ProcessingSettings,
    policy: TagPolicy,
    tx: mpsc::Sender<Measurement>,
    rx: mpsc::Receiver<Measurement>,
    sinks: Vec<SinkHandle>,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(settings: ProcessingSettings, policy: TagPolicy) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity());
        let (state, _) = watch::channel(PipelineState::Idle);
        Pipeline {
            settings,
            policy,
            tx,
            rx,
            sinks: Vec::new(),
            state,
        }
    }

    /// A sender for a source. The pipeline runs until all of them are dropped.
    pub fn producer(&self) -> mpsc::Sender<Measurement> {
        self.tx.clone()
    }

    /// Add a sink queue. Sinks are fed in the order they are attached.
    pub fn attach_sink(&mut self, sink: SinkHandle) {
        tracing::debug!(sink = sink.name(), "Attached sink");
        self.sinks.push(sink);
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub async fn run(self) -> PipelineStats {
        let Pipeline {
            settings,
            policy,
            tx,
            mut rx,
            sinks,
            state,
        } = self;
        drop(tx);

        state.send_replace(PipelineState::Running);
        tracing::info!(
            sinks = sinks.len(),
            extended_values = settings.extended_values,
            filter_mode = ?policy.mode(),
            "Pipeline running"
        );

        let mut stats = PipelineStats::default();
        let mut open = vec![true; sinks.len()];

        while let Some(mut measurement) = rx.recv().await {
            stats.received += 1;

            if !policy.apply(&mut measurement) {
                tracing::trace!(mac = %measurement.mac, "Dropped by tag policy");
                stats.filtered += 1;
                continue;
            }
            if settings.extended_values {
                calculator::enrich(&mut measurement);
            }

            let measurement = Arc::new(measurement);
            for (sink, open) in sinks.iter().zip(open.iter_mut()) {
                if !*open {
                    continue;
                }
                match sink.sender().send(Arc::clone(&measurement)).await {
                    Ok(()) => stats.delivered += 1,
                    Err(_) => {
                        tracing::warn!(sink = sink.name(), "Sink queue closed, no longer feeding it");
                        *open = false;
                    }
                }
            }
        }

        state.send_replace(PipelineState::Draining);
        tracing::info!(?stats, "Producers stopped, draining sinks");
        for sink in sinks {
            let name = sink.name();
            let sink_stats = sink.close().await;
            tracing::debug!(sink = name, stats = ?sink_stats, "Sink drained");
        }

        state.send_replace(PipelineState::Stopped);
        stats
    }
}
