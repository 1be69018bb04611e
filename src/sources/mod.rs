//! Producers of decoded measurements.
//!
//! A source owns whatever transport it listens on, runs the [`decoder`] on
//! each raw advertisement, attaches the radio metadata it knows (MAC address,
//! RSSI, receive time) and pushes the result into the pipeline. Sources stop
//! cooperatively: [`SourceHandle::stop`] closes the source's stop channel and
//! waits for its task to wind down.
//!
//! [`decoder`]: crate::decoder

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "hci")]
pub mod hci;

use crate::decoder;
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use std::future::Future;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[cfg(feature = "gateway")]
pub use gateway::GatewayPollingSource;
#[cfg(feature = "hci")]
pub use hci::HciScannerSource;

/// Errors raised while starting a source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// HTTP client could not be created
    #[cfg(feature = "gateway")]
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid source configuration: {0}")]
    Config(String),
}

/// A producer feeding the pipeline.
pub trait Source: Send {
    fn name(&self) -> &'static str;

    /// Start producing into `tx`. The source runs until stopped through the
    /// returned handle, or until the pipeline goes away.
    fn start(self: Box<Self>, tx: mpsc::Sender<Measurement>) -> Result<SourceHandle, SourceError>;
}

/// A running source.
#[derive(Debug)]
pub struct SourceHandle {
    name: &'static str,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SourceHandle {
    /// Run `body` as the source's task. `body` receives the stop signal, which
    /// resolves once [`SourceHandle::stop`] is called.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> SourceHandle
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(body(stopped));
        tracing::info!(source = name, "Started source");
        SourceHandle { name, stop, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the source to stop and wait for it to finish.
    pub async fn stop(self) {
        let SourceHandle { name, stop, task } = self;
        drop(stop);
        if let Err(error) = task.await {
            tracing::error!(source = name, %error, "Source task failed");
        }
        tracing::info!(source = name, "Stopped source");
    }
}

/// Outcome of [`forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Sent,
    Undecodable,
    /// The pipeline has shut down; the source should stop.
    Closed,
}

/// Decode `raw`, attach the radio metadata and send it into the pipeline.
///
/// Undecodable input is expected traffic and only logged at trace level by
/// the decoder.
pub async fn forward(
    tx: &mpsc::Sender<Measurement>,
    raw: &str,
    mac: MacAddress,
    rssi: Option<i16>,
    timestamp: Option<SystemTime>,
) -> Forwarded {
    let Ok(measurement) = decoder::decode(raw) else {
        return Forwarded::Undecodable;
    };
    match tx.send(measurement.with_source(mac, rssi, timestamp)).await {
        Ok(()) => Forwarded::Sent,
        Err(_) => Forwarded::Closed,
    }
}
