//! Polling source for a Ruuvi Gateway's local `/history` endpoint.

use super::{Forwarded, Source, SourceError, SourceHandle, forward};
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};

/// Default time between polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct History {
    data: HistoryData,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    tags: HashMap<String, HistoryTag>,
}

#[derive(Debug, Deserialize)]
struct HistoryTag {
    rssi: Option<i16>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    timestamp: u64,
    data: String,
}

/// The gateway reports timestamps as a string of unix seconds; some firmware
/// versions use a plain number.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => Ok(s.trim().parse().unwrap_or(0)),
    }
}

/// One advertisement picked out of a history response.
#[derive(Debug, PartialEq)]
struct Sighting {
    mac: MacAddress,
    rssi: Option<i16>,
    timestamp: u64,
    data: String,
}

impl Sighting {
    /// The gateway's receive time, or `None` when the reported seconds do not
    /// fit a `SystemTime`.
    fn received_at(&self) -> Option<SystemTime> {
        let received_at = UNIX_EPOCH.checked_add(Duration::from_secs(self.timestamp));
        if received_at.is_none() {
            tracing::debug!(
                mac = %self.mac,
                timestamp = self.timestamp,
                "Gateway timestamp out of range, forwarding without it"
            );
        }
        received_at
    }
}

/// Tracks the last timestamp seen per tag so repeated polls do not forward
/// the same advertisement twice. Owned by the polling task.
#[derive(Debug, Default)]
struct SeenTags(HashMap<MacAddress, u64>);

impl SeenTags {
    /// Extract the sightings of `history` not already seen.
    fn fresh(&mut self, history: History) -> Vec<Sighting> {
        let mut sightings = Vec::new();
        for (mac, tag) in history.data.tags {
            let mac: MacAddress = match mac.parse() {
                Ok(mac) => mac,
                Err(error) => {
                    tracing::debug!(mac = %mac, %error, "Ignoring tag with invalid MAC address");
                    continue;
                }
            };
            if self.0.insert(mac, tag.timestamp) == Some(tag.timestamp) {
                continue;
            }
            sightings.push(Sighting {
                mac,
                rssi: tag.rssi,
                timestamp: tag.timestamp,
                data: tag.data,
            });
        }
        sightings
    }
}

/// Polls `<gateway_url>/history` on a fixed interval.
#[derive(Debug, Clone)]
pub struct GatewayPollingSource {
    url: String,
    bearer_token: Option<String>,
    interval: Duration,
}

impl GatewayPollingSource {
    pub fn new(gateway_url: &str, bearer_token: Option<String>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        GatewayPollingSource {
            url: format!("{}/history", gateway_url.trim_end_matches('/')),
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
            interval,
        }
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<History, reqwest::Error> {
        let mut request = client.get(&self.url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?.json().await
    }

    /// Fetch the history once and forward every fresh sighting. Breaks when
    /// the pipeline has gone away.
    async fn poll(
        &self,
        client: &reqwest::Client,
        seen: &mut SeenTags,
        tx: &mpsc::Sender<Measurement>,
    ) -> ControlFlow<()> {
        let history = match self.fetch(client).await {
            Ok(history) => history,
            Err(error) => {
                tracing::error!(url = %self.url, %error, "Failed to poll gateway");
                return ControlFlow::Continue(());
            }
        };

        for sighting in seen.fresh(history) {
            let forwarded = forward(
                tx,
                &sighting.data,
                sighting.mac,
                sighting.rssi,
                sighting.received_at(),
            )
            .await;
            if forwarded == Forwarded::Closed {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn run(
        self,
        client: reqwest::Client,
        tx: mpsc::Sender<Measurement>,
        mut stopped: oneshot::Receiver<()>,
    ) {
        let mut seen = SeenTags::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    let started = Instant::now();
                    if self.poll(&client, &mut seen, &tx).await.is_break() {
                        break;
                    }
                    tracing::trace!(url = %self.url, elapsed = ?started.elapsed(), "Polled gateway");
                }
            }
        }
    }
}

impl Source for GatewayPollingSource {
    fn name(&self) -> &'static str {
        "gateway_polling"
    }

    fn start(self: Box<Self>, tx: mpsc::Sender<Measurement>) -> Result<SourceHandle, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        tracing::info!(url = %self.url, interval = ?self.interval, "Starting gateway polling");
        let source = *self;
        Ok(SourceHandle::spawn("gateway_polling", move |stopped| {
            source.run(client, tx, stopped)
        }))
    }
}
