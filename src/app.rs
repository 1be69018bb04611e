//! Core application runner for `ruuvi-bridge`.
//!
//! Builds sources, sinks and the pipeline from a [`Config`] and runs them until
//! shutdown. Kept apart from CLI parsing and process exit codes so it can be
//! tested with injected sources and sinks.

use crate::config::{
    Config, ConfigError, DebugSinkConfig, GatewayPollingConfig, HciScannerConfig,
    InfluxLinesConfig, active,
};
use crate::logging::{self, LoggingError};
use crate::pipeline::{Pipeline, PipelineStats, ProcessingSettings};
use crate::policy::{PolicyError, TagName, TagPolicy, parse_tag_name};
use crate::sinks::influxdb::DEFAULT_MEASUREMENT;
use crate::sinks::{self, DebugSink, InfluxLineSink, SinkHandle};
use crate::sources::{Source, SourceError, SourceHandle};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = crate::config::DEFAULT_PATH)]
    pub config: PathBuf,

    /// Log everything at trace level, including undecodable advertisements.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Name a tag, taking precedence over the configuration file.
    /// Format: --tag-name DE:AD:BE:EF:00:00=Sauna
    #[arg(long = "tag-name", value_parser = parse_tag_name, value_name = "MAC=NAME")]
    pub tag_names: Vec<TagName>,
}

/// Errors returned by the application runner.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("invalid processing configuration: {0}")]
    Policy(#[from] PolicyError),
    #[error("failed to start source: {0}")]
    Source(#[from] SourceError),
    #[error("no sources enabled in the configuration")]
    NoSources,
    #[error("pipeline task failed: {0}")]
    Pipeline(#[from] JoinError),
}

#[cfg(feature = "gateway")]
fn gateway_source(config: &GatewayPollingConfig) -> Result<Box<dyn Source>, SourceError> {
    if config.gateway_url.is_empty() {
        return Err(SourceError::Config(
            "gateway_polling.gateway_url is required".to_string(),
        ));
    }
    Ok(Box::new(crate::sources::GatewayPollingSource::new(
        &config.gateway_url,
        config.bearer_token.clone(),
        config.interval,
    )))
}

#[cfg(not(feature = "gateway"))]
fn gateway_source(_: &GatewayPollingConfig) -> Result<Box<dyn Source>, SourceError> {
    Err(SourceError::Config(
        "gateway_polling needs the `gateway` feature".to_string(),
    ))
}

#[cfg(feature = "hci")]
fn hci_source(config: &HciScannerConfig) -> Result<Box<dyn Source>, SourceError> {
    Ok(Box::new(crate::sources::HciScannerSource::new(config.device)))
}

#[cfg(not(feature = "hci"))]
fn hci_source(_: &HciScannerConfig) -> Result<Box<dyn Source>, SourceError> {
    Err(SourceError::Config(
        "hci_scanner needs the `hci` feature".to_string(),
    ))
}

/// The sources enabled in `config`, not yet started.
pub fn configured_sources(config: &Config) -> Result<Vec<Box<dyn Source>>, SourceError> {
    let mut sources = Vec::new();
    if let Some(gateway) = active(&config.gateway_polling, GatewayPollingConfig::is_enabled) {
        sources.push(gateway_source(gateway)?);
    }
    if let Some(hci) = active(&config.hci_scanner, HciScannerConfig::is_enabled) {
        sources.push(hci_source(hci)?);
    }
    Ok(sources)
}

/// Start a task for every sink enabled in `config`. Must be called within a
/// Tokio runtime.
pub fn spawn_configured_sinks(config: &Config) -> Vec<SinkHandle> {
    let capacity = config.settings().capacity();
    let mut handles = Vec::new();

    if let Some(influx) = active(&config.influxdb_lines, InfluxLinesConfig::is_enabled) {
        let measurement = influx
            .measurement
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MEASUREMENT.to_string());
        let sink = InfluxLineSink::stdout(measurement, influx.additional_tags.clone());
        handles.push(sinks::spawn(sink, capacity, influx.minimum_interval));
    }
    if let Some(debug) = active(&config.debug, DebugSinkConfig::is_enabled) {
        handles.push(sinks::spawn(
            DebugSink::stdout(),
            capacity,
            debug.minimum_interval,
        ));
    }
    handles
}

async fn stop_all(handles: Vec<SourceHandle>) {
    for handle in handles {
        handle.stop().await;
    }
}

/// Run the pipeline with the given sources and sinks until `shutdown`
/// resolves or every source has ended on its own.
///
/// On shutdown the sources are stopped first; the pipeline then drains what
/// they already produced into the sinks before returning.
pub async fn run_until(
    settings: ProcessingSettings,
    policy: TagPolicy,
    sources: Vec<Box<dyn Source>>,
    sinks: Vec<SinkHandle>,
    shutdown: impl Future<Output = ()>,
) -> Result<PipelineStats, RunError> {
    if sources.is_empty() {
        return Err(RunError::NoSources);
    }
    if sinks.is_empty() {
        tracing::warn!("No sinks enabled, measurements will be discarded");
    }

    let mut pipeline = Pipeline::new(settings, policy);
    for sink in sinks {
        pipeline.attach_sink(sink);
    }

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source.name();
        match source.start(pipeline.producer()) {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                tracing::error!(source = name, %error, "Failed to start source");
                stop_all(handles).await;
                // Dropping the pipeline closes the sink queues.
                return Err(error.into());
            }
        }
    }

    let mut pipeline_task = tokio::spawn(pipeline.run());
    tokio::pin!(shutdown);

    let finished = tokio::select! {
        () = &mut shutdown => {
            tracing::info!("Shutdown requested, stopping sources");
            None
        }
        joined = &mut pipeline_task => {
            tracing::info!("All sources ended");
            Some(joined)
        }
    };

    stop_all(handles).await;
    let stats = match finished {
        Some(joined) => joined?,
        None => pipeline_task.await?,
    };
    tracing::info!(?stats, "Pipeline stopped");
    Ok(stats)
}

/// Load the configuration, set up logging and run until `shutdown`.
pub async fn run(
    options: Options,
    shutdown: impl Future<Output = ()>,
) -> Result<PipelineStats, RunError> {
    let mut config = Config::load(&options.config)?;
    if options.verbose {
        config.logging.level = "trace".to_string();
    }
    logging::init(&config.logging)?;
    tracing::info!(config = %options.config.display(), "Loaded configuration");

    let policy = config.policy(&options.tag_names)?;
    let sources = configured_sources(&config)?;
    if sources.is_empty() {
        return Err(RunError::NoSources);
    }
    let sinks = spawn_configured_sinks(&config);

    run_until(config.settings(), policy, sources, sinks, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use crate::policy::{FilterMode, NameTable};
    use crate::sources::forward;
    use crate::test_utils::{OTHER_MAC, RecordingSink, TEST_MAC, V5_ADVERTISEMENT};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Source replaying a fixed list of advertisements.
    #[derive(Debug, Default)]
    struct FakeSource {
        advertisements: Vec<&'static str>,
        wait_for_stop: bool,
        fail: bool,
        stopped: Arc<AtomicBool>,
    }

    impl FakeSource {
        fn replaying(advertisements: Vec<&'static str>) -> Self {
            FakeSource {
                advertisements,
                ..Default::default()
            }
        }
    }

    impl Source for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn start(
            self: Box<Self>,
            tx: mpsc::Sender<Measurement>,
        ) -> Result<SourceHandle, SourceError> {
            let FakeSource {
                advertisements,
                wait_for_stop,
                fail,
                stopped,
            } = *self;
            if fail {
                return Err(SourceError::Config("broken".to_string()));
            }
            Ok(SourceHandle::spawn("fake", move |stop| async move {
                for raw in advertisements {
                    forward(&tx, raw, TEST_MAC, Some(-60), None).await;
                }
                if wait_for_stop {
                    let _ = stop.await;
                }
                stopped.store(true, Ordering::SeqCst);
            }))
        }
    }

    fn named_policy() -> TagPolicy {
        let names = NameTable::from([(TEST_MAC, "Sauna".to_string())]);
        TagPolicy::new(FilterMode::None, [OTHER_MAC], names).unwrap()
    }

    #[tokio::test]
    async fn run_ends_when_sources_end() {
        let sink = RecordingSink::default();
        let source = FakeSource::replaying(vec![V5_ADVERTISEMENT, "not hex", V5_ADVERTISEMENT]);

        let stats = run_until(
            ProcessingSettings::default(),
            named_policy(),
            vec![Box::new(source)],
            vec![sinks::spawn(sink.clone(), 8, Duration::ZERO)],
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(stats.delivered, 2);
        let published = sink.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].name.as_deref(), Some("Sauna"));
        assert_eq!(published[0].rssi, Some(-60));
        assert!(published[0].acceleration_total.is_some());
        assert!(sink.flushed());
    }

    #[tokio::test]
    async fn shutdown_stops_sources_and_drains() {
        let sink = RecordingSink::default();
        let stopped = Arc::new(AtomicBool::new(false));
        let source = FakeSource {
            advertisements: vec![V5_ADVERTISEMENT],
            wait_for_stop: true,
            stopped: Arc::clone(&stopped),
            ..Default::default()
        };
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let run = tokio::spawn(run_until(
            ProcessingSettings::default(),
            TagPolicy::default(),
            vec![Box::new(source)],
            vec![sinks::spawn(sink.clone(), 8, Duration::ZERO)],
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        tokio::task::yield_now().await;
        assert!(!stopped.load(Ordering::SeqCst));
        shutdown_tx.send(()).unwrap();

        let stats = run.await.unwrap().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(stats.received, 1);
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn failing_source_stops_started_ones() {
        let stopped = Arc::new(AtomicBool::new(false));
        let running = FakeSource {
            wait_for_stop: true,
            stopped: Arc::clone(&stopped),
            ..Default::default()
        };
        let broken = FakeSource {
            fail: true,
            ..Default::default()
        };

        let result = run_until(
            ProcessingSettings::default(),
            TagPolicy::default(),
            vec![Box::new(running), Box::new(broken)],
            Vec::new(),
            std::future::pending(),
        )
        .await;

        assert!(matches!(result, Err(RunError::Source(SourceError::Config(_)))));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_sources_is_an_error() {
        let result = run_until(
            ProcessingSettings::default(),
            TagPolicy::default(),
            Vec::new(),
            Vec::new(),
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(RunError::NoSources)));
    }

    #[test]
    fn sources_from_config() {
        let config = Config::parse("hci_scanner:\n  enabled: false\n").unwrap();
        assert!(configured_sources(&config).unwrap().is_empty());

        let config = Config::parse("gateway_polling:\n  interval: 5s\n").unwrap();
        assert!(matches!(
            configured_sources(&config),
            Err(SourceError::Config(_))
        ));
    }

    #[cfg(feature = "gateway")]
    #[test]
    fn gateway_source_from_config() {
        let config = Config::parse("gateway_polling:\n  gateway_url: http://10.0.0.21\n").unwrap();
        let sources = configured_sources(&config).unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["gateway_polling"]);
    }

    #[tokio::test]
    async fn sinks_from_config() {
        let config = Config::parse("debug:\ninfluxdb_lines:\n  measurement: \"\"\n").unwrap();
        let handles = spawn_configured_sinks(&config);
        let names: Vec<_> = handles.iter().map(SinkHandle::name).collect();
        assert_eq!(names, vec!["influxdb_lines", "debug"]);
        for handle in handles {
            handle.close().await;
        }

        let config = Config::parse("debug:\n  enabled: false\n").unwrap();
        assert!(spawn_configured_sinks(&config).is_empty());
    }

    #[test]
    fn options_parse_tag_names() {
        let options = Options::try_parse_from([
            "ruuvi-bridge",
            "--config",
            "/etc/ruuvi-bridge.yml",
            "-v",
            "--tag-name",
            "AA:BB:CC:DD:EE:FF=Sauna",
        ])
        .unwrap();
        assert_eq!(options.config, PathBuf::from("/etc/ruuvi-bridge.yml"));
        assert!(options.verbose);
        assert_eq!(options.tag_names[0].mac, TEST_MAC);
        assert_eq!(options.tag_names[0].name, "Sauna");

        let defaults = Options::try_parse_from(["ruuvi-bridge"]).unwrap();
        assert_eq!(defaults.config, PathBuf::from(crate::config::DEFAULT_PATH));
        assert!(defaults.tag_names.is_empty());

        assert!(Options::try_parse_from(["ruuvi-bridge", "--tag-name", "nope"]).is_err());
    }
}
