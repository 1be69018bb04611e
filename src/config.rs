//! YAML configuration file.
//!
//! Every section is optional. A source or sink section that is present turns
//! that component on unless it says `enabled: false`; an empty section
//! (`debug:`) counts as present. `debug` also takes a plain `true`/`false`.

use crate::limiter::deserialize_duration;
use crate::logging::LoggingConfig;
use crate::mac_address::MacAddress;
use crate::pipeline::{DEFAULT_QUEUE_CAPACITY, ProcessingSettings};
use crate::policy::{FilterMode, NameTable, PolicyError, TagName, TagPolicy, merge_names};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_PATH: &str = "./config.yml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no config found, tried to open {0:?}")]
    NotFound(PathBuf),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processing: ProcessingConfig,
    pub tag_names: NameTable,
    #[serde(deserialize_with = "present")]
    pub gateway_polling: Option<GatewayPollingConfig>,
    #[serde(deserialize_with = "present")]
    pub hci_scanner: Option<HciScannerConfig>,
    #[serde(deserialize_with = "present")]
    pub influxdb_lines: Option<InfluxLinesConfig>,
    #[serde(deserialize_with = "debug_section")]
    pub debug: Option<DebugSinkConfig>,
    pub logging: LoggingConfig,
}

/// A key that is present maps to `Some`, even with an empty value.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?.unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DebugToggle {
    Flag(bool),
    Section(DebugSinkConfig),
}

/// `debug` as either a bare flag or a full section.
fn debug_section<'de, D>(deserializer: D) -> Result<Option<DebugSinkConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let section = match Option::<DebugToggle>::deserialize(deserializer)? {
        Some(DebugToggle::Flag(enabled)) => DebugSinkConfig {
            enabled: Some(enabled),
            ..DebugSinkConfig::default()
        },
        Some(DebugToggle::Section(section)) => section,
        None => DebugSinkConfig::default(),
    };
    Ok(Some(section))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub extended_values: bool,
    pub filter_mode: FilterMode,
    pub filter_list: Vec<MacAddress>,
    pub queue_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            extended_values: true,
            filter_mode: FilterMode::None,
            filter_list: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayPollingConfig {
    pub enabled: Option<bool>,
    pub gateway_url: String,
    pub bearer_token: Option<String>,
    /// Zero means the source's default.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HciScannerConfig {
    pub enabled: Option<bool>,
    /// Controller index, `0` for `hci0`.
    pub device: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InfluxLinesConfig {
    pub enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub minimum_interval: Duration,
    pub measurement: Option<String>,
    pub additional_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DebugSinkConfig {
    pub enabled: Option<bool>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub minimum_interval: Duration,
}

macro_rules! section_toggle {
    ($($section:ty),*) => {
        $(
            impl $section {
                pub fn is_enabled(&self) -> bool {
                    self.enabled.unwrap_or(true)
                }
            }
        )*
    };
}

section_toggle!(
    GatewayPollingConfig,
    HciScannerConfig,
    InfluxLinesConfig,
    DebugSinkConfig
);

/// The section when it is present and not switched off.
pub fn active<T>(section: &Option<T>, is_enabled: impl Fn(&T) -> bool) -> Option<&T> {
    section.as_ref().filter(|s| is_enabled(s))
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn settings(&self) -> ProcessingSettings {
        ProcessingSettings {
            extended_values: self.processing.extended_values,
            queue_capacity: self.processing.queue_capacity,
        }
    }

    /// Build the tag policy, with `overrides` taking precedence over the
    /// configured names.
    pub fn policy(&self, overrides: &[TagName]) -> Result<TagPolicy, PolicyError> {
        TagPolicy::new(
            self.processing.filter_mode,
            self.processing.filter_list.iter().copied(),
            merge_names(self.tag_names.clone(), overrides),
        )
    }
}
