//! Tag naming and filtering.
//!
//! A [`TagPolicy`] is built once at startup from the configuration's name table
//! and filter settings, then consulted for every measurement. Misconfigured
//! filters are rejected up front rather than silently dropping or passing
//! everything at runtime.

use crate::mac_address::{MacAddress, ParseMacError};
use crate::measurement::Measurement;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Human-readable names keyed by tag MAC address.
pub type NameTable = BTreeMap<MacAddress, String>;

/// Which tags are let through to the sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Pass every tag
    #[default]
    None,
    /// Pass only tags in the filter list
    Allowlist,
    /// Pass every tag except those in the filter list
    Denylist,
    /// Pass only tags that have a name
    Named,
}

/// Errors detected while building a [`TagPolicy`].
#[derive(Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("filter mode {0:?} requires a non-empty filter list")]
    EmptyFilterList(FilterMode),
    #[error("filter mode named requires at least one tag name")]
    EmptyNameTable,
}

/// Static naming and filtering rules.
#[derive(Debug, Clone, Default)]
pub struct TagPolicy {
    mode: FilterMode,
    filter: HashSet<MacAddress>,
    names: NameTable,
}

impl TagPolicy {
    pub fn new(
        mode: FilterMode,
        filter_list: impl IntoIterator<Item = MacAddress>,
        names: NameTable,
    ) -> Result<Self, PolicyError> {
        let filter: HashSet<MacAddress> = filter_list.into_iter().collect();
        match mode {
            FilterMode::Allowlist | FilterMode::Denylist if filter.is_empty() => {
                return Err(PolicyError::EmptyFilterList(mode));
            }
            FilterMode::Named if names.is_empty() => return Err(PolicyError::EmptyNameTable),
            _ => {}
        }
        Ok(TagPolicy {
            mode,
            filter,
            names,
        })
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Whether measurements from `mac` should reach the sinks.
    pub fn admits(&self, mac: &MacAddress) -> bool {
        match self.mode {
            FilterMode::None => true,
            FilterMode::Allowlist => self.filter.contains(mac),
            FilterMode::Denylist => !self.filter.contains(mac),
            FilterMode::Named => self.names.contains_key(mac),
        }
    }

    pub fn name_of(&self, mac: &MacAddress) -> Option<&str> {
        self.names.get(mac).map(String::as_str)
    }

    /// Assign the configured name (if any) and report whether the measurement
    /// is admitted.
    pub fn apply(&self, m: &mut Measurement) -> bool {
        if let Some(name) = self.name_of(&m.mac) {
            m.name = Some(name.to_owned());
        }
        self.admits(&m.mac)
    }
}

/// A `MAC=NAME` pair given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct TagName {
    pub mac: MacAddress,
    pub name: String,
}

/// Errors returned by [`parse_tag_name`].
#[derive(Error, Debug, PartialEq)]
pub enum ParseTagNameError {
    #[error("invalid tag name: expected format MAC=NAME")]
    MissingSeparator,
    #[error("invalid tag name: name is empty")]
    EmptyName,
    #[error(transparent)]
    Mac(#[from] ParseMacError),
}

/// Parse a tag name from a string in the format `MAC=NAME`.
///
/// ```
/// use ruuvi_bridge::policy::parse_tag_name;
///
/// let tag = parse_tag_name("AA:BB:CC:DD:EE:FF=Kitchen").unwrap();
/// assert_eq!(tag.mac.compact(), "AABBCCDDEEFF");
/// assert_eq!(tag.name, "Kitchen");
/// ```
pub fn parse_tag_name(src: &str) -> Result<TagName, ParseTagNameError> {
    let (mac, name) = src
        .split_once('=')
        .ok_or(ParseTagNameError::MissingSeparator)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ParseTagNameError::EmptyName);
    }
    Ok(TagName {
        mac: mac.parse()?,
        name: name.to_owned(),
    })
}

/// Merge command line names over a configured table.
pub fn merge_names(mut names: NameTable, overrides: &[TagName]) -> NameTable {
    for tag in overrides {
        names.insert(tag.mac, tag.name.clone());
    }
    names
}
