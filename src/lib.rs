//! `ruuvi-bridge` library.
//!
//! Decodes RuuviTag broadcasts, applies tag naming and filtering, optionally
//! adds calculated values and fans the result out to publishing sinks.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The wiring lives in [`crate::app`] where it can be tested with injected
//! sources and sinks.

pub mod app;
pub mod calculator;
pub mod config;
pub mod decoder;
pub mod limiter;
pub mod logging;
pub mod mac_address;
pub mod measurement;
pub mod pipeline;
pub mod policy;
pub mod sinks;
pub mod sources;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use decoder::{DecodeError, FormatError, decode, decode_as};
pub use limiter::{RateLimiter, parse_duration};
pub use mac_address::MacAddress;
pub use measurement::{DataFormat, Measurement};
pub use pipeline::{Pipeline, PipelineState, PipelineStats, ProcessingSettings};
pub use policy::{FilterMode, TagPolicy};
pub use sinks::{Sink, SinkHandle};
pub use sources::{Source, SourceHandle};
