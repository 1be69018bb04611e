use crate::decoder::{decode_hex, frame_extended, frame_legacy};
use crate::mac_address::MacAddress;
use crate::measurement::{DataFormat, Measurement};
use crate::sinks::{Sink, SinkError};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

pub const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

/// Format 5 advertisement from the RuuviTag protocol documentation.
pub const V5_ADVERTISEMENT: &str =
    "0201061BFF99040512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F";

#[track_caller]
pub fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.unwrap_or_else(|| panic!("expected {expected}, got None"));
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

/// Legacy-framed advertisement bytes around a hex manufacturer payload.
pub fn legacy_advertisement(payload: &str) -> Vec<u8> {
    frame_legacy(&decode_hex(payload).unwrap())
}

/// Extended-framed advertisement bytes around a hex manufacturer payload.
pub fn extended_advertisement(payload: &str) -> Vec<u8> {
    frame_extended(&decode_hex(payload).unwrap())
}

/// `payload` with the hex `bytes` written over it at each byte offset.
pub fn patch_payload(payload: &str, patches: &[(usize, &str)]) -> String {
    let mut hex = payload.to_string();
    for (offset, bytes) in patches {
        hex.replace_range(offset * 2..offset * 2 + bytes.len(), bytes);
    }
    hex
}

/// The decoded form of [`V5_ADVERTISEMENT`], as received from `mac`.
pub fn sample_measurement(mac: MacAddress) -> Measurement {
    let mut m = Measurement::new(DataFormat::V5).with_source(
        mac,
        Some(-70),
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
    );
    m.temperature = Some(24.3);
    m.humidity = Some(53.49);
    m.pressure = Some(100044.0);
    m.acceleration_x = Some(0.004);
    m.acceleration_y = Some(-0.004);
    m.acceleration_z = Some(1.036);
    m.battery_voltage = Some(2.977);
    m.tx_power = Some(4);
    m.movement_counter = Some(66);
    m.measurement_sequence = Some(205);
    m
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<Measurement>,
    flushed: bool,
}

/// Sink that keeps everything it is given. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    recorded: Arc<Mutex<Recorded>>,
    failing: bool,
}

impl RecordingSink {
    /// A sink whose every publish fails.
    pub fn failing() -> Self {
        RecordingSink {
            failing: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<Measurement> {
        self.recorded.lock().unwrap().published.clone()
    }

    pub fn flushed(&self) -> bool {
        self.recorded.lock().unwrap().flushed
    }
}

impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn publish(&mut self, measurement: &Measurement) -> Result<(), SinkError> {
        if self.failing {
            return Err(io::Error::other("recording sink failure").into());
        }
        self.recorded
            .lock()
            .unwrap()
            .published
            .push(measurement.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.recorded.lock().unwrap().flushed = true;
        Ok(())
    }
}
