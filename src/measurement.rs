//! RuuviTag measurement data structure.

use crate::mac_address::MacAddress;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire format that produced a measurement, identified by its discriminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// Legacy "RAWv1" format
    V3,
    /// "RAWv2" format
    V5,
    /// Compact air quality format
    V6,
    /// Extended air quality format
    E1,
}

impl DataFormat {
    /// The byte that follows the company identifier in the advertisement.
    pub const fn discriminator(self) -> u8 {
        match self {
            DataFormat::V3 => 0x03,
            DataFormat::V5 => 0x05,
            DataFormat::V6 => 0x06,
            DataFormat::E1 => 0xE1,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.discriminator())
    }
}

impl Serialize for DataFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.discriminator())
    }
}

/// A measurement from a RuuviTag sensor.
///
/// Every sensor value is independently optional: a format that cannot express a
/// field leaves it `None`, and so does a field carrying its format's "not
/// available" bit pattern. The calculated group is only ever filled in by
/// [`crate::calculator::enrich`].
///
/// Units:
/// - Temperature and dew point in Celsius
/// - Humidity in percent (0-100), absolute humidity in g/m3
/// - Pressure and vapor pressure in Pascals
/// - Battery voltage in Volts
/// - TX power and RSSI in dBm
/// - Acceleration in g (standard gravity), angles in degrees
/// - Particulate matter in ug/m3, CO2 in ppm, illuminance in lux
/// - Sound levels in dBA, air density in kg/m3
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    // Identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub mac: MacAddress,
    #[serde(
        serialize_with = "serialize_unix_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<SystemTime>,
    #[serde(rename = "data_format")]
    pub data_format: DataFormat,

    // Basic environmental
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_counter: Option<u32>,

    // Air quality
    #[serde(rename = "pm1p0", skip_serializing_if = "Option::is_none")]
    pub pm1_0: Option<f64>,
    #[serde(rename = "pm2p5", skip_serializing_if = "Option::is_none")]
    pub pm2_5: Option<f64>,
    #[serde(rename = "pm4p0", skip_serializing_if = "Option::is_none")]
    pub pm4_0: Option<f64>,
    #[serde(rename = "pm10p0", skip_serializing_if = "Option::is_none")]
    pub pm10_0: Option<f64>,
    #[serde(rename = "co2", skip_serializing_if = "Option::is_none")]
    pub co2: Option<f64>,
    #[serde(rename = "voc", skip_serializing_if = "Option::is_none")]
    pub voc_index: Option<f64>,
    #[serde(rename = "nox", skip_serializing_if = "Option::is_none")]
    pub nox_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub illuminance: Option<f64>,

    // Diagnostics
    #[serde(
        rename = "measurementSequenceNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub measurement_sequence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_in_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_pressed_on_boot: Option<bool>,
    #[serde(rename = "rtcOnBoot", skip_serializing_if = "Option::is_none")]
    pub rtc_running_on_boot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_instant: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_peak: Option<f64>,

    // Calculated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_angle_from_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_angle_from_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_angle_from_z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equilibrium_vapor_pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_density: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_quality_index: Option<f64>,
}

impl Measurement {
    /// Create an empty measurement for the given wire format.
    ///
    /// The MAC address starts zeroed; producers fill it in together with the
    /// rest of the radio metadata via [`Measurement::with_source`].
    pub fn new(data_format: DataFormat) -> Self {
        Measurement {
            name: None,
            mac: MacAddress::default(),
            timestamp: None,
            data_format,
            temperature: None,
            humidity: None,
            pressure: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            battery_voltage: None,
            tx_power: None,
            rssi: None,
            movement_counter: None,
            pm1_0: None,
            pm2_5: None,
            pm4_0: None,
            pm10_0: None,
            co2: None,
            voc_index: None,
            nox_index: None,
            illuminance: None,
            measurement_sequence: None,
            calibration_in_progress: None,
            button_pressed_on_boot: None,
            rtc_running_on_boot: None,
            sound_instant: None,
            sound_average: None,
            sound_peak: None,
            acceleration_total: None,
            acceleration_angle_from_x: None,
            acceleration_angle_from_y: None,
            acceleration_angle_from_z: None,
            equilibrium_vapor_pressure: None,
            absolute_humidity: None,
            dew_point: None,
            air_density: None,
            air_quality_index: None,
        }
    }

    /// Attach the radio metadata a producer knows about the advertisement.
    pub fn with_source(
        mut self,
        mac: MacAddress,
        rssi: Option<i16>,
        timestamp: Option<SystemTime>,
    ) -> Self {
        self.mac = mac;
        self.rssi = rssi;
        self.timestamp = timestamp;
        self
    }
}

fn serialize_unix_seconds<S: Serializer>(
    timestamp: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let secs = timestamp
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    serializer.serialize_u64(secs)
}
