//! InfluxDB line protocol sink.
//!
//! Writes one line per measurement, suitable for Telegraf's `execd` input or
//! for piping into `influx write`.

use super::{Sink, SinkError};
use crate::measurement::Measurement;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::time::SystemTime;

/// Default measurement name.
pub const DEFAULT_MEASUREMENT: &str = "ruuvi_measurements";

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint<'a> {
    pub measurement: &'a str,
    pub tag_set: BTreeMap<&'a str, &'a str>,
    pub field_set: BTreeMap<&'static str, FieldValue>,
    pub timestamp: SystemTime,
}

/// Escape commas and spaces, plus `=` when `equals` is set.
fn escape(s: &str, equals: bool, fmt: &mut fmt::Formatter) -> fmt::Result {
    for c in s.chars() {
        if c == ',' || c == ' ' || (equals && c == '=') {
            write!(fmt, "\\")?;
        }
        write!(fmt, "{c}")?;
    }
    Ok(())
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in &data_point.tag_set {
        write!(fmt, ",")?;
        escape(key, true, fmt)?;
        write!(fmt, "=")?;
        escape(value, true, fmt)?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (i, (key, value)) in data_point.field_set.iter().enumerate() {
        if i > 0 {
            write!(fmt, ",")?;
        }
        write!(fmt, "{key}={value}")?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let nanos = data_point
        .timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    write!(fmt, " {nanos}")
}

impl fmt::Display for DataPoint<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        escape(self.measurement, false, fmt)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// Writes measurements as InfluxDB line protocol.
///
/// Tags are `dataFormat`, `mac` (colon-free), `name` when the tag has one and
/// any configured additional tags. Absent fields are left out. The timestamp
/// is the receive time, or the publish time when the producer did not supply one.
pub struct InfluxLineSink<W> {
    out: W,
    measurement: String,
    additional_tags: BTreeMap<String, String>,
}

impl InfluxLineSink<io::Stdout> {
    pub fn stdout(measurement: String, additional_tags: BTreeMap<String, String>) -> Self {
        InfluxLineSink::new(io::stdout(), measurement, additional_tags)
    }
}

impl<W: Write> InfluxLineSink<W> {
    pub fn new(out: W, measurement: String, additional_tags: BTreeMap<String, String>) -> Self {
        InfluxLineSink {
            out,
            measurement,
            additional_tags,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn field_set(m: &Measurement) -> BTreeMap<&'static str, FieldValue> {
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, $val:expr, $variant:ident) => {
                if let Some(v) = $val {
                    fields.insert($name, FieldValue::$variant(v.into()));
                }
            };
        }

        add!("temperature", m.temperature, Float);
        add!("humidity", m.humidity, Float);
        add!("pressure", m.pressure, Float);
        add!("accelerationX", m.acceleration_x, Float);
        add!("accelerationY", m.acceleration_y, Float);
        add!("accelerationZ", m.acceleration_z, Float);
        add!("batteryVoltage", m.battery_voltage, Float);
        add!("txPower", m.tx_power, Integer);
        add!("rssi", m.rssi, Integer);
        add!("movementCounter", m.movement_counter, Integer);
        add!("measurementSequenceNumber", m.measurement_sequence, Integer);

        add!("pm10", m.pm1_0, Float);
        add!("pm25", m.pm2_5, Float);
        add!("pm40", m.pm4_0, Float);
        add!("pm100", m.pm10_0, Float);
        add!("co2", m.co2, Float);
        add!("voc", m.voc_index, Float);
        add!("nox", m.nox_index, Float);
        add!("illuminance", m.illuminance, Float);
        add!("soundInstant", m.sound_instant, Float);
        add!("soundAverage", m.sound_average, Float);
        add!("soundPeak", m.sound_peak, Float);

        add!("calibrationInProgress", m.calibration_in_progress, Boolean);
        add!("buttonPressedOnBoot", m.button_pressed_on_boot, Boolean);
        add!("rtcOnBoot", m.rtc_running_on_boot, Boolean);

        add!("accelerationTotal", m.acceleration_total, Float);
        add!("accelerationAngleFromX", m.acceleration_angle_from_x, Float);
        add!("accelerationAngleFromY", m.acceleration_angle_from_y, Float);
        add!("accelerationAngleFromZ", m.acceleration_angle_from_z, Float);
        add!("equilibriumVaporPressure", m.equilibrium_vapor_pressure, Float);
        add!("absoluteHumidity", m.absolute_humidity, Float);
        add!("dewPoint", m.dew_point, Float);
        add!("airDensity", m.air_density, Float);
        add!("airQualityIndex", m.air_quality_index, Float);

        fields
    }

    fn write_line(&mut self, m: &Measurement, now: SystemTime) -> Result<(), SinkError> {
        let field_set = Self::field_set(m);
        if field_set.is_empty() {
            tracing::trace!(mac = %m.mac, "No fields to write");
            return Ok(());
        }

        let data_format = m.data_format.to_string();
        let mac = m.mac.compact();
        let mut tag_set: BTreeMap<&str, &str> = self
            .additional_tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tag_set.insert("dataFormat", &data_format);
        tag_set.insert("mac", &mac);
        if let Some(name) = &m.name {
            tag_set.insert("name", name);
        }

        let point = DataPoint {
            measurement: &self.measurement,
            tag_set,
            field_set,
            timestamp: m.timestamp.unwrap_or(now),
        };
        writeln!(self.out, "{point}")?;
        Ok(())
    }
}

impl<W: Write + Send + 'static> Sink for InfluxLineSink<W> {
    fn name(&self) -> &'static str {
        "influxdb_lines"
    }

    fn publish(&mut self, measurement: &Measurement) -> Result<(), SinkError> {
        self.write_line(measurement, SystemTime::now())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::DataFormat;
    use crate::test_utils::{TEST_MAC, sample_measurement};
    use std::time::Duration;

    fn sink() -> InfluxLineSink<Vec<u8>> {
        InfluxLineSink::new(Vec::new(), DEFAULT_MEASUREMENT.to_string(), BTreeMap::new())
    }

    fn output(sink: InfluxLineSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Float(3.25).to_string(), "3.25");
        assert_eq!(FieldValue::Float(32.0).to_string(), "32");
        assert_eq!(FieldValue::Integer(-40).to_string(), "-40i");
        assert_eq!(FieldValue::Boolean(true).to_string(), "true");
    }

    #[test]
    fn test_data_point_format() {
        let point = DataPoint {
            measurement: "test",
            tag_set: BTreeMap::from([("name", "test"), ("test", "true")]),
            field_set: BTreeMap::from([
                ("temperature", FieldValue::Float(32.0)),
                ("humidity", FieldValue::Float(0.2)),
                ("rssi", FieldValue::Integer(-70)),
            ]),
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000),
        };

        assert_eq!(
            point.to_string(),
            "test,name=test,test=true humidity=0.2,rssi=-70i,temperature=32 1000000000000000000"
        );
    }

    #[test]
    fn test_data_point_escaping() {
        let point = DataPoint {
            measurement: "ruuvi data,v2",
            tag_set: BTreeMap::from([("location name", "Living Room=1,2")]),
            field_set: BTreeMap::from([("temperature", FieldValue::Float(1.5))]),
            timestamp: SystemTime::UNIX_EPOCH,
        };

        assert_eq!(
            point.to_string(),
            "ruuvi\\ data\\,v2,location\\ name=Living\\ Room\\=1\\,2 temperature=1.5 0"
        );
    }

    #[test]
    fn test_measurement_line() {
        let mut sink = sink();
        let mut m = sample_measurement(TEST_MAC);
        m.name = Some("Sauna".to_string());
        sink.publish(&m).unwrap();

        let out = output(sink);
        assert!(out.starts_with("ruuvi_measurements,dataFormat=5,mac=AABBCCDDEEFF,name=Sauna "));
        assert!(out.contains("temperature=24.3"));
        assert!(out.contains("humidity=53.49"));
        assert!(out.contains("pressure=100044"));
        assert!(out.contains("batteryVoltage=2.977"));
        assert!(out.contains("txPower=4i"));
        assert!(out.contains("rssi=-70i"));
        assert!(out.contains("movementCounter=66i"));
        assert!(out.contains("measurementSequenceNumber=205i"));
        assert!(!out.contains("pm25="));
        assert!(out.ends_with(" 1700000000000000000\n"));
    }

    #[test]
    fn test_additional_tags_and_e1_fields() {
        let mut sink = InfluxLineSink::new(
            Vec::new(),
            "air".to_string(),
            BTreeMap::from([("site".to_string(), "home".to_string())]),
        );
        let mut m = Measurement::new(DataFormat::E1).with_source(
            TEST_MAC,
            None,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1)),
        );
        m.pm2_5 = Some(11.2);
        m.co2 = Some(201.0);
        m.rtc_running_on_boot = Some(false);
        sink.publish(&m).unwrap();

        assert_eq!(
            output(sink),
            "air,dataFormat=E1,mac=AABBCCDDEEFF,site=home co2=201,pm25=11.2,rtcOnBoot=false 1000000000\n"
        );
    }

    #[test]
    fn test_missing_timestamp_uses_publish_time() {
        let mut sink = sink();
        let mut m = Measurement::new(DataFormat::V5).with_source(TEST_MAC, None, None);
        m.temperature = Some(20.0);
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        sink.write_line(&m, now).unwrap();

        assert!(output(sink).ends_with(" 42000000000\n"));
    }

    #[test]
    fn test_measurement_without_fields_is_skipped() {
        let mut sink = sink();
        sink.publish(&Measurement::new(DataFormat::V6)).unwrap();
        assert!(output(sink).is_empty());
    }
}
