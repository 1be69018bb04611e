//! Data format 3 ("RAWv1").
//!
//! | Offset | Field                                         |
//! |--------|-----------------------------------------------|
//! | 0      | Format (0x03)                                 |
//! | 1      | Humidity, 0.5 % steps                         |
//! | 2      | Temperature, sign bit + whole degrees         |
//! | 3      | Temperature fraction, 1/100 degrees           |
//! | 4-5    | Pressure, Pa offset by -50000                 |
//! | 6-11   | Acceleration X/Y/Z, mG                        |
//! | 12-13  | Battery voltage, mV                           |
//!
//! The format has no "not available" patterns; every field is always present.

use super::{Framing, FormatError, be_i16, be_u16, manufacturer_payload};
use crate::measurement::{DataFormat, Measurement};

const MIN_LEN: usize = 21;

pub(super) fn decode(data: &[u8]) -> Result<Measurement, FormatError> {
    let payload = manufacturer_payload(data, Framing::Legacy, MIN_LEN, DataFormat::V3)?;

    let mut m = Measurement::new(DataFormat::V3);
    m.humidity = Some(f64::from(payload[1]) / 2.0);
    m.temperature = Some(temperature(payload[2], payload[3]));
    m.pressure = Some(f64::from(be_u16(payload, 4)) + 50_000.0);
    m.acceleration_x = Some(f64::from(be_i16(payload, 6)) / 1000.0);
    m.acceleration_y = Some(f64::from(be_i16(payload, 8)) / 1000.0);
    m.acceleration_z = Some(f64::from(be_i16(payload, 10)) / 1000.0);
    m.battery_voltage = Some(f64::from(be_u16(payload, 12)) / 1000.0);
    Ok(m)
}

/// Sign-magnitude temperature: bit 7 of `whole` is the sign.
fn temperature(whole: u8, fraction: u8) -> f64 {
    let magnitude = f64::from(whole & 0x7F) + f64::from(fraction) / 100.0;
    if whole & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}
