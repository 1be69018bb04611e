//! Data format 6, the compact air quality format.
//!
//! | Offset | Field                                   | Not available |
//! |--------|-----------------------------------------|---------------|
//! | 0      | Format (0x06)                           |               |
//! | 1-2    | Temperature, 0.005 degrees              | 0x8000        |
//! | 3-4    | Humidity, 0.0025 %                      | 0xFFFF        |
//! | 5-6    | Pressure, Pa offset by -50000           | 0xFFFF        |
//! | 7-8    | PM2.5, 0.1 ug/m3                        | 0xFFFF        |
//! | 9-10   | CO2, ppm                                | 0xFFFF        |
//! | 11     | VOC index, high 8 of 9 bits (flag b6)   | 0x1FF         |
//! | 12     | NOx index, high 8 of 9 bits (flag b7)   | 0x1FF         |
//! | 13     | Illuminance, logarithmic code           | 0xFF          |
//! | 14     | Reserved                                |               |
//! | 15     | Measurement sequence number             |               |
//! | 16     | Flags                                   |               |
//! | 17-19  | Low half of MAC address                 |               |

use super::{
    Framing, FormatError, be_i16, be_u16, manufacturer_payload, nine_bit, signed16, unsigned8,
    unsigned16,
};
use crate::measurement::{DataFormat, Measurement};

const MIN_LEN: usize = 24;

const FLAG_CALIBRATION: u8 = 0;
const FLAG_VOC_LSB: u8 = 6;
const FLAG_NOX_LSB: u8 = 7;

pub(super) fn decode(data: &[u8]) -> Result<Measurement, FormatError> {
    let payload = manufacturer_payload(data, Framing::Legacy, MIN_LEN, DataFormat::V6)?;
    let flags = payload[16];

    let mut m = Measurement::new(DataFormat::V6);
    m.temperature = signed16(be_i16(payload, 1)).map(|t| f64::from(t) * 0.005);
    m.humidity = unsigned16(be_u16(payload, 3)).map(|h| f64::from(h) * 0.0025);
    m.pressure = unsigned16(be_u16(payload, 5)).map(|p| f64::from(p) + 50_000.0);
    m.pm2_5 = unsigned16(be_u16(payload, 7)).map(|pm| f64::from(pm) / 10.0);
    m.co2 = unsigned16(be_u16(payload, 9)).map(f64::from);
    m.voc_index = nine_bit(payload[11], flags, FLAG_VOC_LSB).map(f64::from);
    m.nox_index = nine_bit(payload[12], flags, FLAG_NOX_LSB).map(f64::from);
    m.illuminance = unsigned8(payload[13]).map(illuminance);
    m.measurement_sequence = Some(u32::from(payload[15]));
    m.calibration_in_progress = Some(flags & (1 << FLAG_CALIBRATION) != 0);
    Ok(m)
}

/// Expand the logarithmic 8-bit code onto 0..65535 lux.
fn illuminance(code: u8) -> f64 {
    (f64::from(code) * 65_536f64.ln() / 254.0).exp() - 1.0
}
