//! Data format 5 ("RAWv2").
//!
//! | Offset | Field                                  | Not available |
//! |--------|----------------------------------------|---------------|
//! | 0      | Format (0x05)                          |               |
//! | 1-2    | Temperature, 0.005 degrees             | 0x8000        |
//! | 3-4    | Humidity, 0.0025 %                     | 0xFFFF        |
//! | 5-6    | Pressure, Pa offset by -50000          | 0xFFFF        |
//! | 7-12   | Acceleration X/Y/Z, mG                 | 0x8000        |
//! | 13-14  | Battery (11 bits) and TX power (5 bits)| 0xFFFF        |
//! | 15     | Movement counter                       | 0xFF          |
//! | 16-17  | Measurement sequence number            | 0xFFFF        |
//! | 18-23  | MAC address                            |               |

use super::{
    Framing, FormatError, be_i16, be_u16, manufacturer_payload, signed16, unsigned8, unsigned16,
};
use crate::measurement::{DataFormat, Measurement};

const MIN_LEN: usize = 31;

pub(super) fn decode(data: &[u8]) -> Result<Measurement, FormatError> {
    let payload = manufacturer_payload(data, Framing::Legacy, MIN_LEN, DataFormat::V5)?;

    let mut m = Measurement::new(DataFormat::V5);
    m.temperature = signed16(be_i16(payload, 1)).map(|t| f64::from(t) / 200.0);
    m.humidity = unsigned16(be_u16(payload, 3)).map(|h| f64::from(h) / 400.0);
    m.pressure = unsigned16(be_u16(payload, 5)).map(|p| f64::from(p) + 50_000.0);
    m.acceleration_x = acceleration(be_i16(payload, 7));
    m.acceleration_y = acceleration(be_i16(payload, 9));
    m.acceleration_z = acceleration(be_i16(payload, 11));

    if let Some(power) = unsigned16(be_u16(payload, 13)) {
        m.battery_voltage = Some(f64::from(power >> 5) / 1000.0 + 1.6);
        m.tx_power = Some((power & 0x1F) as i8 * 2 - 40);
    }

    m.movement_counter = unsigned8(payload[15]).map(u32::from);
    m.measurement_sequence = unsigned16(be_u16(payload, 16)).map(u32::from);
    Ok(m)
}

fn acceleration(raw: i16) -> Option<f64> {
    signed16(raw).map(|a| f64::from(a) / 1000.0)
}
