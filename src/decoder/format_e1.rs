//! Extended data format E1.
//!
//! Sent in extended advertisements, so there is no flags element ahead of the
//! manufacturer data.
//!
//! | Offset | Field                                    | Not available |
//! |--------|------------------------------------------|---------------|
//! | 0      | Format (0xE1)                            |               |
//! | 1-2    | Temperature, 0.005 degrees               | 0x8000        |
//! | 3-4    | Humidity, 0.0025 %                       | 0xFFFF        |
//! | 5-6    | Pressure, Pa offset by -50000            | 0xFFFF        |
//! | 7-14   | PM1.0, PM2.5, PM4.0, PM10.0, 0.1 ug/m3   | 0xFFFF        |
//! | 15-16  | CO2, ppm                                 | 0xFFFF        |
//! | 17     | VOC index, high 8 of 9 bits (flag b6)    | 0x1FF         |
//! | 18     | NOx index, high 8 of 9 bits (flag b7)    | 0x1FF         |
//! | 19-21  | Illuminance, 0.01 lux                    | 0xFFFFFF      |
//! | 22-24  | Sound instant/average/peak (flags b3-b5) | 0x1FF         |
//! | 25-27  | Measurement sequence number              | 0xFFFFFF      |
//! | 28     | Flags                                    |               |
//! | 29-33  | Reserved                                 |               |
//! | 34-39  | MAC address                              |               |

use super::{
    Framing, FormatError, be_i16, be_u16, be_u24, manufacturer_payload, nine_bit, signed16,
    unsigned16, unsigned24,
};
use crate::measurement::{DataFormat, Measurement};

const MIN_LEN: usize = 33;

const FLAG_CALIBRATION: u8 = 0;
const FLAG_BUTTON: u8 = 1;
const FLAG_RTC: u8 = 2;
const FLAG_SOUND_INSTANT_LSB: u8 = 3;
const FLAG_SOUND_AVERAGE_LSB: u8 = 4;
const FLAG_SOUND_PEAK_LSB: u8 = 5;
const FLAG_VOC_LSB: u8 = 6;
const FLAG_NOX_LSB: u8 = 7;

pub(super) fn decode(data: &[u8]) -> Result<Measurement, FormatError> {
    let payload = manufacturer_payload(data, Framing::Extended, MIN_LEN, DataFormat::E1)?;
    let flags = payload[28];
    let flag = |bit: u8| flags & (1 << bit) != 0;

    let mut m = Measurement::new(DataFormat::E1);
    m.temperature = signed16(be_i16(payload, 1)).map(|t| f64::from(t) / 200.0);
    m.humidity = unsigned16(be_u16(payload, 3)).map(|h| f64::from(h) / 400.0);
    m.pressure = unsigned16(be_u16(payload, 5)).map(|p| f64::from(p) + 50_000.0);
    m.pm1_0 = particulate(be_u16(payload, 7));
    m.pm2_5 = particulate(be_u16(payload, 9));
    m.pm4_0 = particulate(be_u16(payload, 11));
    m.pm10_0 = particulate(be_u16(payload, 13));
    m.co2 = unsigned16(be_u16(payload, 15)).map(f64::from);
    m.voc_index = nine_bit(payload[17], flags, FLAG_VOC_LSB).map(f64::from);
    m.nox_index = nine_bit(payload[18], flags, FLAG_NOX_LSB).map(f64::from);
    m.illuminance = unsigned24(be_u24(payload, 19)).map(|lux| f64::from(lux) / 100.0);
    m.sound_instant = sound(payload[22], flags, FLAG_SOUND_INSTANT_LSB);
    m.sound_average = sound(payload[23], flags, FLAG_SOUND_AVERAGE_LSB);
    m.sound_peak = sound(payload[24], flags, FLAG_SOUND_PEAK_LSB);
    m.measurement_sequence = unsigned24(be_u24(payload, 25));
    m.calibration_in_progress = Some(flag(FLAG_CALIBRATION));
    m.button_pressed_on_boot = Some(flag(FLAG_BUTTON));
    m.rtc_running_on_boot = Some(flag(FLAG_RTC));
    Ok(m)
}

fn particulate(raw: u16) -> Option<f64> {
    unsigned16(raw).map(|pm| f64::from(pm) / 10.0)
}

/// Sound level in dBA: 0.2 dB steps from 18 dB.
fn sound(low: u8, flags: u8, bit: u8) -> Option<f64> {
    nine_bit(low, flags, bit).map(|s| f64::from(s) * 0.2 + 18.0)
}
