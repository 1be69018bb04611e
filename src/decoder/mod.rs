//! Decoding of RuuviTag advertisements.
//!
//! Producers hand over the advertisement data as a hex string. The decoder
//! locates the Ruuvi manufacturer-specific data element, and tries the known
//! data formats in a fixed order (newest first). The first format that parses
//! wins. A failure is an expected event: plenty of foreign devices share the
//! airwaves, so it is only ever logged at trace level.
//!
//! Every field decoder checks the format's "not available" bit pattern before
//! any scaling is applied, and leaves the field absent on a match.

mod format3;
mod format5;
mod format6;
mod format_e1;

use crate::measurement::{DataFormat, Measurement};
use std::fmt;
use thiserror::Error;

/// Ruuvi Innovations company identifier as transmitted (little-endian 0x0499).
pub const RUUVI_COMPANY_ID_BYTES: [u8; 2] = [0x99, 0x04];

/// Ruuvi Innovations company identifier.
pub const RUUVI_COMPANY_ID: u16 = 0x0499;

/// Bluetooth AD type for manufacturer-specific data.
pub const MANUFACTURER_DATA_TYPE: u8 = 0xFF;

/// Formats in the order they are tried.
pub const TRIAL_ORDER: [DataFormat; 4] =
    [DataFormat::E1, DataFormat::V6, DataFormat::V5, DataFormat::V3];

/// Reasons a single format rejects an advertisement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("data is too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("data is not manufacturer specific data")]
    NotManufacturerData,
    #[error("data has wrong company identifier {0:#06x}")]
    WrongCompany(u16),
    #[error("data is not in data format {expected} (found {found:#04x})")]
    WrongFormat { expected: DataFormat, found: u8 },
}

/// Per-format failures collected while trying every known format.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatFailures(pub Vec<(DataFormat, FormatError)>);

impl fmt::Display for FormatFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (format, error)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "format {format}: {error}")?;
        }
        Ok(())
    }
}

/// Error returned when an advertisement cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Input is not a valid hex string
    #[error("Invalid hex data at position {0}")]
    InvalidHex(usize),
    /// No known format accepted the data
    #[error("Unrecognized data: {0}")]
    Unrecognized(FormatFailures),
}

/// Decode a hex encoded advertisement into a measurement.
///
/// Formats are tried in [`TRIAL_ORDER`]; the aggregate error carries every
/// format's individual reason.
pub fn decode(raw: &str) -> Result<Measurement, DecodeError> {
    let data = match decode_hex(raw) {
        Ok(data) => data,
        Err(error) => {
            tracing::trace!(raw_data = raw, %error, "Failed to parse data");
            return Err(error);
        }
    };

    let mut failures = Vec::with_capacity(TRIAL_ORDER.len());
    for format in TRIAL_ORDER {
        match decode_bytes(format, &data) {
            Ok(measurement) => {
                tracing::trace!(raw_data = raw, data_format = %format, "Successfully parsed data");
                return Ok(measurement);
            }
            Err(error) => failures.push((format, error)),
        }
    }

    let error = DecodeError::Unrecognized(FormatFailures(failures));
    tracing::trace!(raw_data = raw, %error, "Failed to parse data");
    Err(error)
}

/// Decode a hex encoded advertisement using one specific format.
pub fn decode_as(format: DataFormat, raw: &str) -> Result<Measurement, DecodeError> {
    let data = decode_hex(raw)?;
    decode_bytes(format, &data)
        .map_err(|error| DecodeError::Unrecognized(FormatFailures(vec![(format, error)])))
}

fn decode_bytes(format: DataFormat, data: &[u8]) -> Result<Measurement, FormatError> {
    match format {
        DataFormat::V3 => format3::decode(data),
        DataFormat::V5 => format5::decode(data),
        DataFormat::V6 => format6::decode(data),
        DataFormat::E1 => format_e1::decode(data),
    }
}

/// Where the manufacturer data element sits in an advertisement.
#[derive(Debug, Clone, Copy)]
enum Framing {
    /// Legacy advertisement: a 3-byte flags element, then length, type, company id.
    Legacy,
    /// Extended advertisement: no flags element, length first.
    Extended,
}

impl Framing {
    const fn type_offset(self) -> usize {
        match self {
            Framing::Legacy => 4,
            Framing::Extended => 1,
        }
    }
}

/// Validate the framing of `data` and return the format payload, starting at
/// the discriminator byte.
///
/// `min_len` is checked against the whole advertisement before anything is read.
fn manufacturer_payload(
    data: &[u8],
    framing: Framing,
    min_len: usize,
    format: DataFormat,
) -> Result<&[u8], FormatError> {
    if data.len() < min_len {
        return Err(FormatError::TooShort {
            len: data.len(),
            min: min_len,
        });
    }

    let offset = framing.type_offset();
    if data[offset] != MANUFACTURER_DATA_TYPE {
        return Err(FormatError::NotManufacturerData);
    }

    let company = [data[offset + 1], data[offset + 2]];
    if company != RUUVI_COMPANY_ID_BYTES {
        return Err(FormatError::WrongCompany(u16::from_le_bytes(company)));
    }

    let payload = &data[offset + 3..];
    if payload[0] != format.discriminator() {
        return Err(FormatError::WrongFormat {
            expected: format,
            found: payload[0],
        });
    }

    Ok(payload)
}

/// Wrap a manufacturer payload (starting with the format byte) in the
/// advertisement framing its format is transmitted with.
///
/// Used by producers that only get the manufacturer payload from their radio
/// stack, so that everything flows through [`decode`].
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    match payload.first() {
        Some(&b) if b == DataFormat::E1.discriminator() => frame_extended(payload),
        _ => frame_legacy(payload),
    }
}

/// Legacy advertisement: flags element followed by the manufacturer element.
pub fn frame_legacy(payload: &[u8]) -> Vec<u8> {
    let mut adv = Vec::with_capacity(7 + payload.len());
    adv.extend_from_slice(&[0x02, 0x01, 0x06]);
    adv.push((payload.len() + 3) as u8);
    adv.push(MANUFACTURER_DATA_TYPE);
    adv.extend_from_slice(&RUUVI_COMPANY_ID_BYTES);
    adv.extend_from_slice(payload);
    adv
}

/// Extended advertisement: the manufacturer element alone.
pub fn frame_extended(payload: &[u8]) -> Vec<u8> {
    let mut adv = Vec::with_capacity(4 + payload.len());
    adv.push((payload.len() + 3) as u8);
    adv.push(MANUFACTURER_DATA_TYPE);
    adv.extend_from_slice(&RUUVI_COMPANY_ID_BYTES);
    adv.extend_from_slice(payload);
    adv
}

/// Decode a hex string (either case, no separators) into bytes.
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, DecodeError> {
    let raw = raw.trim().as_bytes();
    if raw.len() % 2 != 0 {
        return Err(DecodeError::InvalidHex(raw.len()));
    }

    raw.chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let hi = hex_digit(pair[0]).ok_or(DecodeError::InvalidHex(i * 2))?;
            let lo = hex_digit(pair[1]).ok_or(DecodeError::InvalidHex(i * 2 + 1))?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

/// Encode bytes as an upper-case hex string.
pub fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// Raw field extraction. Offsets are relative to the payload, whose length has
// already been checked by `manufacturer_payload`.

fn be_u16(payload: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([payload[at], payload[at + 1]])
}

fn be_i16(payload: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([payload[at], payload[at + 1]])
}

fn be_u24(payload: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([0, payload[at], payload[at + 1], payload[at + 2]])
}

// Sentinel checks. Each returns the raw value only when it is not the
// format's "not available" pattern; scaling happens afterwards.

fn signed16(raw: i16) -> Option<i16> {
    (raw != i16::MIN).then_some(raw)
}

fn unsigned16(raw: u16) -> Option<u16> {
    (raw != u16::MAX).then_some(raw)
}

fn unsigned24(raw: u32) -> Option<u32> {
    (raw != 0x00FF_FFFF).then_some(raw)
}

fn unsigned8(raw: u8) -> Option<u8> {
    (raw != u8::MAX).then_some(raw)
}

/// Extend an 8-bit field to 9 bits with a bit borrowed from a flags byte.
pub(crate) fn combine9(low: u8, extra_bit: bool) -> u16 {
    (u16::from(low) << 1) | u16::from(extra_bit)
}

/// A 9-bit packed field, absent when all nine bits are set.
fn nine_bit(low: u8, flags: u8, bit: u8) -> Option<u16> {
    let combined = combine9(low, flags & (1 << bit) != 0);
    (combined != 0x1FF).then_some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::V5_ADVERTISEMENT;

    #[test]
    fn test_decode_format5_end_to_end() {
        let m = decode(V5_ADVERTISEMENT).unwrap();
        assert_eq!(m.data_format, DataFormat::V5);
        assert!((m.temperature.unwrap() - 24.3).abs() < 1e-9);
        assert!((m.humidity.unwrap() - 53.49).abs() < 1e-9);
        assert_eq!(m.pressure, Some(100_044.0));
        assert!((m.battery_voltage.unwrap() - 2.977).abs() < 1e-9);
        assert_eq!(m.tx_power, Some(4));
        assert_eq!(m.movement_counter, Some(66));
        assert_eq!(m.measurement_sequence, Some(205));
    }

    #[test]
    fn test_decode_accepts_lowercase_hex() {
        let m = decode(&V5_ADVERTISEMENT.to_lowercase()).unwrap();
        assert_eq!(m.data_format, DataFormat::V5);
    }

    #[test]
    fn test_decode_invalid_hex() {
        assert_eq!(decode("0201zz"), Err(DecodeError::InvalidHex(4)));
        assert_eq!(decode("020"), Err(DecodeError::InvalidHex(3)));
    }

    #[test]
    fn test_decode_collects_every_format_failure() {
        let err = decode("0201061BFF").unwrap_err();
        let DecodeError::Unrecognized(FormatFailures(failures)) = err else {
            panic!("expected aggregate error");
        };
        let formats: Vec<DataFormat> = failures.iter().map(|(f, _)| *f).collect();
        assert_eq!(formats, TRIAL_ORDER.to_vec());
        assert!(
            failures
                .iter()
                .all(|(_, e)| matches!(e, FormatError::TooShort { len: 5, .. }))
        );
    }

    #[test]
    fn test_decode_empty_input() {
        assert!(matches!(decode(""), Err(DecodeError::Unrecognized(_))));
    }

    #[test]
    fn test_decode_foreign_company() {
        let mut adv = decode_hex(V5_ADVERTISEMENT).unwrap();
        adv[5] = 0x4C;
        adv[6] = 0x00;
        let err = decode_as(DataFormat::V5, &encode_hex(&adv)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Unrecognized(FormatFailures(vec![(
                DataFormat::V5,
                FormatError::WrongCompany(0x004C)
            )]))
        );
        assert!(decode(&encode_hex(&adv)).is_err());
    }

    #[test]
    fn test_decode_not_manufacturer_data() {
        let mut adv = decode_hex(V5_ADVERTISEMENT).unwrap();
        adv[4] = 0x16;
        assert!(matches!(
            decode_as(DataFormat::V5, &encode_hex(&adv)),
            Err(DecodeError::Unrecognized(FormatFailures(ref f)))
                if f[0].1 == FormatError::NotManufacturerData
        ));
    }

    #[test]
    fn test_decode_unknown_discriminator() {
        let mut adv = decode_hex(V5_ADVERTISEMENT).unwrap();
        adv[7] = 0x04;
        let err = decode(&encode_hex(&adv)).unwrap_err();
        let DecodeError::Unrecognized(FormatFailures(failures)) = err else {
            panic!("expected aggregate error");
        };
        assert!(failures.contains(&(
            DataFormat::V5,
            FormatError::WrongFormat {
                expected: DataFormat::V5,
                found: 0x04
            }
        )));
    }

    #[test]
    fn test_truncated_inputs_never_panic() {
        let adv = decode_hex(V5_ADVERTISEMENT).unwrap();
        for len in 0..adv.len() {
            let _ = decode(&encode_hex(&adv[..len]));
        }
        let e1 = frame_extended(&[0xE1; 40]);
        for len in 0..e1.len() {
            let _ = decode(&encode_hex(&e1[..len]));
        }
    }

    #[test]
    fn test_frame_payload_picks_framing() {
        let legacy = frame_payload(&[0x05, 0x00]);
        assert_eq!(legacy[..7], [0x02, 0x01, 0x06, 0x05, 0xFF, 0x99, 0x04]);
        let extended = frame_payload(&[0xE1, 0x00]);
        assert_eq!(extended[..4], [0x05, 0xFF, 0x99, 0x04]);
    }

    #[test]
    fn test_hex_roundtrip() {
        let bytes = [0x00, 0x7F, 0x80, 0xFF];
        assert_eq!(encode_hex(&bytes), "007F80FF");
        assert_eq!(decode_hex("007f80ff").unwrap(), bytes);
    }

    #[test]
    fn test_combine9() {
        assert_eq!(combine9(0x00, false), 0);
        assert_eq!(combine9(0x05, false), 10);
        assert_eq!(combine9(0x05, true), 11);
        assert_eq!(combine9(0xFF, true), 0x1FF);
    }

    #[test]
    fn test_nine_bit_sentinel() {
        assert_eq!(nine_bit(0xFF, 0b0100_0000, 6), None);
        assert_eq!(nine_bit(0xFF, 0b1000_0000, 6), Some(0x1FE));
        assert_eq!(nine_bit(0xFA, 0x00, 7), Some(500));
    }

    #[test]
    fn test_sentinel_helpers() {
        assert_eq!(signed16(i16::MIN), None);
        assert_eq!(signed16(i16::MIN + 1), Some(-32767));
        assert_eq!(unsigned16(0xFFFF), None);
        assert_eq!(unsigned16(0xFFFE), Some(0xFFFE));
        assert_eq!(unsigned24(0xFF_FFFF), None);
        assert_eq!(unsigned24(0xFF_FFFE), Some(0xFF_FFFE));
        assert_eq!(unsigned8(0xFF), None);
        assert_eq!(unsigned8(0xFE), Some(0xFE));
    }
}
