//! JSON wire format for sample records
//!
//! Records go out as a flat JSON object with a fixed field order:
//! ```text
//! {"acc_x":0.1000,"acc_y":-0.0500,"acc_z":9.8067,"gyro_x":0.0100,"gyro_y":0.0000,"gyro_z":-0.0200,"temp":31.46,"ts_ms":1200}
//! ```
//!
//! Motion axes carry 4 decimal places and temperature 2. The encoder writes
//! the text directly so the precision is part of the format rather than a
//! property of a float printer.

use bytes::Bytes;
use serde::Deserialize;
use std::fmt::Write;
use thiserror::Error;

use crate::SampleRecord;

/// Decimal places for acceleration and angular-rate fields
pub const AXIS_DECIMALS: usize = 4;

/// Decimal places for the temperature field
pub const TEMP_DECIMALS: usize = 2;

/// Errors raised while encoding or decoding records
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Field {0} is not a finite number")]
    NonFinite(&'static str),

    #[error("Malformed record payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode a record into its JSON wire representation
pub fn encode(record: &SampleRecord) -> Result<Bytes, WireError> {
    let axes = [
        ("acc_x", record.acc_x),
        ("acc_y", record.acc_y),
        ("acc_z", record.acc_z),
        ("gyro_x", record.gyro_x),
        ("gyro_y", record.gyro_y),
        ("gyro_z", record.gyro_z),
    ];

    let mut out = String::with_capacity(160);
    out.push('{');

    for (name, value) in axes {
        push_fixed(&mut out, name, value, AXIS_DECIMALS)?;
        out.push(',');
    }
    push_fixed(&mut out, "temp", record.temp, TEMP_DECIMALS)?;

    // Writing into a String cannot fail
    let _ = write!(out, ",\"ts_ms\":{}}}", record.ts_ms);

    Ok(Bytes::from(out))
}

fn push_fixed(
    out: &mut String,
    name: &'static str,
    value: f32,
    decimals: usize,
) -> Result<(), WireError> {
    if !value.is_finite() {
        return Err(WireError::NonFinite(name));
    }
    let _ = write!(out, "\"{}\":{:.*}", name, decimals, value);
    Ok(())
}

#[derive(Deserialize)]
struct WireRecord {
    acc_x: f32,
    acc_y: f32,
    acc_z: f32,
    gyro_x: f32,
    gyro_y: f32,
    gyro_z: f32,
    #[serde(default)]
    temp: f32,
    #[serde(default)]
    ts_ms: u64,
}

/// Decode a record from a JSON payload
///
/// The six motion fields are required; `temp` and `ts_ms` default to zero
/// when absent.
pub fn decode(payload: &[u8]) -> Result<SampleRecord, WireError> {
    let text = std::str::from_utf8(payload).map_err(|_| WireError::InvalidUtf8)?;
    let wire: WireRecord = serde_json::from_str(text)?;

    Ok(SampleRecord {
        acc_x: wire.acc_x,
        acc_y: wire.acc_y,
        acc_z: wire.acc_z,
        gyro_x: wire.gyro_x,
        gyro_y: wire.gyro_y,
        gyro_z: wire.gyro_z,
        temp: wire.temp,
        ts_ms: wire.ts_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SampleRecord {
        SampleRecord::new([0.1, -0.05, 9.80665], [0.01, 0.0, -0.02], 31.456, 1200)
    }

    #[test]
    fn test_encode_exact_layout() {
        let encoded = encode(&sample()).expect("encode failed");
        assert_eq!(
            &encoded[..],
            br#"{"acc_x":0.1000,"acc_y":-0.0500,"acc_z":9.8067,"gyro_x":0.0100,"gyro_y":0.0000,"gyro_z":-0.0200,"temp":31.46,"ts_ms":1200}"#
        );
    }

    #[test]
    fn test_field_order() {
        let encoded = encode(&sample()).expect("encode failed");
        let text = std::str::from_utf8(&encoded).unwrap();

        let fields = ["acc_x", "acc_y", "acc_z", "gyro_x", "gyro_y", "gyro_z", "temp", "ts_ms"];
        let positions: Vec<usize> = fields
            .iter()
            .map(|f| text.find(&format!("\"{}\"", f)).expect("field missing"))
            .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut record = sample();
        record.gyro_z = f32::NAN;
        assert!(matches!(encode(&record), Err(WireError::NonFinite("gyro_z"))));

        let mut record = sample();
        record.temp = f32::INFINITY;
        assert!(matches!(encode(&record), Err(WireError::NonFinite("temp"))));
    }

    #[test]
    fn test_encoded_payload_decodes() {
        let encoded = encode(&sample()).expect("encode failed");
        let decoded = decode(&encoded).expect("decode failed");

        assert_eq!(decoded.ts_ms, 1200);
        assert!((decoded.acc_z - 9.8067).abs() < 1e-4);
        assert!((decoded.temp - 31.46).abs() < 1e-4);
    }

    #[test]
    fn test_decode_optional_fields() {
        let payload = br#"{"acc_x":1,"acc_y":2,"acc_z":3,"gyro_x":4,"gyro_y":5,"gyro_z":6}"#;
        let decoded = decode(payload).expect("decode failed");
        assert_eq!(decoded.gyro_z, 6.0);
        assert_eq!(decoded.temp, 0.0);
        assert_eq!(decoded.ts_ms, 0);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let payload = br#"{"acc_x":1,"acc_y":2,"temp":30.0}"#;
        assert!(matches!(decode(payload), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        assert!(matches!(decode(&[0xff, 0xfe]), Err(WireError::InvalidUtf8)));
    }
}
