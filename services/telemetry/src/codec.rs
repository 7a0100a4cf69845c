//! Wire codec for field-device readings.
//!
//! A reading travels as a positional JSON array:
//!
//! ```text
//! [[lat, lon, alt], [temperature, humidity], flame, shock, alcohol, button,
//!  [accel_x, accel_y, accel_z, gyro_x, gyro_y, gyro_z]]
//! ```
//!
//! Numeric members may be JSON numbers or numeric strings. Flags accept
//! `0`, `1`, `true` and `false`. Decoding is all-or-nothing.

use crate::error::DecodeError;
use serde_json::Value;

/// Number of top-level elements in an encoded reading
pub const READING_ARITY: usize = 7;
/// Values in the `[lat, lon, alt]` group
pub const LOCATION_LEN: usize = 3;
/// Values in the `[temperature, humidity]` group
pub const CLIMATE_LEN: usize = 2;
/// Values in the `[accel_x, .., gyro_z]` group
pub const MOTION_LEN: usize = 6;

/// A decoded, positionally-faithful reading from the field device
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    /// `[lat, lon, alt]`
    pub location: Vec<f64>,
    /// `[temperature, humidity]`
    pub climate: Vec<f64>,
    pub flame: i64,
    pub shock: i64,
    pub alcohol: i64,
    pub button: i64,
    /// `[accel_x, accel_y, accel_z, gyro_x, gyro_y, gyro_z]`
    pub motion: Vec<f64>,
}

/// Decode a raw queue payload into a [`RawReading`]
pub fn decode(raw: impl AsRef<[u8]>) -> Result<RawReading, DecodeError> {
    let value: Value = serde_json::from_slice(raw.as_ref())
        .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let items = expect_array(&value, "$", READING_ARITY)?;

    Ok(RawReading {
        location: numbers(&items[0], "$[0]", LOCATION_LEN)?,
        climate: numbers(&items[1], "$[1]", CLIMATE_LEN)?,
        flame: flag(&items[2], "$[2]")?,
        shock: flag(&items[3], "$[3]")?,
        alcohol: flag(&items[4], "$[4]")?,
        button: flag(&items[5], "$[5]")?,
        motion: numbers(&items[6], "$[6]", MOTION_LEN)?,
    })
}

/// Encode a reading into its canonical JSON array form
pub fn encode(reading: &RawReading) -> Vec<u8> {
    Value::Array(vec![
        Value::from(reading.location.clone()),
        Value::from(reading.climate.clone()),
        Value::from(reading.flame),
        Value::from(reading.shock),
        Value::from(reading.alcohol),
        Value::from(reading.button),
        Value::from(reading.motion.clone()),
    ])
    .to_string()
    .into_bytes()
}

fn expect_array<'a>(value: &'a Value, path: &str, len: usize) -> Result<&'a [Value], DecodeError> {
    let items = value.as_array().ok_or_else(|| DecodeError::NotAnArray {
        path: path.to_string(),
    })?;

    if items.len() != len {
        return Err(DecodeError::WrongLength {
            path: path.to_string(),
            expected: len,
            found: items.len(),
        });
    }

    Ok(items)
}

fn numbers(value: &Value, path: &str, len: usize) -> Result<Vec<f64>, DecodeError> {
    expect_array(value, path, len)?
        .iter()
        .enumerate()
        .map(|(i, item)| number(item, &format!("{}[{}]", path, i)))
        .collect()
}

fn number(value: &Value, path: &str) -> Result<f64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let n = parsed.ok_or_else(|| DecodeError::NotANumber {
        path: path.to_string(),
        value: value.to_string(),
    })?;

    if !n.is_finite() {
        return Err(DecodeError::NotFinite {
            path: path.to_string(),
            value: value.to_string(),
        });
    }

    Ok(n)
}

fn flag(value: &Value, path: &str) -> Result<i64, DecodeError> {
    let parsed = match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(0),
            Some(v) if v == 1.0 => Some(1),
            _ => None,
        },
        _ => None,
    };

    parsed.ok_or_else(|| DecodeError::NotAFlag {
        path: path.to_string(),
        value: value.to_string(),
    })
}
