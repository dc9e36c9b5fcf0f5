//! Scalar types and the big-endian value codec.
//!
//! PLC memory is mirrored as raw bytes; this module decodes and encodes the
//! scalar types the injector PLCs expose at fixed offsets. The PLC side is
//! big-endian for multi-byte scalars; single bytes and bits need no byte
//! reordering.
//!
//! | Type | Width | Encoding |
//! |------|-------|----------|
//! | [`ScalarType::Bool`] | 1 byte | one bit of a byte, selected separately |
//! | [`ScalarType::Byte`] | 1 byte | unsigned |
//! | [`ScalarType::Int16`] | 2 bytes | big-endian two's complement |
//! | [`ScalarType::Float32`] | 4 bytes | big-endian IEEE 754 |
//! | [`ScalarType::Str`] | n bytes | ASCII, NUL-padded |
//!
//! # Example
//!
//! ```
//! use plc_mirror::{ScalarType, Value};
//!
//! let bytes = plc_mirror::codec::encode(&Value::Int16(-2));
//! assert_eq!(bytes, vec![0xFF, 0xFE]);
//!
//! let back = plc_mirror::codec::decode(&bytes, ScalarType::Int16).unwrap();
//! assert_eq!(back, Value::Int16(-2));
//! ```

use crate::error::{PlcError, Result};

/// Scalar types addressable in PLC memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// One bit of a byte. Width 1; the bit index is carried separately.
    Bool,
    /// Unsigned 8-bit value.
    Byte,
    /// Signed 16-bit big-endian integer.
    Int16,
    /// 32-bit big-endian IEEE 754 float.
    Float32,
    /// Fixed-width ASCII string, NUL-padded.
    Str(usize),
}

impl ScalarType {
    /// Returns the width in bytes this type occupies in the mirrored buffer.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_mirror::ScalarType;
    ///
    /// assert_eq!(ScalarType::Bool.width(), 1);
    /// assert_eq!(ScalarType::Int16.width(), 2);
    /// assert_eq!(ScalarType::Float32.width(), 4);
    /// assert_eq!(ScalarType::Str(8).width(), 8);
    /// ```
    pub fn width(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Byte => 1,
            ScalarType::Int16 => 2,
            ScalarType::Float32 => 4,
            ScalarType::Str(n) => n,
        }
    }

    /// Returns whether values of this type carry a continuous numeric range
    /// (relevant for threshold-based quality classification).
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarType::Byte | ScalarType::Int16 | ScalarType::Float32)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Byte => write!(f, "byte"),
            ScalarType::Int16 => write!(f, "int16"),
            ScalarType::Float32 => write!(f, "float32"),
            ScalarType::Str(n) => write!(f, "str[{n}]"),
        }
    }
}

/// A decoded PLC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean, from a single bit.
    Bool(bool),
    /// Unsigned byte.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// 32-bit float.
    Float32(f32),
    /// ASCII string.
    Str(String),
}

impl Value {
    /// Returns the scalar type of this value.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Bool(_) => ScalarType::Bool,
            Value::Byte(_) => ScalarType::Byte,
            Value::Int16(_) => ScalarType::Int16,
            Value::Float32(_) => ScalarType::Float32,
            Value::Str(s) => ScalarType::Str(s.len()),
        }
    }

    /// Returns the value as `f64` where a numeric view exists.
    ///
    /// Booleans map to 0.0/1.0 so logic attributes can feed statistics.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Byte(b) => Some(f64::from(*b)),
            Value::Int16(v) => Some(f64::from(*v)),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Str(_) => None,
        }
    }

    /// Returns the value as `bool` where a truth view exists.
    ///
    /// Numerics are truthy when non-zero, mirroring PLC ladder semantics.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Byte(b) => Some(*b != 0),
            Value::Int16(v) => Some(*v != 0),
            Value::Float32(v) => Some(*v != 0.0),
            Value::Str(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Byte(b) => write!(f, "{b}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Decodes a value of the given type from `bytes`.
///
/// `bytes` must be exactly `ty.width()` long, in PLC (big-endian) order.
///
/// # Errors
///
/// Returns `PlcError::InvalidConfig` when the slice width does not match the
/// type width, or the bytes of a `Str` are not ASCII.
///
/// # Example
///
/// ```
/// use plc_mirror::{codec, ScalarType, Value};
///
/// let v = codec::decode(&[0x41, 0x48, 0x00, 0x00], ScalarType::Float32).unwrap();
/// assert_eq!(v, Value::Float32(12.5));
/// ```
pub fn decode(bytes: &[u8], ty: ScalarType) -> Result<Value> {
    if bytes.len() != ty.width() {
        return Err(PlcError::invalid_config(format!(
            "decode {}: expected {} bytes, got {}",
            ty,
            ty.width(),
            bytes.len()
        )));
    }
    Ok(match ty {
        ScalarType::Bool => Value::Bool(bytes[0] != 0),
        ScalarType::Byte => Value::Byte(bytes[0]),
        ScalarType::Int16 => Value::Int16(i16::from_be_bytes([bytes[0], bytes[1]])),
        ScalarType::Float32 => Value::Float32(f32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])),
        ScalarType::Str(_) => {
            if !bytes.is_ascii() {
                return Err(PlcError::invalid_config("decode str: non-ASCII bytes"));
            }
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            Value::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
    })
}

/// Encodes a value into PLC (big-endian) byte order.
///
/// # Example
///
/// ```
/// use plc_mirror::{codec, Value};
///
/// assert_eq!(codec::encode(&Value::Int16(0x1234)), vec![0x12, 0x34]);
/// assert_eq!(codec::encode(&Value::Byte(0xA5)), vec![0xA5]);
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Bool(b) => vec![u8::from(*b)],
        Value::Byte(b) => vec![*b],
        Value::Int16(v) => v.to_be_bytes().to_vec(),
        Value::Float32(v) => v.to_be_bytes().to_vec(),
        Value::Str(s) => s.as_bytes().to_vec(),
    }
}

/// Extracts one bit from a byte.
///
/// # Example
///
/// ```
/// use plc_mirror::codec::get_bit;
///
/// let byte = 0b0000_0101;
/// assert!(get_bit(byte, 0));
/// assert!(!get_bit(byte, 1));
/// assert!(get_bit(byte, 2));
/// ```
#[inline]
pub fn get_bit(byte: u8, bit: u8) -> bool {
    (byte & (1 << bit)) != 0
}

/// Sets or clears one bit of a byte.
///
/// # Example
///
/// ```
/// use plc_mirror::codec::set_bit;
///
/// assert_eq!(set_bit(0, 5, true), 0b0010_0000);
/// assert_eq!(set_bit(0xFF, 0, false), 0xFE);
/// ```
#[inline]
pub fn set_bit(byte: u8, bit: u8, state: bool) -> u8 {
    if state {
        byte | (1 << bit)
    } else {
        byte & !(1 << bit)
    }
}

/// Normalizes a byte address plus a free-running bit index.
///
/// Bit indices above 7 spill into following bytes: `(addr, 11)` becomes
/// `(addr + 1, 3)`.
///
/// # Example
///
/// ```
/// use plc_mirror::codec::normalize_bit_addr;
///
/// assert_eq!(normalize_bit_addr(10, 3), (10, 3));
/// assert_eq!(normalize_bit_addr(10, 11), (11, 3));
/// ```
#[inline]
pub fn normalize_bit_addr(addr: usize, bit: u8) -> (usize, u8) {
    (addr + usize::from(bit / 8), bit % 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(ScalarType::Bool.width(), 1);
        assert_eq!(ScalarType::Byte.width(), 1);
        assert_eq!(ScalarType::Int16.width(), 2);
        assert_eq!(ScalarType::Float32.width(), 4);
        assert_eq!(ScalarType::Str(6).width(), 6);
    }

    #[test]
    fn test_int16_round_trip() {
        for v in [-32768i16, -2, 0, 1, 12345, 32767] {
            let bytes = encode(&Value::Int16(v));
            assert_eq!(decode(&bytes, ScalarType::Int16).unwrap(), Value::Int16(v));
        }
    }

    #[test]
    fn test_int16_is_big_endian() {
        assert_eq!(encode(&Value::Int16(0x1234)), vec![0x12, 0x34]);
    }

    #[test]
    fn test_float32_round_trip() {
        for v in [0.0f32, -1.5, 3.2e7, f32::MIN_POSITIVE] {
            let bytes = encode(&Value::Float32(v));
            assert_eq!(
                decode(&bytes, ScalarType::Float32).unwrap(),
                Value::Float32(v)
            );
        }
    }

    #[test]
    fn test_float32_is_big_endian() {
        // 12.5f32 == 0x41480000
        assert_eq!(
            encode(&Value::Float32(12.5)),
            vec![0x41, 0x48, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_matches_plc_capture() {
        // Gun HV setpoint of -70 kV as captured on the wire.
        assert_eq!(hex::encode(encode(&Value::Float32(-70.0))), "c28c0000");
        assert_eq!(hex::encode(encode(&Value::Int16(1084))), "043c");
    }

    #[test]
    fn test_decode_width_mismatch() {
        assert!(decode(&[0x00], ScalarType::Int16).is_err());
        assert!(decode(&[0x00, 0x00, 0x00], ScalarType::Float32).is_err());
    }

    #[test]
    fn test_str_decode_stops_at_nul() {
        let v = decode(b"HV\0\0\0\0", ScalarType::Str(6)).unwrap();
        assert_eq!(v, Value::Str("HV".into()));
    }

    #[test]
    fn test_bit_helpers() {
        assert!(get_bit(0b0100, 2));
        assert!(!get_bit(0b0100, 1));
        assert_eq!(set_bit(0, 3, true), 0b1000);
        assert_eq!(set_bit(0b1000, 3, false), 0);
    }

    #[test]
    fn test_normalize_bit_addr() {
        assert_eq!(normalize_bit_addr(0, 0), (0, 0));
        assert_eq!(normalize_bit_addr(5, 7), (5, 7));
        assert_eq!(normalize_bit_addr(5, 8), (6, 0));
        assert_eq!(normalize_bit_addr(5, 19), (7, 3));
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Int16(-2).as_f64(), Some(-2.0));
        assert_eq!(Value::Str("x".into()).as_f64(), None);
        assert_eq!(Value::Byte(0).as_bool(), Some(false));
        assert_eq!(Value::Float32(0.5).as_bool(), Some(true));
    }

    #[test]
    fn test_display() {
        assert_eq!(ScalarType::Float32.to_string(), "float32");
        assert_eq!(ScalarType::Str(4).to_string(), "str[4]");
        assert_eq!(Value::Int16(7).to_string(), "7");
    }
}
