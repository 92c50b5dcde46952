//! Dynamically typed values carried by item content.
//!
//! # Examples
//!
//! ```
//! use ydoc::Any;
//! let value = Any::from(vec![Any::from(1.5), Any::from("two"), Any::Null]);
//! let bytes = value.encode_to_vec();
//! assert_eq!(Any::decode_from(&bytes).unwrap(), value);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use quickcheck::{Arbitrary, Gen};
use rand::Rng;
use serde_json::Value;

use crate::encoding::{Cursor, Write};
use crate::error::{Error, Result};

const TAG_UNDEFINED: u8 = 127;
const TAG_NULL: u8 = 126;
const TAG_INTEGER: u8 = 125;
const TAG_FLOAT32: u8 = 124;
const TAG_FLOAT64: u8 = 123;
const TAG_BIGINT: u8 = 122;
const TAG_FALSE: u8 = 121;
const TAG_TRUE: u8 = 120;
const TAG_STRING: u8 = 119;
const TAG_MAP: u8 = 118;
const TAG_ARRAY: u8 = 117;
const TAG_BUFFER: u8 = 116;

// integers above this magnitude are written as floats
const MAX_VAR_INTEGER: f64 = 2147483647.0;
// largest integer a 64-bit float represents exactly
const MAX_SAFE_INTEGER: f64 = 9007199254740991.0;
// arrays and maps nested deeper than this are rejected on decode
const MAX_DEPTH: usize = 512;

/// A JSON-like value with explicit `Undefined`, 64-bit integers and binary
/// buffers. Map keys are kept ordered so encodings are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Any {
    /// Absence of a value.
    Undefined,
    /// Explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// Any number; integral values within 31 bits are encoded compactly.
    Number(f64),
    /// A 64-bit integer.
    BigInt(i64),
    /// A string.
    String(String),
    /// Raw bytes.
    Buffer(Vec<u8>),
    /// An ordered list of values.
    Array(Vec<Any>),
    /// Values indexed by string keys.
    Map(BTreeMap<String, Any>),
}

impl Any {
    /// Append the binary encoding of this value to `buf`.
    pub fn encode<W: Write>(&self, buf: &mut W) {
        match self {
            Any::Undefined => buf.write_u8(TAG_UNDEFINED),
            Any::Null => buf.write_u8(TAG_NULL),
            Any::Bool(true) => buf.write_u8(TAG_TRUE),
            Any::Bool(false) => buf.write_u8(TAG_FALSE),
            Any::Number(n) => {
                let n = *n;
                if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_VAR_INTEGER {
                    buf.write_u8(TAG_INTEGER);
                    buf.write_var_signed(n.abs() as u64, n.is_sign_negative());
                } else if (n as f32) as f64 == n {
                    buf.write_u8(TAG_FLOAT32);
                    buf.write_f32(n as f32);
                } else {
                    buf.write_u8(TAG_FLOAT64);
                    buf.write_f64(n);
                }
            }
            Any::BigInt(i) => {
                buf.write_u8(TAG_BIGINT);
                buf.write_i64(*i);
            }
            Any::String(s) => {
                buf.write_u8(TAG_STRING);
                buf.write_string(s);
            }
            Any::Map(map) => {
                buf.write_u8(TAG_MAP);
                buf.write_var(map.len() as u64);
                for (key, value) in map.iter() {
                    buf.write_string(key);
                    value.encode(buf);
                }
            }
            Any::Array(values) => {
                buf.write_u8(TAG_ARRAY);
                buf.write_var(values.len() as u64);
                for value in values.iter() {
                    value.encode(buf);
                }
            }
            Any::Buffer(bytes) => {
                buf.write_u8(TAG_BUFFER);
                buf.write_buf(bytes);
            }
        }
    }

    /// Read a single value. Arrays and maps may nest at most 512 levels
    /// deep.
    pub fn decode(cursor: &mut Cursor) -> Result<Any> {
        Any::decode_nested(cursor, 0)
    }

    fn decode_nested(cursor: &mut Cursor, depth: usize) -> Result<Any> {
        let tag = cursor.read_u8()?;
        if (tag == TAG_MAP || tag == TAG_ARRAY) && depth >= MAX_DEPTH {
            return Err(Error::UnexpectedValue(format!(
                "any value nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        let value = match tag {
            TAG_UNDEFINED => Any::Undefined,
            TAG_NULL => Any::Null,
            TAG_INTEGER => {
                let signed = cursor.read_var_signed()?;
                if signed.negative && signed.value == 0 {
                    Any::Number(-0.0)
                } else {
                    Any::Number(signed.value as f64)
                }
            }
            TAG_FLOAT32 => Any::Number(cursor.read_f32()? as f64),
            TAG_FLOAT64 => Any::Number(cursor.read_f64()?),
            TAG_BIGINT => Any::BigInt(cursor.read_i64()?),
            TAG_FALSE => Any::Bool(false),
            TAG_TRUE => Any::Bool(true),
            TAG_STRING => Any::String(cursor.read_string()?.to_owned()),
            TAG_MAP => {
                let len = cursor.read_var()?;
                let mut map = BTreeMap::new();
                for _ in 0..len {
                    let key = cursor.read_string()?.to_owned();
                    let value = Any::decode_nested(cursor, depth + 1)?;
                    map.insert(key, value);
                }
                Any::Map(map)
            }
            TAG_ARRAY => {
                let len = cursor.read_var()?;
                let mut values = Vec::new();
                for _ in 0..len {
                    values.push(Any::decode_nested(cursor, depth + 1)?);
                }
                Any::Array(values)
            }
            TAG_BUFFER => Any::Buffer(cursor.read_buf()?.to_vec()),
            other => {
                return Err(Error::UnexpectedValue(format!(
                    "unknown any tag {}",
                    other
                )))
            }
        };
        Ok(value)
    }

    /// Encode into a fresh buffer.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Decode a value occupying the start of `buf`.
    pub fn decode_from(buf: &[u8]) -> Result<Any> {
        Any::decode(&mut Cursor::new(buf))
    }

    /// Convert into a JSON value. `Undefined` becomes `null`; integral
    /// numbers are written without a fractional part.
    pub fn to_json(&self) -> Value {
        match self {
            Any::Undefined | Any::Null => Value::Null,
            Any::Bool(b) => Value::Bool(*b),
            Any::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Any::BigInt(i) => Value::from(*i),
            Any::String(s) => Value::String(s.clone()),
            Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Any::Array(values) => Value::Array(values.iter().map(Any::to_json).collect()),
            Any::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Serialize as JSON text.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Parse JSON text.
    pub fn from_json_str(json: &str) -> Result<Any> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Any::from(value))
    }
}

impl From<Value> for Any {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Any::Null,
            Value::Bool(b) => Any::Bool(b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => Any::Number(f),
                None => Any::Null,
            },
            Value::String(s) => Any::String(s),
            Value::Array(values) => Any::Array(values.into_iter().map(Any::from).collect()),
            Value::Object(map) => {
                Any::Map(map.into_iter().map(|(k, v)| (k, Any::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Any {
    fn from(b: bool) -> Self {
        Any::Bool(b)
    }
}

impl From<f64> for Any {
    fn from(n: f64) -> Self {
        Any::Number(n)
    }
}

impl From<i32> for Any {
    fn from(n: i32) -> Self {
        Any::Number(n as f64)
    }
}

impl From<i64> for Any {
    fn from(n: i64) -> Self {
        Any::BigInt(n)
    }
}

impl From<&str> for Any {
    fn from(s: &str) -> Self {
        Any::String(s.to_owned())
    }
}

impl From<String> for Any {
    fn from(s: String) -> Self {
        Any::String(s)
    }
}

impl From<Vec<u8>> for Any {
    fn from(bytes: Vec<u8>) -> Self {
        Any::Buffer(bytes)
    }
}

impl From<Vec<Any>> for Any {
    fn from(values: Vec<Any>) -> Self {
        Any::Array(values)
    }
}

impl From<BTreeMap<String, Any>> for Any {
    fn from(map: BTreeMap<String, Any>) -> Self {
        Any::Map(map)
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Any::Undefined => write!(f, "undefined"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

fn arbitrary_any<G: Gen>(g: &mut G, depth: usize) -> Any {
    let choice = if depth == 0 { g.gen_range(0, 8) } else { g.gen_range(0, 10) };
    match choice {
        0 => Any::Undefined,
        1 => Any::Null,
        2 => Any::Bool(bool::arbitrary(g)),
        3 => Any::Number(i32::arbitrary(g) as f64),
        // quarters are exact in both float widths
        4 => Any::Number(i16::arbitrary(g) as f64 / 4.0),
        5 => Any::BigInt(i64::arbitrary(g)),
        6 => Any::String(String::arbitrary(g)),
        7 => Any::Buffer(Vec::<u8>::arbitrary(g)),
        8 => Any::Array(
            (0..g.gen_range(0, 4))
                .map(|_| arbitrary_any(g, depth - 1))
                .collect(),
        ),
        _ => Any::Map(
            (0..g.gen_range(0, 4))
                .map(|_| (String::arbitrary(g), arbitrary_any(g, depth - 1)))
                .collect(),
        ),
    }
}

impl Arbitrary for Any {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        arbitrary_any(g, 2)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::quickcheck;

    quickcheck! {
        fn prop_binary_round_trip(value: Any) -> bool {
            Any::decode_from(&value.encode_to_vec()).ok() == Some(value)
        }
    }

    #[test]
    fn test_number_encodings() {
        assert_eq!(Any::from(5).encode_to_vec(), vec![TAG_INTEGER, 5]);
        assert_eq!(Any::from(-5).encode_to_vec(), vec![TAG_INTEGER, 0b0100_0101]);
        assert_eq!(Any::from(0.5).encode_to_vec()[0], TAG_FLOAT32);
        assert_eq!(Any::from(0.1).encode_to_vec()[0], TAG_FLOAT64);
        assert_eq!(Any::from(4294967296.0).encode_to_vec()[0], TAG_FLOAT32);
    }

    #[test]
    fn test_negative_zero() {
        let bytes = Any::Number(-0.0).encode_to_vec();
        assert_eq!(bytes, vec![TAG_INTEGER, 0b0100_0000]);
        match Any::decode_from(&bytes).unwrap() {
            Any::Number(n) => assert!(n == 0.0 && n.is_sign_negative()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_text() {
        let mut map = BTreeMap::new();
        map.insert("bold".to_string(), Any::Bool(true));
        map.insert("size".to_string(), Any::from(12));
        let value = Any::Map(map);
        assert_eq!(value.to_json_string(), r#"{"bold":true,"size":12}"#);
        assert_eq!(Any::from_json_str(&value.to_json_string()).unwrap(), value);
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            Any::decode_from(&[3]),
            Err(Error::UnexpectedValue(_))
        ));
    }

    fn nested_arrays(depth: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for _ in 0..depth {
            buf.extend_from_slice(&[TAG_ARRAY, 1]);
        }
        buf.push(TAG_NULL);
        buf
    }

    #[test]
    fn test_nesting_limit() {
        assert!(Any::decode_from(&nested_arrays(MAX_DEPTH)).is_ok());
        assert!(matches!(
            Any::decode_from(&nested_arrays(MAX_DEPTH + 1)),
            Err(Error::UnexpectedValue(_))
        ));
        assert!(matches!(
            Any::decode_from(&nested_arrays(200_000)),
            Err(Error::UnexpectedValue(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_string() {
        assert!(matches!(
            Any::decode_from(&[TAG_STRING, 2, 0xc3, 0x28]),
            Err(Error::InvalidString)
        ));
    }
}
