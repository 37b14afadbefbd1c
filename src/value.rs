//! Tagged value type shared by every storage backend and both wire
//! protocols.
//!
//! A [`Value`] is a small tagged union: an 8-bit type tag followed by its
//! own length-prefixed payload. Every variant owns its bytes; nothing is
//! shared or recomputed from context, matching the on-disk/on-wire framing
//! in [`encode`]/[`decode`].

use std::fmt;

use thiserror::Error;

/// Wire type tag, matching `enum value_type` in the original C source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    /// No value (used only for error replies on the wire).
    Undef = 0,
    /// Opaque binary payload.
    Data = 1,
    /// NUL-terminated string; `length` includes the trailing NUL.
    CString = 2,
    I32 = 3,
    U32 = 4,
    I64 = 5,
    U64 = 6,
    Float = 7,
    Double = 8,
}

impl ValueTag {
    fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ValueTag::Undef,
            1 => ValueTag::Data,
            2 => ValueTag::CString,
            3 => ValueTag::I32,
            4 => ValueTag::U32,
            5 => ValueTag::I64,
            6 => ValueTag::U64,
            7 => ValueTag::Float,
            8 => ValueTag::Double,
            _ => return None,
        })
    }

    /// The name used in the `<tag>:<text>` CLI textual form.
    fn name(self) -> &'static str {
        match self {
            ValueTag::Undef => "undef",
            ValueTag::Data => "data",
            ValueTag::CString => "cstring",
            ValueTag::I32 => "i32",
            ValueTag::U32 => "u32",
            ValueTag::I64 => "i64",
            ValueTag::U64 => "u64",
            ValueTag::Float => "float",
            ValueTag::Double => "double",
        }
    }
}

/// A tagged value. Numeric variants store little-endian host-width bytes;
/// `CString` includes the trailing NUL; `Data` is opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value; only ever produced by error replies.
    Undef,
    /// Opaque binary payload.
    Data(Vec<u8>),
    /// NUL-terminated string (the NUL byte is part of the stored bytes).
    CString(Vec<u8>),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
}

/// Errors raised by [`Value::parse`] and [`decode`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValueError {
    /// The text or wire bytes could not be interpreted as a [`Value`].
    #[error("invalid value: {0}")]
    Invalid(String),
}

impl Value {
    /// The wire type tag for this value.
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Undef => ValueTag::Undef,
            Value::Data(_) => ValueTag::Data,
            Value::CString(_) => ValueTag::CString,
            Value::I32(_) => ValueTag::I32,
            Value::U32(_) => ValueTag::U32,
            Value::I64(_) => ValueTag::I64,
            Value::U64(_) => ValueTag::U64,
            Value::Float(_) => ValueTag::Float,
            Value::Double(_) => ValueTag::Double,
        }
    }

    /// Build a `cstring` value from a Rust string, appending the trailing
    /// NUL the wire format requires.
    pub fn cstring(s: &str) -> Value {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Value::CString(bytes)
    }

    /// The payload bytes, exactly as they appear on the wire (without the
    /// `[tag][length]` header).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Value::Undef => Vec::new(),
            Value::Data(b) | Value::CString(b) => b.clone(),
            Value::I32(n) => n.to_le_bytes().to_vec(),
            Value::U32(n) => n.to_le_bytes().to_vec(),
            Value::I64(n) => n.to_le_bytes().to_vec(),
            Value::U64(n) => n.to_le_bytes().to_vec(),
            Value::Float(n) => n.to_le_bytes().to_vec(),
            Value::Double(n) => n.to_le_bytes().to_vec(),
        }
    }

    /// Parse the CLI/config textual form `<tag>:<text>`. A string with no
    /// recognized `<tag>:` prefix defaults to `cstring`.
    pub fn parse(text: &str) -> Result<Value, ValueError> {
        let (tag, rest) = match text.split_once(':') {
            Some((prefix, rest)) => match prefix {
                "i32" => (ValueTag::I32, rest),
                "u32" => (ValueTag::U32, rest),
                "i64" => (ValueTag::I64, rest),
                "u64" => (ValueTag::U64, rest),
                "float" => (ValueTag::Float, rest),
                "double" => (ValueTag::Double, rest),
                "data" => (ValueTag::Data, rest),
                "cstring" => (ValueTag::CString, rest),
                _ => (ValueTag::CString, text),
            },
            None => (ValueTag::CString, text),
        };

        match tag {
            ValueTag::I32 => parse_int(rest)
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::I32)
                .ok_or_else(|| ValueError::Invalid(text.to_string())),
            ValueTag::U32 => parse_uint(rest)
                .and_then(|n| u32::try_from(n).ok())
                .map(Value::U32)
                .ok_or_else(|| ValueError::Invalid(text.to_string())),
            ValueTag::I64 => parse_int(rest)
                .map(Value::I64)
                .ok_or_else(|| ValueError::Invalid(text.to_string())),
            ValueTag::U64 => parse_uint(rest)
                .map(Value::U64)
                .ok_or_else(|| ValueError::Invalid(text.to_string())),
            ValueTag::Float => rest
                .parse::<f32>()
                .map(Value::Float)
                .map_err(|_| ValueError::Invalid(text.to_string())),
            ValueTag::Double => rest
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| ValueError::Invalid(text.to_string())),
            ValueTag::Data => {
                let hex_str = rest.strip_prefix("0x").unwrap_or(rest);
                hex::decode(hex_str)
                    .map(Value::Data)
                    .map_err(|_| ValueError::Invalid(text.to_string()))
            }
            ValueTag::CString => Ok(Value::cstring(rest)),
            ValueTag::Undef => Err(ValueError::Invalid(text.to_string())),
        }
    }

    /// Render the CLI/logging textual form. Long `data` payloads are
    /// ellipsized in the middle so log lines stay bounded.
    pub fn format(&self, include_tag: bool) -> String {
        let body = match self {
            Value::Undef => "undef".to_string(),
            Value::Data(b) => ellipsize_hex(b),
            Value::CString(b) => String::from_utf8_lossy(strip_trailing_nul(b)).into_owned(),
            Value::I32(n) => n.to_string(),
            Value::U32(n) => n.to_string(),
            Value::I64(n) => n.to_string(),
            Value::U64(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Double(n) => n.to_string(),
        };
        if include_tag {
            format!("{}:{}", self.tag().name(), body)
        } else {
            body
        }
    }

    /// Encode to the wire form: `[u8 tag][u32 length LE][payload]`.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut out = Vec::with_capacity(5 + payload.len());
        out.push(self.tag() as u8);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decode the wire form, enforcing that `payload.len()` equals the
    /// announced length byte-for-byte.
    pub fn decode(bytes: &[u8]) -> Result<Value, ValueError> {
        if bytes.len() < 5 {
            return Err(ValueError::Invalid("short value header".to_string()));
        }
        let tag = ValueTag::from_u8(bytes[0])
            .ok_or_else(|| ValueError::Invalid(format!("unknown tag {}", bytes[0])))?;
        let length = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let payload = &bytes[5..];
        if payload.len() != length {
            return Err(ValueError::Invalid(format!(
                "length mismatch: header says {length}, got {}",
                payload.len()
            )));
        }
        decode_tagged(tag, payload)
    }

    /// Decode a header/payload pair already split apart by a frame reader
    /// (used by the I/O stream protocol, which reads the header and
    /// payload as separate socket reads).
    pub fn from_parts(tag: u8, payload: &[u8]) -> Result<Value, ValueError> {
        let tag =
            ValueTag::from_u8(tag).ok_or_else(|| ValueError::Invalid(format!("unknown tag {tag}")))?;
        decode_tagged(tag, payload)
    }
}

fn decode_tagged(tag: ValueTag, payload: &[u8]) -> Result<Value, ValueError> {
    match tag {
        ValueTag::Undef => Ok(Value::Undef),
        ValueTag::Data => Ok(Value::Data(payload.to_vec())),
        ValueTag::CString => Ok(Value::CString(payload.to_vec())),
        ValueTag::I32 => fixed::<4>(payload).map(|b| Value::I32(i32::from_le_bytes(b))),
        ValueTag::U32 => fixed::<4>(payload).map(|b| Value::U32(u32::from_le_bytes(b))),
        ValueTag::I64 => fixed::<8>(payload).map(|b| Value::I64(i64::from_le_bytes(b))),
        ValueTag::U64 => fixed::<8>(payload).map(|b| Value::U64(u64::from_le_bytes(b))),
        ValueTag::Float => fixed::<4>(payload).map(|b| Value::Float(f32::from_le_bytes(b))),
        ValueTag::Double => fixed::<8>(payload).map(|b| Value::Double(f64::from_le_bytes(b))),
    }
}

fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N], ValueError> {
    payload
        .try_into()
        .map_err(|_| ValueError::Invalid(format!("expected {N}-byte payload, got {}", payload.len())))
}

fn strip_trailing_nul(bytes: &[u8]) -> &[u8] {
    match bytes.last() {
        Some(0) => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

fn ellipsize_hex(bytes: &[u8]) -> String {
    const MAX_DISPLAY_BYTES: usize = 32;
    if bytes.len() <= MAX_DISPLAY_BYTES {
        hex::encode(bytes)
    } else {
        let half = MAX_DISPLAY_BYTES / 2;
        format!(
            "{}...{}",
            hex::encode(&bytes[..half]),
            hex::encode(&bytes[bytes.len() - half..])
        )
    }
}

fn parse_int(text: &str) -> Option<i64> {
    parse_radix(text).and_then(|(digits, radix, neg)| {
        i64::from_str_radix(digits, radix)
            .ok()
            .map(|n| if neg { -n } else { n })
    })
}

fn parse_uint(text: &str) -> Option<u64> {
    parse_radix(text).and_then(|(digits, radix, neg)| {
        if neg {
            return None;
        }
        u64::from_str_radix(digits, radix).ok()
    })
}

/// Splits a leading sign and a `0x`/`0` radix prefix off `text`, matching
/// `strtol`/`strtoul`'s base-agnostic parsing (base 0).
fn parse_radix(text: &str) -> Option<(&str, u32, bool)> {
    let (neg, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if text.is_empty() {
        return None;
    }
    if let Some(hex_digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return Some((hex_digits, 16, neg));
    }
    if text.len() > 1 && text.starts_with('0') {
        return Some((&text[1..], 8, neg));
    }
    Some((text, 10, neg))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_every_tag() {
        let values = vec![
            Value::Undef,
            Value::Data(vec![0xde, 0xad, 0xbe, 0xef]),
            Value::cstring("blue"),
            Value::I32(-7),
            Value::U32(42),
            Value::I64(-1234567890123),
            Value::U64(9876543210),
            Value::Float(3.5),
            Value::Double(2.71828),
        ];
        for v in values {
            let encoded = v.encode();
            let decoded = Value::decode(&encoded).expect("decode should succeed");
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut bytes = Value::U32(1).encode();
        bytes[1] = 99; // lie about the length
        assert!(Value::decode(&bytes).is_err());
    }

    #[test]
    fn decode_empty_data_roundtrips() {
        let v = Value::Data(Vec::new());
        let encoded = v.encode();
        assert_eq!(Value::decode(&encoded).unwrap(), v);
    }

    #[test]
    fn parse_defaults_to_cstring_without_prefix() {
        let v = Value::parse("hello").unwrap();
        assert_eq!(v, Value::cstring("hello"));
    }

    #[test]
    fn parse_numeric_variants() {
        assert_eq!(Value::parse("u32:42").unwrap(), Value::U32(42));
        assert_eq!(Value::parse("i32:-42").unwrap(), Value::I32(-42));
        assert_eq!(Value::parse("i64:-1").unwrap(), Value::I64(-1));
        assert_eq!(Value::parse("u64:0x10").unwrap(), Value::U64(16));
        assert_eq!(Value::parse("float:1.5").unwrap(), Value::Float(1.5));
        assert_eq!(Value::parse("double:2.5").unwrap(), Value::Double(2.5));
    }

    #[test]
    fn parse_rejects_out_of_range_i32() {
        assert!(Value::parse("i32:99999999999").is_err());
    }

    #[test]
    fn parse_data_accepts_optional_0x_prefix() {
        assert_eq!(
            Value::parse("data:0xdeadbeef").unwrap(),
            Value::Data(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(
            Value::parse("data:deadbeef").unwrap(),
            Value::Data(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn format_without_tag_strips_trailing_nul_from_cstring() {
        let v = Value::cstring("blue");
        assert_eq!(v.format(false), "blue");
        assert_eq!(v.format(true), "cstring:blue");
    }

    #[test]
    fn format_ellipsizes_long_data() {
        let v = Value::Data(vec![0xab; 64]);
        let s = v.format(false);
        assert!(s.contains("..."));
    }
}
