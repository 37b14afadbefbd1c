//! Stream protocol wire framing for the I/O server.
//!
//! A request is fixed-header (`op`, timestamp, key) immediately followed
//! by a value header and, for `Set`, the value's payload. A reply is an
//! optional value header/payload (on a successful `Get`) followed by the
//! trailing `i32 result_code` every reply ends with.

use std::io::{self, Read, Write};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::value::Value;

/// Key field width on the wire, NUL-padded.
pub const NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get = 0,
    Set = 1,
    Del = 2,
}

impl Op {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Op::Get),
            1 => Some(Op::Set),
            2 => Some(Op::Del),
            _ => None,
        }
    }
}

/// A decoded request frame.
pub struct Request {
    pub op: Op,
    pub created_mono_ns: i64,
    pub key: String,
    /// Present only for `Set`.
    pub value: Value,
}

/// The fixed part of a request, read before its value payload. Split out
/// so a server can inspect `payload_len` and choose to drain instead of
/// buffering an oversized `Set` payload without losing frame sync.
pub struct RequestHeader {
    pub op: Op,
    pub created_mono_ns: i64,
    pub key: String,
    pub value_tag: u8,
    pub payload_len: usize,
}

/// Read and decode just the header (everything up to, but not
/// including, the value payload). Returns `Ok(None)` on a clean EOF
/// before any bytes of a new frame arrive.
pub fn read_request_header(stream: &mut impl Read) -> io::Result<Option<RequestHeader>> {
    let mut header = [0u8; 1 + 8 + NAME_MAX];
    if !read_exact_or_eof(stream, &mut header)? {
        return Ok(None);
    }

    let op = Op::from_u8(header[0])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown opcode"))?;
    let created_mono_ns = i64::from_le_bytes(header[1..9].try_into().unwrap());
    let key_field: [u8; NAME_MAX] = header[9..9 + NAME_MAX].try_into().unwrap();
    let key = read_name(&key_field);

    let mut value_header = [0u8; 5];
    stream.read_exact(&mut value_header)?;
    let value_tag = value_header[0];
    let payload_len = u32::from_le_bytes(value_header[1..5].try_into().unwrap()) as usize;

    Ok(Some(RequestHeader {
        op,
        created_mono_ns,
        key,
        value_tag,
        payload_len,
    }))
}

/// Read the payload following a [`RequestHeader`] and decode it into a
/// [`Value`]. Only meaningful for `Set`; callers handling `Get`/`Del`
/// should use [`drain`] instead since `payload_len` is always `0` there.
pub fn read_payload(stream: &mut impl Read, header: &RequestHeader) -> io::Result<Value> {
    let mut payload = vec![0u8; header.payload_len];
    stream.read_exact(&mut payload)?;
    Value::from_parts(header.value_tag, &payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Process-local monotonic epoch, captured on first use. `Instant` has no
/// stable "nanos since boot" accessor, so `created_mono_ns` is nanoseconds
/// elapsed since this epoch rather than an absolute timestamp — it can
/// only ever move forward, unlike wall-clock time.
fn mono_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

fn now_mono_ns() -> i64 {
    mono_epoch().elapsed().as_nanos().min(i64::MAX as u128) as i64
}

fn write_name(out: &mut Vec<u8>, name: &str) -> io::Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_MAX {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "key too long"));
    }
    let mut field = [0u8; NAME_MAX];
    field[..bytes.len()].copy_from_slice(bytes);
    out.extend_from_slice(&field);
    Ok(())
}

fn read_name(buf: &[u8; NAME_MAX]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Encode a request frame: `[op][i64 created][key; NAME_MAX][value
/// header][payload if Set]`.
pub fn encode_request(op: Op, key: &str, value: &Value) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + 8 + NAME_MAX + 5);
    out.push(op as u8);
    out.extend_from_slice(&now_mono_ns().to_le_bytes());
    write_name(&mut out, key)?;
    match op {
        Op::Set => out.extend_from_slice(&value.encode()),
        Op::Get | Op::Del => {
            out.push(0);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }
    Ok(out)
}

/// Read and decode one whole request frame from `stream`. Returns
/// `Ok(None)` on a clean EOF before any bytes of a new frame arrive.
/// Servers that need to cap payload size before buffering it should use
/// [`read_request_header`] and [`read_payload`]/[`drain`] directly
/// instead of this convenience wrapper.
pub fn read_request(stream: &mut impl Read) -> io::Result<Option<Request>> {
    let header = match read_request_header(stream)? {
        Some(header) => header,
        None => return Ok(None),
    };
    let value = if header.op == Op::Set {
        read_payload(stream, &header)?
    } else {
        Value::Undef
    };
    Ok(Some(Request {
        op: header.op,
        created_mono_ns: header.created_mono_ns,
        key: header.key,
        value,
    }))
}

/// Drain exactly `len` bytes from `stream` without buffering them,
/// preserving the frame boundary for the next request on a connection
/// whose SET payload we decided not to accept.
pub fn drain(stream: &mut impl Read, len: usize) -> io::Result<()> {
    let mut remaining = len;
    let mut buf = [0u8; 4096];
    while remaining > 0 {
        let chunk = remaining.min(buf.len());
        stream.read_exact(&mut buf[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}

fn read_exact_or_eof(stream: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short frame header"))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// A successful `Get` reply: `[i64 duration_ns][value header][payload]`.
pub fn encode_get_ok(value: &Value, duration: Duration) -> Vec<u8> {
    let duration_ns = duration_to_wire_ns(duration);
    let mut out = Vec::new();
    out.extend_from_slice(&duration_ns.to_le_bytes());
    out.extend_from_slice(&value.encode());
    out
}

/// A failed `Get` reply: `[i64 0][undef header]`.
pub fn encode_get_err() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0i64.to_le_bytes());
    out.extend_from_slice(&Value::Undef.encode());
    out
}

/// The trailing result code every reply ends with.
pub fn encode_result_code(code: i32) -> [u8; 4] {
    code.to_le_bytes()
}

fn duration_to_wire_ns(duration: Duration) -> i64 {
    if duration == crate::cache::DURATION_INF {
        i64::MAX
    } else {
        duration.as_nanos().min(i64::MAX as u128) as i64
    }
}

pub fn write_all(stream: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_round_trips_for_set() {
        let encoded = encode_request(Op::Set, "foo.bar", &Value::U32(42)).unwrap();
        let mut cursor = Cursor::new(encoded);
        let request = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(request.op, Op::Set);
        assert_eq!(request.key, "foo.bar");
        assert_eq!(request.value, Value::U32(42));
    }

    #[test]
    fn request_round_trips_for_get() {
        let encoded = encode_request(Op::Get, "foo.bar", &Value::Undef).unwrap();
        let mut cursor = Cursor::new(encoded);
        let request = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(request.op, Op::Get);
        assert_eq!(request.value, Value::Undef);
    }

    #[test]
    fn read_request_returns_none_on_clean_eof() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_request(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn key_longer_than_name_max_is_rejected() {
        let long_key = "a".repeat(NAME_MAX);
        assert!(encode_request(Op::Get, &long_key, &Value::Undef).is_err());
    }

    #[test]
    fn get_ok_reply_carries_duration_and_value() {
        let reply = encode_get_ok(&Value::U32(7), Duration::from_secs(1));
        let duration_ns = i64::from_le_bytes(reply[0..8].try_into().unwrap());
        assert_eq!(duration_ns, 1_000_000_000);
    }

    #[test]
    fn infinite_duration_encodes_as_i64_max() {
        let reply = encode_get_ok(&Value::U32(7), crate::cache::DURATION_INF);
        let duration_ns = i64::from_le_bytes(reply[0..8].try_into().unwrap());
        assert_eq!(duration_ns, i64::MAX);
    }
}
