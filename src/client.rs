//! Client library: talks the I/O stream protocol and the control
//! datagram protocol to a running node, from the same process or
//! another one.

use std::io;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::abstract_socket::{bind_abstract_datagram, connect_abstract_stream};
use crate::error::PropError;
use crate::proto::ctrl_frame::{self, CtrlRequest, Opcode};
use crate::proto::io_frame::{self, Op};
use crate::value::Value;

/// Default namespace root servers bind their sockets under.
pub const DEFAULT_NAMESPACE_ROOT: &str = "/tmp";

/// Socket path convention shared by the node orchestrator and the client.
pub fn io_socket_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("propd.{name}.io"))
}

pub fn ctrl_socket_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("propd.{name}.ctrl"))
}

/// I/O protocol client. `GET`/`SET`/`DEL` against a node's stream socket.
///
/// A plain [`PropClient::new`] opens and closes a fresh connection for
/// every call ("temporary" mode). [`PropClient::new_shared`] instead keeps
/// one connection open and reuses it across calls ("long" mode),
/// serialized by an internal mutex so concurrent callers share rather than
/// race on the same stream; a call that hits an I/O error drops the cached
/// stream so the next call reconnects instead of reusing a socket left in
/// an unknown state.
pub struct PropClient {
    path: PathBuf,
    persistent: Option<Mutex<Option<UnixStream>>>,
}

impl PropClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PropClient { path: path.into(), persistent: None }
    }

    pub fn new_shared(path: impl Into<PathBuf>) -> Self {
        PropClient {
            path: path.into(),
            persistent: Some(Mutex::new(None)),
        }
    }

    fn connect(&self) -> io::Result<UnixStream> {
        connect_abstract_stream(&self.path)
    }

    /// Run `f` against a connected stream: a fresh one per call in
    /// temporary mode, or the cached one (connecting it first if absent)
    /// in long mode. The cached connection is dropped on any error from
    /// `f` so the next call starts clean.
    fn with_stream<T>(&self, f: impl FnOnce(&mut UnixStream) -> Result<T, PropError>) -> Result<T, PropError> {
        match &self.persistent {
            None => {
                let mut stream = self.connect()?;
                f(&mut stream)
            }
            Some(slot) => {
                let mut slot = slot.lock();
                if slot.is_none() {
                    *slot = Some(self.connect()?);
                }
                let result = f(slot.as_mut().expect("just populated"));
                if result.is_err() {
                    *slot = None;
                }
                result
            }
        }
    }

    pub fn get(&self, key: &str) -> Result<(Value, Duration), PropError> {
        self.with_stream(|stream| {
            io_frame::write_all(stream, &io_frame::encode_request(Op::Get, key, &Value::Undef)?)?;
            read_get_reply(stream)
        })
    }

    pub fn set(&self, key: &str, value: &Value, duration: Duration) -> Result<(), PropError> {
        let _ = duration;
        self.with_stream(|stream| {
            io_frame::write_all(stream, &io_frame::encode_request(Op::Set, key, value)?)?;
            read_result_code(stream)
        })
    }

    pub fn del(&self, key: &str) -> Result<(), PropError> {
        self.with_stream(|stream| {
            io_frame::write_all(stream, &io_frame::encode_request(Op::Del, key, &Value::Undef)?)?;
            read_result_code(stream)
        })
    }
}

fn read_get_reply(stream: &mut UnixStream) -> Result<(Value, Duration), PropError> {
    use std::io::Read;
    let mut duration_header = [0u8; 8];
    stream.read_exact(&mut duration_header)?;
    let duration_ns = i64::from_le_bytes(duration_header);

    let mut value_header = [0u8; 5];
    stream.read_exact(&mut value_header)?;
    let tag = value_header[0];
    let length = u32::from_le_bytes(value_header[1..5].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    let value = Value::from_parts(tag, &payload)?;

    let code = read_code(stream)?;
    if code != 0 {
        return Err(PropError::from_code(code));
    }

    let duration = if duration_ns == i64::MAX {
        crate::cache::DURATION_INF
    } else {
        Duration::from_nanos(duration_ns.max(0) as u64)
    };
    Ok((value, duration))
}

fn read_result_code(stream: &mut UnixStream) -> Result<(), PropError> {
    let code = read_code(stream)?;
    if code == 0 {
        Ok(())
    } else {
        Err(PropError::from_code(code))
    }
}

fn read_code(stream: &mut UnixStream) -> io::Result<i32> {
    use std::io::Read;
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Control protocol client. Every call opens a fresh abstract-namespace
/// datagram socket, sends one request, and waits for the reply.
pub struct CtrlClient {
    path: PathBuf,
}

impl CtrlClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CtrlClient { path: path.into() }
    }

    fn send_and_recv(&self, request: &[u8]) -> io::Result<Vec<u8>> {
        let socket = bind_abstract_datagram()?;
        socket.send_to(request, &self.path)?;
        let mut buf = [0u8; 64 * 1024];
        let n = socket.recv(&mut buf)?;
        Ok(buf[..n].to_vec())
    }

    pub fn register_child(&self, name: &str, caches: &[String], prefixes: &[String]) -> Result<(), PropError> {
        let request = ctrl_frame::encode_register_child(name, caches, prefixes)?;
        let reply = self.send_and_recv(&request)?;
        decode_simple_reply(&reply)
    }

    pub fn register_parent(&self, name: &str) -> Result<(), PropError> {
        let request = ctrl_frame::encode_named(Opcode::RegisterParent, name)?;
        let reply = self.send_and_recv(&request)?;
        decode_simple_reply(&reply)
    }

    pub fn unregister_child(&self, name: Option<&str>) -> Result<(), PropError> {
        let request = match name {
            Some(name) => ctrl_frame::encode_named(Opcode::UnregisterChild, name)?,
            None => ctrl_frame::encode_unregister_child_all(),
        };
        let reply = self.send_and_recv(&request)?;
        decode_simple_reply(&reply)
    }

    pub fn unregister_parent(&self, name: &str) -> Result<(), PropError> {
        let request = ctrl_frame::encode_named(Opcode::UnregisterParent, name)?;
        let reply = self.send_and_recv(&request)?;
        decode_simple_reply(&reply)
    }

    pub fn dump_route(&self) -> Result<Vec<u8>, PropError> {
        let reply = self.send_and_recv(&ctrl_frame::encode_dump(Opcode::DumpDbRoute))?;
        decode_dump_reply(&reply)
    }

    pub fn dump_cache(&self) -> Result<Vec<u8>, PropError> {
        let reply = self.send_and_recv(&ctrl_frame::encode_dump(Opcode::DumpDbCache))?;
        decode_dump_reply(&reply)
    }
}

fn decode_simple_reply(reply: &[u8]) -> Result<(), PropError> {
    if reply.len() < 4 {
        return Err(PropError::Invalid);
    }
    let code = i32::from_le_bytes(reply[..4].try_into().unwrap());
    if code == 0 {
        Ok(())
    } else {
        Err(PropError::from_code(code))
    }
}

fn decode_dump_reply(reply: &[u8]) -> Result<Vec<u8>, PropError> {
    if reply.len() < 4 {
        return Err(PropError::Invalid);
    }
    let length = u32::from_le_bytes(reply[0..4].try_into().unwrap()) as usize;
    if reply.len() < 4 + length + 4 {
        return Err(PropError::Invalid);
    }
    let dump = reply[4..4 + length].to_vec();
    let code = i32::from_le_bytes(reply[4 + length..4 + length + 4].try_into().unwrap());
    if code == 0 {
        Ok(dump)
    } else {
        Err(PropError::from_code(code))
    }
}

/// Minimal helper retained for callers that want a raw bound datagram
/// socket without going through [`CtrlClient`] (used by the control
/// server when it acts as a client during bootstrap).
pub fn bind_ctrl_reply_socket() -> io::Result<UnixDatagram> {
    bind_abstract_datagram()
}
