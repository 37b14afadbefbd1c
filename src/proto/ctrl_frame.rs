//! Datagram protocol wire framing for the control channel.
//!
//! Every datagram starts with a `u8` opcode. `register_child` carries a
//! name plus two name lists (cache-now keys and prefixes); every other
//! opcode carries at most a single name. Every reply ends with a
//! trailing `i32 result_code`; the two dump opcodes additionally prefix
//! their payload with an `i32` length.

use std::io;

/// Name field width on the wire, NUL-padded.
pub const NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    RegisterChild = 0,
    RegisterParent = 1,
    UnregisterChild = 2,
    UnregisterParent = 3,
    DumpDbRoute = 4,
    DumpDbCache = 5,
}

impl Opcode {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Opcode::RegisterChild),
            1 => Some(Opcode::RegisterParent),
            2 => Some(Opcode::UnregisterChild),
            3 => Some(Opcode::UnregisterParent),
            4 => Some(Opcode::DumpDbRoute),
            5 => Some(Opcode::DumpDbCache),
            _ => None,
        }
    }
}

/// A decoded control request.
pub enum CtrlRequest {
    RegisterChild {
        name: String,
        caches: Vec<String>,
        prefixes: Vec<String>,
    },
    RegisterParent {
        name: String,
    },
    UnregisterChild {
        /// `None` means "unregister every item".
        name: Option<String>,
    },
    UnregisterParent {
        name: String,
    },
    DumpDbRoute,
    DumpDbCache,
}

fn write_name(out: &mut Vec<u8>, name: &str) -> io::Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_MAX {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "name too long"));
    }
    let mut field = [0u8; NAME_MAX];
    field[..bytes.len()].copy_from_slice(bytes);
    out.extend_from_slice(&field);
    Ok(())
}

fn read_name(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Encode a `register_child` datagram.
pub fn encode_register_child(name: &str, caches: &[String], prefixes: &[String]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(Opcode::RegisterChild as u8);
    write_name(&mut out, name)?;
    out.extend_from_slice(&(caches.len() as u32).to_le_bytes());
    out.extend_from_slice(&(prefixes.len() as u32).to_le_bytes());
    for entry in caches.iter().chain(prefixes.iter()) {
        write_name(&mut out, entry)?;
    }
    Ok(out)
}

/// Encode a single-name datagram (`register_parent`, `unregister_parent`,
/// or `unregister_child` with a concrete name).
pub fn encode_named(opcode: Opcode, name: &str) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(opcode as u8);
    write_name(&mut out, name)?;
    Ok(out)
}

/// Encode an `unregister_child` datagram that removes every registered
/// item (an all-zero name field).
pub fn encode_unregister_child_all() -> Vec<u8> {
    let mut out = Vec::new();
    out.push(Opcode::UnregisterChild as u8);
    out.extend_from_slice(&[0u8; NAME_MAX]);
    out
}

/// Encode a zero-argument dump request.
pub fn encode_dump(opcode: Opcode) -> Vec<u8> {
    vec![opcode as u8]
}

/// Decode a received datagram into a [`CtrlRequest`].
pub fn decode(bytes: &[u8]) -> Result<CtrlRequest, io::Error> {
    if bytes.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty datagram"));
    }
    let opcode = Opcode::from_u8(bytes[0])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown opcode"))?;
    let body = &bytes[1..];

    match opcode {
        Opcode::RegisterChild => {
            if body.len() < NAME_MAX + 8 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "short register_child frame"));
            }
            let name = read_name(&body[..NAME_MAX]);
            let n_caches = u32::from_le_bytes(body[NAME_MAX..NAME_MAX + 4].try_into().unwrap()) as usize;
            let n_prefixes =
                u32::from_le_bytes(body[NAME_MAX + 4..NAME_MAX + 8].try_into().unwrap()) as usize;
            let list_start = NAME_MAX + 8;
            let total_entries = n_caches + n_prefixes;
            if body.len() < list_start + total_entries * NAME_MAX {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "short name list"));
            }
            let mut entries = Vec::with_capacity(total_entries);
            for i in 0..total_entries {
                let start = list_start + i * NAME_MAX;
                entries.push(read_name(&body[start..start + NAME_MAX]));
            }
            let prefixes = entries.split_off(n_caches);
            Ok(CtrlRequest::RegisterChild {
                name,
                caches: entries,
                prefixes,
            })
        }
        Opcode::RegisterParent => Ok(CtrlRequest::RegisterParent {
            name: read_single_name(body)?,
        }),
        Opcode::UnregisterChild => {
            let name = read_single_name(body)?;
            Ok(CtrlRequest::UnregisterChild {
                name: if name.is_empty() { None } else { Some(name) },
            })
        }
        Opcode::UnregisterParent => Ok(CtrlRequest::UnregisterParent {
            name: read_single_name(body)?,
        }),
        Opcode::DumpDbRoute => Ok(CtrlRequest::DumpDbRoute),
        Opcode::DumpDbCache => Ok(CtrlRequest::DumpDbCache),
    }
}

fn read_single_name(body: &[u8]) -> io::Result<String> {
    if body.len() < NAME_MAX {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short name frame"));
    }
    Ok(read_name(&body[..NAME_MAX]))
}

/// Reply payload for a non-dump opcode: just the trailing result code.
pub fn encode_reply(result_code: i32) -> Vec<u8> {
    result_code.to_le_bytes().to_vec()
}

/// Reply payload for a dump opcode: `[i32 length][length bytes][i32
/// result_code]`.
pub fn encode_dump_reply(dump: &[u8], result_code: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + dump.len() + 4);
    out.extend_from_slice(&(dump.len() as u32).to_le_bytes());
    out.extend_from_slice(dump);
    out.extend_from_slice(&result_code.to_le_bytes());
    out
}
