//! Linux abstract-namespace UNIX sockets for client-side addresses.
//!
//! Std's unix socket types can `bind`/`connect` to filesystem paths but
//! not to the abstract namespace (a path whose first byte is NUL,
//! unbacked by any inode) — that needs a raw `sockaddr_un` built by hand.
//! Servers in this crate always bind to real filesystem paths; only
//! client-side sockets use the abstract namespace, to get a collision-free
//! address without leaving a file behind.

use std::io;
use std::mem;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random alphanumeric bytes used for the abstract name, before the `X`
/// sentinel byte.
const RANDOM_NAME_LEN: usize = 107;

/// Generate a random abstract socket name: `\0` + 107 random alphanumeric
/// bytes + `X`.
pub fn random_abstract_name() -> Vec<u8> {
    let mut name = Vec::with_capacity(1 + RANDOM_NAME_LEN + 1);
    name.push(0u8);
    let mut rng = rand::thread_rng();
    name.extend((0..RANDOM_NAME_LEN).map(|_| rng.sample(Alphanumeric)));
    name.push(b'X');
    name
}

fn sockaddr_un_for(abstract_name: &[u8]) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let path_capacity = addr.sun_path.len();
    if abstract_name.len() > path_capacity {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "abstract name too long"));
    }
    for (slot, byte) in addr.sun_path.iter_mut().zip(abstract_name.iter()) {
        *slot = *byte as libc::c_char;
    }
    let len = (mem::size_of::<libc::sa_family_t>() + abstract_name.len()) as libc::socklen_t;
    Ok((addr, len))
}

fn check(result: libc::c_int) -> io::Result<libc::c_int> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

/// Create a `SOCK_DGRAM` UNIX socket bound to a fresh random abstract
/// address, ready to be used as a control-protocol client socket.
pub fn bind_abstract_datagram() -> io::Result<UnixDatagram> {
    let fd = unsafe { check(libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM, 0))? };
    let name = random_abstract_name();
    let (addr, len) = sockaddr_un_for(&name)?;
    let bind_result = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if let Err(e) = check(bind_result) {
        unsafe { libc::close(fd) };
        return Err(e);
    }
    Ok(unsafe { UnixDatagram::from_raw_fd(fd) })
}

/// Create a `SOCK_STREAM` UNIX socket bound to a fresh random abstract
/// address and connected to `target`.
pub fn connect_abstract_stream(target: &Path) -> io::Result<UnixStream> {
    let fd = unsafe { check(libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0))? };
    let name = random_abstract_name();
    let (addr, len) = sockaddr_un_for(&name)?;
    let bind_result = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if let Err(e) = check(bind_result) {
        unsafe { libc::close(fd) };
        return Err(e);
    }

    let target_bytes = target.as_os_str().as_encoded_bytes();
    let (target_addr, target_len) = sockaddr_un_for(target_bytes).map_err(|e| {
        unsafe { libc::close(fd) };
        e
    })?;
    let connect_result = unsafe {
        libc::connect(
            fd,
            &target_addr as *const libc::sockaddr_un as *const libc::sockaddr,
            target_len,
        )
    };
    if let Err(e) = check(connect_result) {
        unsafe { libc::close(fd) };
        return Err(e);
    }
    Ok(unsafe { UnixStream::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_name_has_expected_shape() {
        let name = random_abstract_name();
        assert_eq!(name.len(), 1 + RANDOM_NAME_LEN + 1);
        assert_eq!(name[0], 0);
        assert_eq!(*name.last().unwrap(), b'X');
    }

    #[test]
    fn bind_abstract_datagram_succeeds() {
        let socket = bind_abstract_datagram().unwrap();
        drop(socket);
    }

    #[test]
    fn two_abstract_binds_do_not_collide() {
        let a = bind_abstract_datagram().unwrap();
        let b = bind_abstract_datagram().unwrap();
        drop(a);
        drop(b);
    }
}
