//! Control server: accepts datagrams on the node's control socket and
//! dispatches register/unregister/dump requests to the worker pool.
//!
//! The same socket doubles as an outbound client when this node needs
//! to act on a parent or child (`register_parent`/`unregister_parent`
//! issue requests of their own against another node's control socket).

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info, warn};

use crate::abstract_socket::bind_abstract_datagram;
use crate::cache::Cache;
use crate::client::{ctrl_socket_path, io_socket_path};
use crate::nmutex::NamedMutexNamespace;
use crate::pool::WorkerPool;
use crate::proto::ctrl_frame::{self, CtrlRequest, Opcode};
use crate::route::RouteTable;
use crate::storage::nested_unix::NestedUnixStorage;

/// Everything the control handler needs to know about the node it is
/// serving, beyond the shared route/cache/pool/nmutex handles.
pub struct SelfInfo {
    pub name: String,
    pub caches_now: Vec<String>,
    pub prefixes: Vec<String>,
    pub namespace_root: PathBuf,
}

pub struct CtrlServer {
    socket: UnixDatagram,
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl CtrlServer {
    pub fn bind(
        path: impl Into<PathBuf>,
        pool: Arc<WorkerPool>,
        route: Arc<RouteTable>,
        nmutex: Arc<NamedMutexNamespace>,
        cache: Option<Arc<Cache>>,
        self_info: Arc<SelfInfo>,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let _ = std::fs::remove_file(&path);
        let socket = UnixDatagram::bind(&path)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let socket = socket.try_clone()?;
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("propd-ctrl-accept".to_string())
                .spawn(move || recv_loop(socket, pool, route, nmutex, cache, self_info, shutdown))
                .expect("failed to spawn control accept thread")
        };

        Ok(CtrlServer {
            socket,
            path,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblock `recv_from` with an empty wakeup datagram.
        if let Ok(wakeup) = bind_abstract_datagram() {
            let _ = wakeup.send_to(&[], &self.path);
        }
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for CtrlServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn recv_loop(
    socket: UnixDatagram,
    pool: Arc<WorkerPool>,
    route: Arc<RouteTable>,
    nmutex: Arc<NamedMutexNamespace>,
    cache: Option<Arc<Cache>>,
    self_info: Arc<SelfInfo>,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 64 * 1024];
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(result) => result,
            Err(e) => {
                warn!("ctrl recv failed: {e}");
                continue;
            }
        };
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let datagram = buf[..n].to_vec();
        let reply_socket = match socket.try_clone() {
            Ok(s) => s,
            Err(e) => {
                error!("failed to clone ctrl socket for reply: {e}");
                continue;
            }
        };
        let route = route.clone();
        let nmutex = nmutex.clone();
        let cache = cache.clone();
        let self_info = self_info.clone();
        let _ = pool.submit(
            move || {
                let reply = handle_datagram(&datagram, &route, &nmutex, cache.as_deref(), &self_info);
                if peer.is_unnamed() {
                    // No address to reply to.
                    return;
                }
                let _ = reply_socket.send_to_addr(&reply, &peer);
            },
            false,
        );
    }
}

fn handle_datagram(
    datagram: &[u8],
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
    self_info: &SelfInfo,
) -> Vec<u8> {
    if datagram.is_empty() {
        return ctrl_frame::encode_reply(crate::error::PropError::Invalid.code());
    }
    let request = match ctrl_frame::decode(datagram) {
        Ok(request) => request,
        Err(_) => return ctrl_frame::encode_reply(crate::error::PropError::Invalid.code()),
    };

    match request {
        CtrlRequest::RegisterChild { name, caches, prefixes } => {
            ctrl_frame::encode_reply(handle_register_child(&name, &caches, &prefixes, route, nmutex, cache, self_info))
        }
        CtrlRequest::RegisterParent { name } => {
            ctrl_frame::encode_reply(handle_register_parent(&name, self_info))
        }
        CtrlRequest::UnregisterChild { name } => {
            let result = route.unregister(name.as_deref());
            ctrl_frame::encode_reply(result.map_or_else(|e| crate::error::PropError::from(e).code(), |_| 0))
        }
        CtrlRequest::UnregisterParent { name } => {
            ctrl_frame::encode_reply(handle_unregister_parent(&name, self_info))
        }
        CtrlRequest::DumpDbRoute => {
            ctrl_frame::encode_dump_reply(&[], crate::error::PropError::NotSupported.code())
        }
        CtrlRequest::DumpDbCache => {
            ctrl_frame::encode_dump_reply(&[], crate::error::PropError::NotSupported.code())
        }
    }
}

fn handle_register_child(
    name: &str,
    caches: &[String],
    prefixes: &[String],
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
    self_info: &SelfInfo,
) -> i32 {
    if caches.is_empty() && prefixes.is_empty() {
        return crate::error::PropError::Invalid.code();
    }

    let child_io_path = io_socket_path(&self_info.namespace_root, name);
    let storage = NestedUnixStorage::shared(child_io_path);

    for key in caches {
        let _lock_guard = nmutex.lock(key);
        match storage.get(key) {
            Ok((value, duration)) => {
                if let Some(cache) = cache {
                    cache.set(key, value, duration);
                }
            }
            Err(e) => {
                warn!("register_child({name}): cache-now fetch of {key} failed: {e}");
                return crate::error::PropError::from(e).code();
            }
        }
    }

    if !prefixes.is_empty() {
        if let Err(e) = route.register(name, prefixes.to_vec(), Box::new(storage)) {
            return crate::error::PropError::from(e).code();
        }
    }

    info!("registered child {name} ({} prefixes)", prefixes.len());
    0
}

fn handle_register_parent(name: &str, self_info: &SelfInfo) -> i32 {
    let parent_ctrl_path = ctrl_socket_path(&self_info.namespace_root, name);
    let client = crate::client::CtrlClient::new(parent_ctrl_path);
    match client.register_child(&self_info.name, &self_info.caches_now, &self_info.prefixes) {
        Ok(()) => 0,
        Err(e) => {
            warn!("register_parent({name}) failed: {e}");
            e.code()
        }
    }
}

fn handle_unregister_parent(name: &str, self_info: &SelfInfo) -> i32 {
    let parent_ctrl_path = ctrl_socket_path(&self_info.namespace_root, name);
    let client = crate::client::CtrlClient::new(parent_ctrl_path);
    match client.unregister_child(Some(&self_info.name)) {
        Ok(()) => 0,
        Err(e) => {
            warn!("unregister_parent({name}) failed: {e}");
            e.code()
        }
    }
}

