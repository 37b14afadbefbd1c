//! I/O server: accepts stream connections and answers `GET`/`SET`/`DEL`
//! requests against the cache, route table, and per-key locks of a node.
//!
//! The accept loop runs on its own thread and only enqueues; all request
//! handling — including reading the rest of the frame — happens on the
//! worker pool, so a slow or malicious client blocked mid-frame cannot
//! starve other connections' accept processing.

use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};

use crate::cache::Cache;
use crate::nmutex::NamedMutexNamespace;
use crate::pool::WorkerPool;
use crate::proto::io_frame::{self, Op, RequestHeader};
use crate::route::RouteTable;
use crate::value::Value;

/// Reject a `Set` payload larger than this instead of buffering it.
const MAX_SET_PAYLOAD: usize = 16 * 1024 * 1024;

pub struct IoServer {
    listener: UnixListener,
    path: PathBuf,
    pool: Arc<WorkerPool>,
    route: Arc<RouteTable>,
    nmutex: Arc<NamedMutexNamespace>,
    cache: Option<Arc<Cache>>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl IoServer {
    /// Bind the stream socket at `path` (removing any stale socket file
    /// first) and start the accept thread.
    pub fn bind(
        path: impl Into<PathBuf>,
        pool: Arc<WorkerPool>,
        route: Arc<RouteTable>,
        nmutex: Arc<NamedMutexNamespace>,
        cache: Option<Arc<Cache>>,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let listener = listener.try_clone()?;
            let pool = pool.clone();
            let route = route.clone();
            let nmutex = nmutex.clone();
            let cache = cache.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("propd-io-accept".to_string())
                .spawn(move || accept_loop(listener, pool, route, nmutex, cache, shutdown))
                .expect("failed to spawn I/O accept thread")
        };

        Ok(IoServer {
            listener,
            path,
            pool,
            route,
            nmutex,
            cache,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting new connections and join the accept thread. Does
    /// not touch the worker pool, route table, or cache — those are
    /// owned by the node and shut down separately.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblock `accept()` by connecting to ourselves once.
        let _ = UnixStream::connect(&self.path);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for IoServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: UnixListener,
    pool: Arc<WorkerPool>,
    route: Arc<RouteTable>,
    nmutex: Arc<NamedMutexNamespace>,
    cache: Option<Arc<Cache>>,
    shutdown: Arc<AtomicBool>,
) {
    for incoming in listener.incoming() {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!("io accept failed: {e}");
                continue;
            }
        };
        let route = route.clone();
        let nmutex = nmutex.clone();
        let cache = cache.clone();
        let _ = pool.submit(
            move || {
                serve_connection(stream, &route, &nmutex, cache.as_deref());
            },
            false,
        );
    }
}

fn serve_connection(
    mut stream: UnixStream,
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
) {
    loop {
        let header = match io_frame::read_request_header(&mut stream) {
            Ok(Some(header)) => header,
            Ok(None) => return,
            Err(e) => {
                debug!("io connection closed: {e}");
                return;
            }
        };

        let outcome = handle_request(&mut stream, &header, route, nmutex, cache);
        match outcome {
            Ok(()) => continue,
            Err(()) => return,
        }
    }
}

/// Handles one request already past its header. Returns `Err(())` when
/// the connection should be closed (I/O failure on send/recv).
fn handle_request(
    stream: &mut UnixStream,
    header: &RequestHeader,
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
) -> Result<(), ()> {
    match header.op {
        Op::Get => handle_get(stream, header, route, nmutex, cache),
        Op::Set => handle_set(stream, header, route, nmutex, cache),
        Op::Del => handle_del(stream, header, route, nmutex, cache),
    }
}

fn handle_get(
    stream: &mut UnixStream,
    header: &RequestHeader,
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
) -> Result<(), ()> {
    if let Some(cache) = cache {
        if let Ok((value, duration)) = cache.get(&header.key) {
            return send_get_ok(stream, &value, duration);
        }
    }

    let route_guard = match route.match_key(&header.key) {
        Ok(guard) => guard,
        Err(_) => return send_get_err(stream),
    };
    let _lock_guard = nmutex.lock(&header.key);
    match route_guard.storage().get(&header.key) {
        Ok((value, duration)) => {
            if let Some(cache) = cache {
                cache.set(&header.key, value.clone(), duration);
            }
            send_get_ok(stream, &value, duration)
        }
        Err(_) => send_get_err(stream),
    }
}

fn handle_set(
    stream: &mut UnixStream,
    header: &RequestHeader,
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
) -> Result<(), ()> {
    if header.payload_len > MAX_SET_PAYLOAD {
        if io_frame::drain(stream, header.payload_len).is_err() {
            return Err(());
        }
        return send_result_code(stream, crate::error::PropError::Invalid.code());
    }

    let value = match io_frame::read_payload(stream, header) {
        Ok(value) => value,
        Err(e) => {
            error!("failed to read set payload: {e}");
            return Err(());
        }
    };

    let result = (|| -> Result<(), i32> {
        let route_guard = route
            .match_key(&header.key)
            .map_err(|e| crate::error::PropError::from(e).code())?;
        let _lock_guard = nmutex.lock(&header.key);
        route_guard
            .storage()
            .set(&header.key, &value, Duration::ZERO)
            .map_err(|e| crate::error::PropError::from(e).code())?;
        if let Some(cache) = cache {
            cache.set(&header.key, value, Duration::ZERO);
        }
        Ok(())
    })();

    match result {
        Ok(()) => send_result_code(stream, 0),
        Err(code) => send_result_code(stream, code),
    }
}

fn handle_del(
    stream: &mut UnixStream,
    header: &RequestHeader,
    route: &RouteTable,
    nmutex: &NamedMutexNamespace,
    cache: Option<&Cache>,
) -> Result<(), ()> {
    let result = (|| -> Result<(), i32> {
        let route_guard = route
            .match_key(&header.key)
            .map_err(|e| crate::error::PropError::from(e).code())?;
        let _lock_guard = nmutex.lock(&header.key);
        route_guard
            .storage()
            .del(&header.key)
            .map_err(|e| crate::error::PropError::from(e).code())?;
        if let Some(cache) = cache {
            let _ = cache.del(&header.key);
        }
        Ok(())
    })();

    match result {
        Ok(()) => send_result_code(stream, 0),
        Err(code) => send_result_code(stream, code),
    }
}

fn send_get_ok(stream: &mut UnixStream, value: &Value, duration: Duration) -> Result<(), ()> {
    let body = io_frame::encode_get_ok(value, duration);
    if stream.write_all(&body).is_err() {
        return Err(());
    }
    send_result_code(stream, 0)
}

fn send_get_err(stream: &mut UnixStream) -> Result<(), ()> {
    let body = io_frame::encode_get_err();
    if stream.write_all(&body).is_err() {
        return Err(());
    }
    send_result_code(stream, crate::error::PropError::NotFound.code())
}

fn send_result_code(stream: &mut UnixStream, code: i32) -> Result<(), ()> {
    stream
        .write_all(&io_frame::encode_result_code(code))
        .map_err(|_| ())
}
