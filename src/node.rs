//! Node orchestrator: wires every component into a running `propd`
//! instance, drives the parent/child bootstrap handshake, and owns the
//! shutdown sequence.
//!
//! Construction order: namespace directory, worker pool, named-mutex
//! namespace, cache (iff configured), route table seeded with any
//! statically supplied storages, I/O server, control server, bootstrap.
//! Teardown (triggered by [`Node::run`] catching `SIGINT`/`SIGTERM`, or by
//! dropping the [`Node`] directly) unwinds in reverse: deregister from
//! parents, stop both accept loops, drop the route table, stop the cache
//! cleaner, shut down the worker pool, unlink the sockets.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::cache::Cache;
use crate::client::{ctrl_socket_path, io_socket_path, CtrlClient, DEFAULT_NAMESPACE_ROOT};
use crate::nmutex::NamedMutexNamespace;
use crate::pool::WorkerPool;
use crate::route::RouteTable;
use crate::server::ctrl_server::{CtrlServer, SelfInfo};
use crate::server::io_server::IoServer;
use crate::storage::Storage;

/// TTL parameters for an enabled cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub default_duration: Duration,
    pub min_duration: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            default_duration: Duration::from_secs(1),
            min_duration: Duration::from_millis(1),
        }
    }
}

/// A storage registered before the node starts serving requests, as
/// opposed to one grafted in later via `register_child`.
pub struct StaticStorage {
    pub name: String,
    pub prefixes: Vec<String>,
    pub storage: Box<dyn Storage>,
}

/// Everything needed to build a [`Node`]. Populated by the `propd`
/// binary's CLI wiring; every field here maps directly onto a CLI flag or
/// environment variable.
pub struct NodeConfig {
    pub name: String,
    /// Root directory the control/I/O sockets are created under.
    /// Overridable by the `propd_namespace` environment variable.
    pub namespace_dir: PathBuf,
    /// `0` auto-sizes from available parallelism (see [`WorkerPool::new`]).
    pub worker_threads: usize,
    /// `0` defaults to `worker_threads`.
    pub task_queue_len: usize,
    pub cache: Option<CacheConfig>,
    pub static_storages: Vec<StaticStorage>,
    /// Keys this node offers to a parent's cache-now snapshot when it
    /// registers itself as that parent's child.
    pub caches_now: Vec<String>,
    /// Prefixes this node asks a parent to route to it.
    pub prefixes: Vec<String>,
    /// Child node names to send a bootstrap `register_parent` to.
    pub bootstrap_children: Vec<String>,
    /// Parent node names to bootstrap-register this node into.
    pub bootstrap_parents: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let namespace_dir = std::env::var("propd_namespace")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_NAMESPACE_ROOT));
        NodeConfig {
            name: "default".to_string(),
            namespace_dir,
            worker_threads: 0,
            task_queue_len: 0,
            cache: Some(CacheConfig::default()),
            static_storages: Vec::new(),
            caches_now: Vec::new(),
            prefixes: Vec::new(),
            bootstrap_children: Vec::new(),
            bootstrap_parents: Vec::new(),
        }
    }
}

/// A running `propd` instance: the accept loops, worker pool, route
/// table, cache, and named-mutex namespace that back them.
pub struct Node {
    name: String,
    namespace_dir: PathBuf,
    pool: Arc<WorkerPool>,
    nmutex: Arc<NamedMutexNamespace>,
    cache: Option<Arc<Cache>>,
    route: Arc<RouteTable>,
    io_server: Option<IoServer>,
    ctrl_server: Option<CtrlServer>,
    self_info: Arc<SelfInfo>,
    bootstrap_parents: Vec<String>,
    shutdown: AtomicBool,
}

impl Node {
    /// Build and start a node: create the namespace directory, wire up
    /// every component in construction order, bind both sockets, and
    /// fire the bootstrap handshake. Returns once both accept loops are
    /// listening; bootstrap itself is best-effort and does not block
    /// startup on failure.
    pub fn start(config: NodeConfig) -> std::io::Result<Node> {
        std::fs::create_dir_all(&config.namespace_dir)?;

        let pool = WorkerPool::new(config.worker_threads, config.task_queue_len);
        let nmutex = Arc::new(NamedMutexNamespace::new());
        let cache = config.cache.map(|c| {
            Cache::new(c.min_interval, c.max_interval, c.default_duration, c.min_duration)
        });

        let route = Arc::new(RouteTable::new());
        for static_storage in config.static_storages {
            route
                .register(&static_storage.name, static_storage.prefixes, static_storage.storage)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        }

        let io_path = io_socket_path(&config.namespace_dir, &config.name);
        let io_server = IoServer::bind(io_path, pool.clone(), route.clone(), nmutex.clone(), cache.clone())?;

        let self_info = Arc::new(SelfInfo {
            name: config.name.clone(),
            caches_now: config.caches_now,
            prefixes: config.prefixes,
            namespace_root: config.namespace_dir.clone(),
        });

        let ctrl_path = ctrl_socket_path(&config.namespace_dir, &config.name);
        let ctrl_server = CtrlServer::bind(
            ctrl_path,
            pool.clone(),
            route.clone(),
            nmutex.clone(),
            cache.clone(),
            self_info.clone(),
        )?;

        let node = Node {
            name: config.name,
            namespace_dir: config.namespace_dir,
            pool,
            nmutex,
            cache,
            route,
            io_server: Some(io_server),
            ctrl_server: Some(ctrl_server),
            self_info,
            bootstrap_parents: config.bootstrap_parents.clone(),
            shutdown: AtomicBool::new(false),
        };

        node.bootstrap(&config.bootstrap_children, &config.bootstrap_parents);
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> &Arc<RouteTable> {
        &self.route
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    /// For each `bootstrap_children` entry, ask that node to treat us as
    /// its parent (it will come back with its own `register_child`).
    /// For each `bootstrap_parents` entry, register ourselves into it
    /// directly. Both are best-effort: failures are logged and counted,
    /// never fatal to startup.
    fn bootstrap(&self, bootstrap_children: &[String], bootstrap_parents: &[String]) {
        let mut failures = 0usize;
        for child in bootstrap_children {
            let path = ctrl_socket_path(&self.namespace_dir, child);
            let client = CtrlClient::new(path);
            if let Err(e) = client.register_parent(&self.name) {
                warn!("bootstrap: register_parent({child}) failed: {e}");
                failures += 1;
            }
        }
        for parent in bootstrap_parents {
            let path = ctrl_socket_path(&self.namespace_dir, parent);
            let client = CtrlClient::new(path);
            if let Err(e) = client.register_child(&self.name, &self.self_info.caches_now, &self.self_info.prefixes) {
                warn!("bootstrap: register_child into {parent} failed: {e}");
                failures += 1;
            }
        }
        if failures > 0 {
            warn!("bootstrap completed with {failures} failure(s)");
        }
    }

    /// Block until `SIGINT` or `SIGTERM`, then shut down.
    pub fn run(&mut self) -> std::io::Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        info!("node {} running (pid {})", self.name, std::process::id());
        for signal in signals.forever() {
            info!("node {} received signal {signal}, shutting down", self.name);
            break;
        }
        self.shutdown();
        Ok(())
    }

    /// Deregister from every bootstrap parent, stop both accept loops,
    /// drain the route table, stop the cache cleaner, and shut down the
    /// worker pool. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for parent in &self.bootstrap_parents {
            let path = ctrl_socket_path(&self.namespace_dir, parent);
            let client = CtrlClient::new(path);
            if let Err(e) = client.unregister_child(Some(&self.name)) {
                warn!("shutdown: unregister_parent({parent}) failed: {e}");
            }
        }

        self.io_server.take();
        self.ctrl_server.take();

        while self.route.unregister(None).is_ok() {}

        if let Some(cache) = &self.cache {
            cache.shutdown();
        }

        self.pool.shutdown();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::FileStorage;

    fn unique_namespace() -> PathBuf {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("propd-node-test-{}-{n}", std::process::id()))
    }

    #[test]
    fn start_and_shutdown_a_single_node() {
        let dir = unique_namespace();
        let storage_dir = dir.join("fs");
        let config = NodeConfig {
            name: "root".to_string(),
            namespace_dir: dir.clone(),
            static_storages: vec![StaticStorage {
                name: "fs".to_string(),
                prefixes: vec!["*".to_string()],
                storage: Box::new(FileStorage::new(storage_dir)),
            }],
            ..NodeConfig::default()
        };
        let mut node = Node::start(config).unwrap();
        assert_eq!(node.name(), "root");
        assert!(!node.route().is_empty());
        node.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn set_then_get_round_trips_through_the_running_node() {
        let dir = unique_namespace();
        let storage_dir = dir.join("fs");
        let config = NodeConfig {
            name: "root2".to_string(),
            namespace_dir: dir.clone(),
            static_storages: vec![StaticStorage {
                name: "fs".to_string(),
                prefixes: vec!["*".to_string()],
                storage: Box::new(FileStorage::new(storage_dir)),
            }],
            ..NodeConfig::default()
        };
        let mut node = Node::start(config).unwrap();

        let io_path = io_socket_path(&dir, "root2");
        let client = crate::client::PropClient::new(io_path);
        client.set("color", &crate::value::Value::cstring("blue"), Duration::ZERO).unwrap();
        let (value, _duration) = client.get("color").unwrap();
        assert_eq!(value, crate::value::Value::cstring("blue"));

        node.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
