//! Single-node end-to-end scenarios over real Unix sockets: a basic
//! set/get round trip with and without the cache enabled, deletion, the
//! oversized-payload protocol resync boundary, and unregister-busy
//! semantics while a worker holds a route reference.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use prop::cache::DURATION_INF;
use prop::client::{io_socket_path, PropClient};
use prop::node::{CacheConfig, Node, NodeConfig, StaticStorage};
use prop::storage::file::FileStorage;
use prop::storage::Storage;
use prop::value::Value;
use prop::PropError;

fn unique_namespace(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("propd-test-{tag}-{}-{n}", std::process::id()))
}

#[test]
fn single_node_set_get_with_cache() {
    let dir = unique_namespace("set-get-cache");
    let config = NodeConfig {
        name: "root".to_string(),
        namespace_dir: dir.clone(),
        cache: Some(CacheConfig {
            default_duration: Duration::from_secs(1),
            ..CacheConfig::default()
        }),
        static_storages: vec![StaticStorage {
            name: "fs".to_string(),
            prefixes: vec!["*".to_string()],
            storage: Box::new(FileStorage::new(dir.join("fs"))),
        }],
        ..NodeConfig::default()
    };
    let mut node = Node::start(config).unwrap();

    let client = PropClient::new(io_socket_path(&dir, "root"));
    client.set("color", &Value::cstring("blue"), Duration::ZERO).unwrap();
    let (value, duration) = client.get("color").unwrap();

    assert_eq!(value, Value::cstring("blue"));
    assert!(duration <= Duration::from_secs(1));
    assert!(duration > Duration::ZERO);

    node.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn single_node_set_get_without_cache() {
    let dir = unique_namespace("set-get-nocache");
    let config = NodeConfig {
        name: "root".to_string(),
        namespace_dir: dir.clone(),
        cache: None,
        static_storages: vec![StaticStorage {
            name: "fs".to_string(),
            prefixes: vec!["*".to_string()],
            storage: Box::new(FileStorage::new(dir.join("fs"))),
        }],
        ..NodeConfig::default()
    };
    let mut node = Node::start(config).unwrap();

    let client = PropClient::new(io_socket_path(&dir, "root"));
    client.set("color", &Value::cstring("blue"), Duration::ZERO).unwrap();
    let (value, duration) = client.get("color").unwrap();

    assert_eq!(value, Value::cstring("blue"));
    assert_eq!(duration, DURATION_INF);

    node.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn del_removes_the_value() {
    let dir = unique_namespace("del");
    let config = NodeConfig {
        name: "root".to_string(),
        namespace_dir: dir.clone(),
        static_storages: vec![StaticStorage {
            name: "fs".to_string(),
            prefixes: vec!["*".to_string()],
            storage: Box::new(FileStorage::new(dir.join("fs"))),
        }],
        ..NodeConfig::default()
    };
    let mut node = Node::start(config).unwrap();

    let client = PropClient::new(io_socket_path(&dir, "root"));
    client.set("x", &Value::U32(1), Duration::ZERO).unwrap();
    client.del("x").unwrap();
    let err = client.get("x").unwrap_err();
    assert!(matches!(err, PropError::NotFound));

    node.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn protocol_resync_after_an_oversized_set_payload() {
    use std::io::{Read, Write};

    let dir = unique_namespace("resync");
    let config = NodeConfig {
        name: "root".to_string(),
        namespace_dir: dir.clone(),
        static_storages: vec![StaticStorage {
            name: "fs".to_string(),
            prefixes: vec!["*".to_string()],
            storage: Box::new(FileStorage::new(dir.join("fs"))),
        }],
        ..NodeConfig::default()
    };
    let mut node = Node::start(config).unwrap();

    let io_path = io_socket_path(&dir, "root");
    let mut stream = prop::abstract_socket::connect_abstract_stream(&io_path).unwrap();

    // A SET whose payload exceeds the server's buffering limit. It must
    // be drained (the client still has to send every announced byte —
    // this is not a short write) and answered with an error, without
    // losing the frame boundary for the next request on the connection.
    const OVERSIZED: usize = 16 * 1024 * 1024 + 1;
    let request = prop::proto::io_frame::encode_request(
        prop::proto::io_frame::Op::Set,
        "k",
        &Value::Data(vec![0u8; OVERSIZED]),
    )
    .unwrap();
    stream.write_all(&request).unwrap();

    let mut reply_code = [0u8; 4];
    stream.read_exact(&mut reply_code).unwrap();
    assert_eq!(i32::from_le_bytes(reply_code), PropError::Invalid.code());

    // The connection is still in sync: a subsequent GET on it works.
    stream
        .write_all(&prop::proto::io_frame::encode_request(prop::proto::io_frame::Op::Get, "missing", &Value::Undef).unwrap())
        .unwrap();
    let mut duration_buf = [0u8; 8];
    stream.read_exact(&mut duration_buf).unwrap();
    let mut value_header = [0u8; 5];
    stream.read_exact(&mut value_header).unwrap();
    let mut get_reply_code = [0u8; 4];
    stream.read_exact(&mut get_reply_code).unwrap();
    assert_eq!(i32::from_le_bytes(get_reply_code), PropError::NotFound.code());

    node.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

struct BlockingStorage {
    gate: std::sync::mpsc::Receiver<()>,
}

impl Storage for BlockingStorage {
    fn get(&self, _key: &str) -> Result<(Value, Duration), prop::storage::StorageError> {
        let _ = self.gate.recv();
        Ok((Value::U32(1), DURATION_INF))
    }
}

#[test]
fn unregister_is_busy_while_a_worker_holds_a_reference() {
    let dir = unique_namespace("busy");
    let (tx, rx) = std::sync::mpsc::channel();
    let config = NodeConfig {
        name: "root".to_string(),
        namespace_dir: dir.clone(),
        static_storages: vec![StaticStorage {
            name: "slow".to_string(),
            prefixes: vec!["*".to_string()],
            storage: Box::new(BlockingStorage { gate: rx }),
        }],
        ..NodeConfig::default()
    };
    let node = Node::start(config).unwrap();

    let io_path = io_socket_path(&dir, "root");
    let handle = std::thread::spawn(move || {
        let client = PropClient::new(io_path);
        let _ = client.get("anything");
    });

    // Give the worker a moment to enter the blocking `get`.
    std::thread::sleep(Duration::from_millis(50));
    assert!(matches!(node.route().unregister(Some("slow")), Err(prop::route::RouteError::Busy)));

    tx.send(()).unwrap();
    handle.join().unwrap();

    assert!(node.route().unregister(Some("slow")).is_ok());
}
