//! Parent/child composition: a child node's prefixes get grafted into a
//! parent's route table via `register_parent`, with a cache-now snapshot
//! taken at registration time, and `unregister_parent` tears the graft
//! back down.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use prop::client::{ctrl_socket_path, io_socket_path, CtrlClient, PropClient};
use prop::node::{Node, NodeConfig, StaticStorage};
use prop::storage::file::FileStorage;
use prop::value::Value;

fn unique_namespace(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("propd-test-{tag}-{}-{n}", std::process::id()))
}

#[test]
fn parent_child_grafting_and_teardown() {
    let dir = unique_namespace("parent-child");

    let config_a = NodeConfig {
        name: "A".to_string(),
        namespace_dir: dir.clone(),
        static_storages: vec![StaticStorage {
            name: "fs".to_string(),
            prefixes: vec!["*".to_string()],
            storage: Box::new(FileStorage::new(dir.join("a-fs"))),
        }],
        ..NodeConfig::default()
    };
    let mut node_a = Node::start(config_a).unwrap();

    let config_b = NodeConfig {
        name: "B".to_string(),
        namespace_dir: dir.clone(),
        static_storages: vec![StaticStorage {
            name: "fs".to_string(),
            prefixes: vec!["b.*".to_string()],
            storage: Box::new(FileStorage::new(dir.join("b-fs"))),
        }],
        caches_now: vec!["b.k1".to_string()],
        prefixes: vec!["b.*".to_string()],
        ..NodeConfig::default()
    };
    let mut node_b = Node::start(config_b).unwrap();

    // Seed the value B will snapshot into A's cache at registration.
    let client_b = PropClient::new(io_socket_path(&dir, "B"));
    client_b.set("b.k1", &Value::cstring("from-b"), Duration::ZERO).unwrap();

    // B.register_parent(A): B asks A to treat it as a child, which makes
    // B turn around and send A a register_child carrying B's own
    // configured cache-now keys and prefixes.
    let ctrl_b = CtrlClient::new(ctrl_socket_path(&dir, "B"));
    ctrl_b.register_parent("A").unwrap();

    // A's route table now answers "b.k1" via the nested-unix storage
    // pointing at B, and A's cache holds the snapshot taken at
    // registration time.
    assert!(node_a.route().match_key("b.k1").is_ok());
    let (cached_value, _) = node_a.cache().unwrap().get("b.k1").unwrap();
    assert_eq!(cached_value, Value::cstring("from-b"));

    // A set through A for a B-owned key reaches B's file backend.
    let client_a = PropClient::new(io_socket_path(&dir, "A"));
    client_a.set("b.k2", &Value::U32(7), Duration::ZERO).unwrap();
    let (value, _) = client_b.get("b.k2").unwrap();
    assert_eq!(value, Value::U32(7));

    // B deregisters from A; the graft is torn down.
    let ctrl_b = CtrlClient::new(ctrl_socket_path(&dir, "B"));
    ctrl_b.unregister_parent("A").unwrap();
    assert!(node_a.route().match_key("b.k1").is_err());

    node_a.shutdown();
    node_b.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn register_child_with_no_caches_and_no_prefixes_is_invalid() {
    let dir = unique_namespace("invalid-register");
    let config_a = NodeConfig {
        name: "A".to_string(),
        namespace_dir: dir.clone(),
        ..NodeConfig::default()
    };
    let mut node_a = Node::start(config_a).unwrap();

    let ctrl_a = CtrlClient::new(ctrl_socket_path(&dir, "A"));
    let err = ctrl_a.register_child("nobody", &[], &[]).unwrap_err();
    assert!(matches!(err, prop::PropError::Invalid));

    node_a.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}
