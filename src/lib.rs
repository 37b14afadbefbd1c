//! `prop` — client library and server engine for `propd`, a hierarchical,
//! in-process property service.
//!
//! A `propd` node owns a [`route::RouteTable`] of named [`storage::Storage`]
//! backends reachable by key prefix, an optional [`cache::Cache`] in front
//! of them, and two local Unix sockets: a stream **I/O channel**
//! (`get`/`set`/`del`, see [`proto::io_frame`] and [`server::io_server`]) and
//! a datagram **control channel** (register/unregister/dump, see
//! [`proto::ctrl_frame`] and [`server::ctrl_server`]). Nodes compose into a
//! tree: a child's `register_parent` call causes the parent to graft the
//! child's prefixes into its own route table as a [`storage::nested_unix`]
//! backend.
//!
//! [`node::Node`] wires all of this together; [`client::PropClient`] and
//! [`client::CtrlClient`] are the corresponding client stubs used both by
//! end users and by nodes talking to each other.

pub mod abstract_socket;
pub mod cache;
pub mod client;
pub mod error;
pub mod nmutex;
pub mod node;
pub mod pool;
pub mod proto;
pub mod route;
pub mod server;
pub mod storage;
pub mod value;

pub use error::{PropError, PropResult};
pub use node::{CacheConfig, Node, NodeConfig};
pub use value::Value;

/// Re-export of the crate version, for banners and `dump_*` diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
