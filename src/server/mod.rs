//! Accept-loop servers for both propd protocols. Each server owns one
//! accept thread; request bodies run on the shared worker pool.

pub mod ctrl_server;
pub mod io_server;
