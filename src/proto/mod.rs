//! Wire framing for both propd protocols: the stream I/O channel and the
//! datagram control channel.

pub mod ctrl_frame;
pub mod io_frame;
