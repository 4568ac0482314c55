//! Controller transports
//!
//! `PlcTransport` is the session primitive the connection manager drives.
//! `s7` talks to a real controller; `virt` keeps a data block in memory.

pub mod s7;
pub mod transport;
pub mod virt;

pub use transport::PlcTransport;
