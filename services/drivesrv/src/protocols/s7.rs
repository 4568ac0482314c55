//! Siemens S7 over ISO-on-TCP (RFC 1006)
//!
//! Frame layering: TPKT header, COTP data TPDU, S7 PDU.

pub mod client;
pub mod constants;
pub mod frame;

pub use client::{S7Client, S7Config};
