//! Drive Service (drivesrv)
//!
//! Polls a Siemens S7 controller for a fixed table of drive records, keeps the
//! last-known state of every drive, publishes per-cycle change batches and
//! writes operator commands back into the same data block.
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ PlcTransport │◄──│ ConnectionManager  │◄──│ DrivePoller  │──► ChangePublisher
//! │ (S7/virtual) │   │ (serialized I/O)   │   │ (registry)   │──► EventSink
//! └──────────────┘   └────────────────────┘   └──────────────┘
//!                              ▲
//!                    ┌────────────────────┐
//!                    │ CommandDispatcher  │◄── REST API
//!                    └────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod protocols;
pub mod runtime;

pub use error::{DriveSrvError, Result};
