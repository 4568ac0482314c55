//! Transport session trait

use async_trait::async_trait;

use crate::error::Result;

/// One session to a controller data block area
///
/// Implementations are not safe for concurrent use; callers serialize access.
/// Any `Err` from an I/O method leaves the session in an undefined state and
/// the caller is expected to `close` it.
#[async_trait]
pub trait PlcTransport: Send + Sync {
    /// Establish the session (TCP connect plus protocol handshake)
    async fn open(&mut self) -> Result<()>;

    /// Read `len` bytes of data block `db` starting at byte `start`
    ///
    /// All-or-nothing: a partial read is reported as an error.
    async fn read_bytes(&mut self, db: u16, start: usize, len: usize) -> Result<Vec<u8>>;

    /// Set or clear a single bit without touching the other bits of that byte
    async fn write_bit(&mut self, db: u16, byte: usize, bit: u8, value: bool) -> Result<()>;

    /// Write raw bytes into data block `db` at byte `start`
    async fn write_bytes(&mut self, db: u16, start: usize, data: &[u8]) -> Result<()>;

    /// Release the session; safe to call repeatedly
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Human-readable peer description for logs
    fn endpoint(&self) -> String;
}
