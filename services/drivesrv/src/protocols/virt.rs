//! Virtual controller
//!
//! Keeps data blocks in memory so the service can run without hardware and
//! tests can drive the engine deterministically. A `VirtualPlcHandle` shares
//! the memory with the transport for inspection and fault injection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DriveSrvError, Result};
use crate::protocols::transport::PlcTransport;

/// One transport call as seen by the virtual controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcOp {
    Read { db: u16, start: usize, len: usize },
    WriteBit { db: u16, byte: usize, bit: u8, value: bool },
    WriteBytes { db: u16, start: usize, data: Vec<u8> },
}

#[derive(Debug)]
struct Memory {
    blocks: HashMap<u16, Vec<u8>>,
    online: bool,
    session_open: bool,
    failing_reads: u32,
    writes_before_failure: Option<usize>,
    opens: usize,
    ops: Vec<PlcOp>,
}

impl Memory {
    fn block(&mut self, db: u16, start: usize, len: usize) -> Result<&mut [u8]> {
        let block = self
            .blocks
            .get_mut(&db)
            .ok_or_else(|| DriveSrvError::protocol(format!("DB{db} does not exist")))?;
        let end = start.checked_add(len).unwrap_or(usize::MAX);
        if end > block.len() {
            return Err(DriveSrvError::protocol(format!(
                "address out of range: DB{db}.{start}+{len}"
            )));
        }
        Ok(&mut block[start..end])
    }

    fn check_session(&self) -> Result<()> {
        if !self.session_open {
            return Err(DriveSrvError::NotConnected);
        }
        if !self.online {
            return Err(DriveSrvError::transport("connection reset by controller"));
        }
        Ok(())
    }

    fn check_write(&mut self) -> Result<()> {
        self.check_session()?;
        match self.writes_before_failure {
            Some(0) => Err(DriveSrvError::transport("write rejected by virtual controller")),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            },
            None => Ok(()),
        }
    }
}

/// Shared view of a virtual controller's memory
#[derive(Debug, Clone)]
pub struct VirtualPlcHandle {
    memory: Arc<Mutex<Memory>>,
}

impl VirtualPlcHandle {
    /// Take the controller off or back on the network
    ///
    /// Going offline breaks any open session on its next I/O.
    pub fn set_online(&self, online: bool) {
        self.memory.lock().online = online;
    }

    /// Fail the next `count` reads with a transport error
    pub fn fail_next_reads(&self, count: u32) {
        self.memory.lock().failing_reads = count;
    }

    /// Accept `count` more writes, then fail every write after that
    pub fn fail_writes_after(&self, count: usize) {
        self.memory.lock().writes_before_failure = Some(count);
    }

    pub fn clear_faults(&self) {
        let mut memory = self.memory.lock();
        memory.failing_reads = 0;
        memory.writes_before_failure = None;
    }

    pub fn set_bytes(&self, db: u16, start: usize, data: &[u8]) {
        let mut memory = self.memory.lock();
        if let Ok(slot) = memory.block(db, start, data.len()) {
            slot.copy_from_slice(data);
        }
    }

    pub fn bytes(&self, db: u16, start: usize, len: usize) -> Vec<u8> {
        let mut memory = self.memory.lock();
        memory
            .block(db, start, len)
            .map(|slot| slot.to_vec())
            .unwrap_or_default()
    }

    pub fn bit(&self, db: u16, byte: usize, bit: u8) -> bool {
        self.bytes(db, byte, 1)
            .first()
            .is_some_and(|b| b & (1 << bit) != 0)
    }

    /// Transport calls recorded so far
    pub fn ops(&self) -> Vec<PlcOp> {
        self.memory.lock().ops.clone()
    }

    pub fn write_count(&self) -> usize {
        self.memory
            .lock()
            .ops
            .iter()
            .filter(|op| !matches!(op, PlcOp::Read { .. }))
            .count()
    }

    pub fn read_count(&self) -> usize {
        self.memory
            .lock()
            .ops
            .iter()
            .filter(|op| matches!(op, PlcOp::Read { .. }))
            .count()
    }

    pub fn clear_ops(&self) {
        self.memory.lock().ops.clear();
    }

    /// Number of successful `open` calls
    pub fn open_count(&self) -> usize {
        self.memory.lock().opens
    }
}

/// In-memory `PlcTransport`
#[derive(Debug)]
pub struct VirtualPlc {
    memory: Arc<Mutex<Memory>>,
}

impl VirtualPlc {
    /// Controller exposing a single zeroed data block
    pub fn new(db: u16, size: usize) -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(db, vec![0u8; size]);
        Self {
            memory: Arc::new(Mutex::new(Memory {
                blocks,
                online: true,
                session_open: false,
                failing_reads: 0,
                writes_before_failure: None,
                opens: 0,
                ops: Vec::new(),
            })),
        }
    }

    pub fn handle(&self) -> VirtualPlcHandle {
        VirtualPlcHandle {
            memory: Arc::clone(&self.memory),
        }
    }
}

#[async_trait]
impl PlcTransport for VirtualPlc {
    async fn open(&mut self) -> Result<()> {
        let mut memory = self.memory.lock();
        if !memory.online {
            return Err(DriveSrvError::transport("virtual controller offline"));
        }
        memory.session_open = true;
        memory.opens += 1;
        debug!("Virtual PLC session opened");
        Ok(())
    }

    async fn read_bytes(&mut self, db: u16, start: usize, len: usize) -> Result<Vec<u8>> {
        let mut memory = self.memory.lock();
        memory.check_session()?;
        memory.ops.push(PlcOp::Read { db, start, len });
        if memory.failing_reads > 0 {
            memory.failing_reads -= 1;
            return Err(DriveSrvError::transport("read timed out"));
        }
        Ok(memory.block(db, start, len)?.to_vec())
    }

    async fn write_bit(&mut self, db: u16, byte: usize, bit: u8, value: bool) -> Result<()> {
        let mut memory = self.memory.lock();
        memory.check_write()?;
        if bit > 7 {
            return Err(DriveSrvError::protocol(format!("bit {bit} out of range")));
        }
        let slot = memory.block(db, byte, 1)?;
        if value {
            slot[0] |= 1 << bit;
        } else {
            slot[0] &= !(1 << bit);
        }
        memory.ops.push(PlcOp::WriteBit {
            db,
            byte,
            bit,
            value,
        });
        Ok(())
    }

    async fn write_bytes(&mut self, db: u16, start: usize, data: &[u8]) -> Result<()> {
        let mut memory = self.memory.lock();
        memory.check_write()?;
        memory.block(db, start, data.len())?.copy_from_slice(data);
        memory.ops.push(PlcOp::WriteBytes {
            db,
            start,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.memory.lock().session_open = false;
    }

    fn is_open(&self) -> bool {
        self.memory.lock().session_open
    }

    fn endpoint(&self) -> String {
        "virtual".to_string()
    }
}
