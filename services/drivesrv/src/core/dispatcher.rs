//! Command dispatcher
//!
//! Turns a `DriveCommand` into bit and word writes. Every present field is
//! encoded and range-checked before the first write; writes then go out in
//! the order start, stop, forward, reverse, setpoint, mode. The first failing
//! write aborts the command and earlier writes stay applied.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::codec::{drive_offset, encode_setpoint, BitAddress, SETPOINT_OFFSET};
use super::connection::ConnectionManager;
use super::events::{DriveEvent, EventSink};
use super::model::{DriveCommand, DriveFlag};
use crate::config::DriveConfigProvider;
use crate::error::{DriveSrvError, Result};

/// One planned controller write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedWrite {
    Bit {
        address: BitAddress,
        value: bool,
    },
    Word {
        offset: usize,
        bytes: [u8; 2],
    },
}

pub struct CommandDispatcher {
    connection: Arc<ConnectionManager>,
    drives: Arc<dyn DriveConfigProvider>,
    events: Arc<dyn EventSink>,
    data_block: u16,
    drive_count: u16,
}

impl CommandDispatcher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        drives: Arc<dyn DriveConfigProvider>,
        events: Arc<dyn EventSink>,
        data_block: u16,
        drive_count: u16,
    ) -> Self {
        Self {
            connection,
            drives,
            events,
            data_block,
            drive_count,
        }
    }

    /// Encode `command` without touching the controller
    pub fn plan(&self, command: &DriveCommand) -> Result<Vec<PlannedWrite>> {
        let id = command.drive_id;
        if id == 0 || id > self.drive_count {
            return Err(DriveSrvError::validation(format!(
                "unknown drive {id}, expected 1..={}",
                self.drive_count
            )));
        }
        let settings = self
            .drives
            .drive(id)
            .ok_or_else(|| DriveSrvError::validation(format!("no settings for drive {id}")))?;

        let bit = |flag: DriveFlag, value: bool| PlannedWrite::Bit {
            address: BitAddress::for_flag(id, flag),
            value,
        };

        let mut writes = Vec::with_capacity(6);
        if let Some(start) = command.start {
            writes.push(bit(DriveFlag::Running, start));
        }
        if command.stop == Some(true) {
            writes.push(bit(DriveFlag::Running, false));
        }
        if let Some(forward) = command.forward {
            writes.push(bit(DriveFlag::Forward, forward));
        }
        if let Some(reverse) = command.reverse {
            writes.push(bit(DriveFlag::Reverse, reverse));
        }
        if let Some(setpoint) = command.setpoint {
            let bytes = encode_setpoint(setpoint, settings.min_setpoint, settings.max_setpoint)?;
            writes.push(PlannedWrite::Word {
                offset: drive_offset(id) + SETPOINT_OFFSET,
                bytes,
            });
        }
        if let Some(auto) = command.mode_auto {
            writes.push(bit(DriveFlag::ModeAuto, auto));
        }
        Ok(writes)
    }

    /// Push one command to the controller
    ///
    /// Fails immediately when disconnected; nothing is queued or retried.
    pub async fn dispatch(&self, command: &DriveCommand) -> Result<()> {
        let writes = self.plan(command).inspect_err(|e| {
            warn!(drive_id = command.drive_id, "Command rejected: {}", e);
        })?;

        if !self.connection.is_connected() {
            warn!(drive_id = command.drive_id, "Command dropped, PLC not connected");
            return Err(match self.connection.state() {
                super::connection::ConnectionState::Closed => DriveSrvError::Closed,
                _ => DriveSrvError::NotConnected,
            });
        }

        if writes.is_empty() {
            debug!(drive_id = command.drive_id, "Empty command, nothing to write");
            return Ok(());
        }

        for (index, write) in writes.iter().enumerate() {
            let result = match *write {
                PlannedWrite::Bit { address, value } => {
                    self.connection
                        .write_bit(self.data_block, address.byte, address.bit, value)
                        .await
                },
                PlannedWrite::Word { offset, bytes } => {
                    self.connection
                        .write_word(self.data_block, offset, bytes)
                        .await
                },
            };
            if let Err(e) = result {
                warn!(
                    drive_id = command.drive_id,
                    "Command aborted after {}/{} writes: {}",
                    index,
                    writes.len(),
                    e
                );
                return Err(e);
            }
        }

        let description = command.describe();
        info!(drive_id = command.drive_id, "{}", description);
        self.events
            .record(DriveEvent::command(command.drive_id, description));
        Ok(())
    }
}
