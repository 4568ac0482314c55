//! Drive audit events
//!
//! Sinks are called synchronously from the poll loop and dispatcher and must
//! never block.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::model::{DriveFlag, DriveState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveEventKind {
    Command {
        description: String,
    },
    StateChange {
        property: String,
        old: String,
        new: String,
    },
    ErrorRaised {
        code: i16,
    },
    ErrorCleared {
        previous_code: i16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveEvent {
    pub drive_id: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DriveEventKind,
}

impl DriveEvent {
    pub fn new(drive_id: u16, kind: DriveEventKind) -> Self {
        Self {
            drive_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn command(drive_id: u16, description: impl Into<String>) -> Self {
        Self::new(
            drive_id,
            DriveEventKind::Command {
                description: description.into(),
            },
        )
    }
}

/// Receiver of audit events
pub trait EventSink: Send + Sync {
    fn record(&self, event: DriveEvent);
}

/// Events between two consecutive states of one drive
///
/// A drive seen for the first time yields nothing.
pub fn derive_events(previous: Option<&DriveState>, current: &DriveState) -> Vec<DriveEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let mut events = Vec::new();

    for flag in [DriveFlag::Running, DriveFlag::ModeAuto] {
        let (old, new) = (previous.flags.get(flag), current.flags.get(flag));
        if old != new {
            events.push(DriveEvent::new(
                current.id,
                DriveEventKind::StateChange {
                    property: flag.name().to_string(),
                    old: old.to_string(),
                    new: new.to_string(),
                },
            ));
        }
    }

    match (previous.is_faulted(), current.is_faulted()) {
        (false, true) => events.push(DriveEvent::new(
            current.id,
            DriveEventKind::ErrorRaised {
                code: current.error_code,
            },
        )),
        (true, false) => events.push(DriveEvent::new(
            current.id,
            DriveEventKind::ErrorCleared {
                previous_code: previous.error_code,
            },
        )),
        (true, true) if previous.error_code != current.error_code => {
            events.push(DriveEvent::new(
                current.id,
                DriveEventKind::ErrorRaised {
                    code: current.error_code,
                },
            ))
        },
        _ => {},
    }

    events
}

/// Writes one structured log line per event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: DriveEvent) {
        match &event.kind {
            DriveEventKind::Command { description } => {
                info!(drive_id = event.drive_id, "{}", description);
            },
            DriveEventKind::StateChange { property, old, new } => {
                info!(drive_id = event.drive_id, %property, "State change: {} -> {}", old, new);
            },
            DriveEventKind::ErrorRaised { code } => {
                warn!(drive_id = event.drive_id, error_code = code, "Drive error raised");
            },
            DriveEventKind::ErrorCleared { previous_code } => {
                info!(
                    drive_id = event.drive_id,
                    previous_code = previous_code,
                    "Drive error cleared"
                );
            },
        }
    }
}

/// Forwards events into a bounded channel, dropping when full
#[derive(Debug)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<DriveEvent>,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DriveEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events lost to a full or closed channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelEventSink {
    fn record(&self, event: DriveEvent) {
        if self.tx.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                warn!("Event sink saturated, {} events dropped", dropped);
            }
        }
    }
}
