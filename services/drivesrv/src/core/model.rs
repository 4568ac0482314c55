//! Drive data model
//!
//! `DriveRecord` is the decoded wire form of one drive slot; `DriveState` is
//! what the registry stores and consumers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of one drive slot in the data block
pub const RECORD_LEN: usize = 10;

/// Flag bits of byte 0, in bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveFlag {
    ModeAuto,
    Running,
    Forward,
    Reverse,
    Error,
    HasSetpoint,
    HasSpeed,
    HasCurrent,
}

impl DriveFlag {
    pub const ALL: [DriveFlag; 8] = [
        DriveFlag::ModeAuto,
        DriveFlag::Running,
        DriveFlag::Forward,
        DriveFlag::Reverse,
        DriveFlag::Error,
        DriveFlag::HasSetpoint,
        DriveFlag::HasSpeed,
        DriveFlag::HasCurrent,
    ];

    /// Bit position within the flag byte
    pub fn bit(self) -> u8 {
        match self {
            DriveFlag::ModeAuto => 0,
            DriveFlag::Running => 1,
            DriveFlag::Forward => 2,
            DriveFlag::Reverse => 3,
            DriveFlag::Error => 4,
            DriveFlag::HasSetpoint => 5,
            DriveFlag::HasSpeed => 6,
            DriveFlag::HasCurrent => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DriveFlag::ModeAuto => "ModeAuto",
            DriveFlag::Running => "Running",
            DriveFlag::Forward => "Forward",
            DriveFlag::Reverse => "Reverse",
            DriveFlag::Error => "Error",
            DriveFlag::HasSetpoint => "HasSetpoint",
            DriveFlag::HasSpeed => "HasSpeed",
            DriveFlag::HasCurrent => "HasCurrent",
        }
    }
}

/// The eight status flags packed into byte 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFlags {
    pub mode_auto: bool,
    pub running: bool,
    pub forward: bool,
    pub reverse: bool,
    pub error: bool,
    pub has_setpoint: bool,
    pub has_speed: bool,
    pub has_current: bool,
}

impl DriveFlags {
    pub fn get(&self, flag: DriveFlag) -> bool {
        match flag {
            DriveFlag::ModeAuto => self.mode_auto,
            DriveFlag::Running => self.running,
            DriveFlag::Forward => self.forward,
            DriveFlag::Reverse => self.reverse,
            DriveFlag::Error => self.error,
            DriveFlag::HasSetpoint => self.has_setpoint,
            DriveFlag::HasSpeed => self.has_speed,
            DriveFlag::HasCurrent => self.has_current,
        }
    }

    pub fn set(&mut self, flag: DriveFlag, value: bool) {
        let slot = match flag {
            DriveFlag::ModeAuto => &mut self.mode_auto,
            DriveFlag::Running => &mut self.running,
            DriveFlag::Forward => &mut self.forward,
            DriveFlag::Reverse => &mut self.reverse,
            DriveFlag::Error => &mut self.error,
            DriveFlag::HasSetpoint => &mut self.has_setpoint,
            DriveFlag::HasSpeed => &mut self.has_speed,
            DriveFlag::HasCurrent => &mut self.has_current,
        };
        *slot = value;
    }

    pub fn from_byte(byte: u8) -> Self {
        let mut flags = Self::default();
        for flag in DriveFlag::ALL {
            flags.set(flag, byte & (1 << flag.bit()) != 0);
        }
        flags
    }

    pub fn to_byte(&self) -> u8 {
        DriveFlag::ALL
            .iter()
            .filter(|flag| self.get(**flag))
            .fold(0u8, |acc, flag| acc | (1 << flag.bit()))
    }
}

/// One decoded 10-byte drive slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveRecord {
    pub flags: DriveFlags,
    /// Byte 1, not interpreted
    pub reserved: u8,
    pub speed: i16,
    pub current: i16,
    pub setpoint: i16,
    pub error_code: i16,
}

/// Which UI-facing features apply to a drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveCapabilities {
    pub has_forward: bool,
    pub has_reverse: bool,
    pub has_setpoint: bool,
    pub has_speed_display: bool,
    pub has_current_display: bool,
    pub has_error_display: bool,
}

impl Default for DriveCapabilities {
    fn default() -> Self {
        Self {
            has_forward: true,
            has_reverse: true,
            has_setpoint: true,
            has_speed_display: true,
            has_current_display: true,
            has_error_display: true,
        }
    }
}

/// Published state of one drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveState {
    /// 1-based drive id
    pub id: u16,
    pub name: String,
    #[serde(flatten)]
    pub flags: DriveFlags,
    pub speed: i16,
    pub current: i16,
    pub setpoint: i16,
    pub error_code: i16,
    pub last_update: DateTime<Utc>,
    pub capabilities: DriveCapabilities,
}

impl DriveState {
    pub fn from_record(
        id: u16,
        name: impl Into<String>,
        record: &DriveRecord,
        capabilities: DriveCapabilities,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            flags: record.flags,
            speed: record.speed,
            current: record.current,
            setpoint: record.setpoint,
            error_code: record.error_code,
            last_update,
            capabilities,
        }
    }

    /// Compare every observable field; capabilities, name and timestamp are ignored
    pub fn same_observables(&self, other: &DriveState) -> bool {
        self.flags == other.flags
            && self.speed == other.speed
            && self.current == other.current
            && self.setpoint == other.setpoint
            && self.error_code == other.error_code
    }

    /// Error flag set or a non-zero error code reported
    pub fn is_faulted(&self) -> bool {
        self.flags.error || self.error_code != 0
    }
}

/// Outbound command; `None` means "leave unchanged"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveCommand {
    #[serde(default)]
    pub drive_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_auto: Option<bool>,
}

impl DriveCommand {
    pub fn new(drive_id: u16) -> Self {
        Self {
            drive_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none()
            && self.stop.is_none()
            && self.forward.is_none()
            && self.reverse.is_none()
            && self.setpoint.is_none()
            && self.mode_auto.is_none()
    }

    /// Audit description, e.g. "Command: Start=true, Setpoint=1200"
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = self.start {
            parts.push(format!("Start={v}"));
        }
        if let Some(v) = self.stop {
            parts.push(format!("Stop={v}"));
        }
        if let Some(v) = self.forward {
            parts.push(format!("Forward={v}"));
        }
        if let Some(v) = self.reverse {
            parts.push(format!("Reverse={v}"));
        }
        if let Some(v) = self.setpoint {
            parts.push(format!("Setpoint={v}"));
        }
        if let Some(v) = self.mode_auto {
            parts.push(format!("ModeAuto={v}"));
        }
        format!("Command: {}", parts.join(", "))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_flag_byte_roundtrip() {
        for byte in [0x00u8, 0x01, 0x83, 0xAA, 0x55, 0xFF] {
            assert_eq!(DriveFlags::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn test_flag_bit_assignment() {
        let flags = DriveFlags::from_byte(0x83);
        assert!(flags.mode_auto);
        assert!(flags.running);
        assert!(flags.has_current);
        assert!(!flags.forward && !flags.reverse && !flags.error);
        assert!(!flags.has_setpoint && !flags.has_speed);
    }

    #[test]
    fn test_same_observables_ignores_metadata() {
        let record = DriveRecord {
            speed: 100,
            ..Default::default()
        };
        let a = DriveState::from_record(1, "Drive 1", &record, DriveCapabilities::default(), Utc::now());
        let mut b = a.clone();
        b.name = "Conveyor".into();
        b.capabilities.has_reverse = false;
        b.last_update = a.last_update + chrono::Duration::seconds(5);
        assert!(a.same_observables(&b));

        b.error_code = 4;
        assert!(!a.same_observables(&b));
    }

    #[test]
    fn test_command_description() {
        let cmd = DriveCommand {
            start: Some(true),
            setpoint: Some(1200),
            ..DriveCommand::new(3)
        };
        assert_eq!(cmd.describe(), "Command: Start=true, Setpoint=1200");
        assert!(!cmd.is_empty());
        assert!(DriveCommand::new(3).is_empty());
    }

    #[test]
    fn test_command_json_absent_fields() {
        let cmd: DriveCommand =
            serde_json::from_str(r#"{"driveId":5,"start":true,"stop":true}"#).unwrap();
        assert_eq!(cmd.drive_id, 5);
        assert_eq!(cmd.start, Some(true));
        assert_eq!(cmd.stop, Some(true));
        assert_eq!(cmd.forward, None);
        assert_eq!(cmd.setpoint, None);
    }
}
