//! API request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::connection::{ConnectionState, ConnectionStats};
use crate::core::model::DriveCommand;
use crate::core::poller::PollStats;
use crate::error::{DriveSrvError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub plc_endpoint: String,
    pub connection_state: ConnectionState,
    pub connected: bool,
    pub drive_count: u16,
    /// Drives read at least once
    pub known_drives: usize,
    pub connection: ConnectionStats,
    pub polling: PollStats,
}

/// Command body; the drive id comes from the path
///
/// A `driveId` in the body is accepted when it names the same drive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandRequest {
    #[serde(default)]
    pub drive_id: Option<u16>,
    #[serde(default)]
    pub start: Option<bool>,
    #[serde(default)]
    pub stop: Option<bool>,
    #[serde(default)]
    pub forward: Option<bool>,
    #[serde(default)]
    pub reverse: Option<bool>,
    #[serde(default)]
    pub setpoint: Option<i32>,
    #[serde(default)]
    pub mode_auto: Option<bool>,
}

impl CommandRequest {
    pub fn into_command(self, drive_id: u16) -> Result<DriveCommand> {
        if let Some(body_id) = self.drive_id {
            if body_id != drive_id {
                return Err(DriveSrvError::validation(format!(
                    "body driveId {body_id} does not match path drive {drive_id}"
                )));
            }
        }
        Ok(DriveCommand {
            drive_id,
            start: self.start,
            stop: self.stop,
            forward: self.forward,
            reverse: self.reverse,
            setpoint: self.setpoint,
            mode_auto: self.mode_auto,
        })
    }
}

/// Command outcome returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub drive_id: u16,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_command_request_drive_id() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"driveId":2,"start":true}"#).unwrap();
        let command = request.into_command(2).unwrap();
        assert_eq!(command.drive_id, 2);
        assert_eq!(command.start, Some(true));

        let request: CommandRequest = serde_json::from_str(r#"{"setpoint":900}"#).unwrap();
        assert_eq!(request.into_command(5).unwrap().setpoint, Some(900));

        let request: CommandRequest =
            serde_json::from_str(r#"{"driveId":3,"start":true}"#).unwrap();
        assert!(matches!(
            request.into_command(2),
            Err(DriveSrvError::Validation(_))
        ));

        assert!(serde_json::from_str::<CommandRequest>(r#"{"speed":10}"#).is_err());
    }
}
