//! Service configuration
//!
//! YAML file merged with `DRIVESRV_` environment variables, nested keys
//! separated by `__` (e.g. `DRIVESRV_PLC__HOST=10.0.0.5`).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::model::{DriveCapabilities, RECORD_LEN};
use crate::core::connection::ReconnectPolicy;
use crate::error::{DriveSrvError, Result};
use crate::protocols::s7::S7Config;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DRIVESRV_";

/// Largest drive table addressable with 16-bit offsets
pub const MAX_DRIVE_COUNT: u16 = (u16::MAX as usize / RECORD_LEN) as u16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub plc: PlcConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
    pub drives: Vec<DriveSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub api: ApiConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "drivesrv".to_string(),
            api: ApiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 6020,
        }
    }
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which transport talks to the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlcProtocol {
    #[default]
    S7,
    /// In-memory controller, no hardware
    Virtual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    pub protocol: PlcProtocol,
    pub host: String,
    pub port: u16,
    pub rack: u8,
    pub slot: u8,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            protocol: PlcProtocol::S7,
            host: "192.168.0.1".to_string(),
            port: 102,
            rack: 0,
            slot: 1,
            connect_timeout_ms: 3000,
            io_timeout_ms: 2000,
        }
    }
}

impl PlcConfig {
    pub fn s7_config(&self) -> S7Config {
        S7Config {
            host: self.host.clone(),
            port: self.port,
            rack: self.rack,
            slot: self.slot,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub data_block: u16,
    pub drive_count: u16,
    pub interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Spread reconnect delays by up to ±25%
    pub reconnect_jitter: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            data_block: 100,
            drive_count: 100,
            interval_ms: 100,
            reconnect_backoff_ms: 5000,
            backoff_multiplier: 1.0,
            max_backoff_ms: 60_000,
            reconnect_jitter: false,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from_config(
            self.reconnect_backoff_ms,
            self.max_backoff_ms,
            self.backoff_multiplier,
        )
        .with_jitter(self.reconnect_jitter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<String>,
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Per-drive limits and display capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub id: u16,
    pub name: String,
    pub min_setpoint: i32,
    pub max_setpoint: i32,
    pub default_setpoint: i32,
    pub capabilities: DriveCapabilities,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            ..Self::for_drive(0)
        }
    }
}

impl DriveSettings {
    /// Defaults used for drives without explicit configuration
    pub fn for_drive(id: u16) -> Self {
        Self {
            id,
            name: format!("Drive {id}"),
            min_setpoint: 0,
            max_setpoint: 3000,
            default_setpoint: 1500,
            capabilities: DriveCapabilities::default(),
        }
    }

    fn validate(&self, drive_count: u16) -> Result<()> {
        if self.id == 0 || self.id > drive_count {
            return Err(DriveSrvError::config(format!(
                "drives: id {} outside 1..={}",
                self.id, drive_count
            )));
        }
        let word = i32::from(i16::MIN)..=i32::from(i16::MAX);
        if !word.contains(&self.min_setpoint) || !word.contains(&self.max_setpoint) {
            return Err(DriveSrvError::config(format!(
                "drives[{}]: setpoint limits must fit a signed 16-bit word",
                self.id
            )));
        }
        if !(self.min_setpoint <= self.default_setpoint
            && self.default_setpoint <= self.max_setpoint)
        {
            return Err(DriveSrvError::config(format!(
                "drives[{}]: expected min <= default <= max, got {} / {} / {}",
                self.id, self.min_setpoint, self.default_setpoint, self.max_setpoint
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load from a YAML file (optional) plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if path.exists() {
            figment = figment.merge(Yaml::file(path));
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
        }
        let mut config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        for drive in &mut config.drives {
            if drive.name.trim().is_empty() {
                drive.name = format!("Drive {}", drive.id);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let polling = &self.polling;
        if polling.drive_count == 0 || polling.drive_count > MAX_DRIVE_COUNT {
            return Err(DriveSrvError::config(format!(
                "polling.drive_count must be in 1..={MAX_DRIVE_COUNT}, got {}",
                polling.drive_count
            )));
        }
        if polling.interval_ms == 0 {
            return Err(DriveSrvError::config("polling.interval_ms must be > 0"));
        }
        if polling.reconnect_backoff_ms == 0 {
            return Err(DriveSrvError::config(
                "polling.reconnect_backoff_ms must be > 0",
            ));
        }
        if !polling.backoff_multiplier.is_finite() || polling.backoff_multiplier < 1.0 {
            return Err(DriveSrvError::config(
                "polling.backoff_multiplier must be >= 1.0",
            ));
        }
        if self.plc.protocol == PlcProtocol::S7 && self.plc.host.trim().is_empty() {
            return Err(DriveSrvError::config("plc.host must not be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for drive in &self.drives {
            drive.validate(polling.drive_count)?;
            if !seen.insert(drive.id) {
                return Err(DriveSrvError::config(format!(
                    "drives: id {} configured twice",
                    drive.id
                )));
            }
        }
        Ok(())
    }
}

/// Source of per-drive settings
pub trait DriveConfigProvider: Send + Sync {
    /// Settings for drive `id`, or `None` when the id is not part of the table
    fn drive(&self, id: u16) -> Option<DriveSettings>;
}

/// Settings table built from configuration, swappable at runtime
#[derive(Debug)]
pub struct StaticDriveConfig {
    drive_count: u16,
    overrides: RwLock<Arc<BTreeMap<u16, DriveSettings>>>,
}

impl StaticDriveConfig {
    pub fn new(drive_count: u16, drives: Vec<DriveSettings>) -> Self {
        Self {
            drive_count,
            overrides: RwLock::new(Arc::new(Self::index(drives))),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.polling.drive_count, config.drives.clone())
    }

    fn index(drives: Vec<DriveSettings>) -> BTreeMap<u16, DriveSettings> {
        drives.into_iter().map(|d| (d.id, d)).collect()
    }

    /// Swap the whole override table at once
    pub fn replace(&self, drives: Vec<DriveSettings>) {
        *self.overrides.write() = Arc::new(Self::index(drives));
    }

    pub fn drive_count(&self) -> u16 {
        self.drive_count
    }
}

impl DriveConfigProvider for StaticDriveConfig {
    fn drive(&self, id: u16) -> Option<DriveSettings> {
        if id == 0 || id > self.drive_count {
            return None;
        }
        let table = self.overrides.read().clone();
        Some(
            table
                .get(&id)
                .cloned()
                .unwrap_or_else(|| DriveSettings::for_drive(id)),
        )
    }
}
