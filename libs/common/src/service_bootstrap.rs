//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by service binaries.

use crate::logging::{self, LogConfig};
use tracing::{info, Level};

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "drivesrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
    /// Default API port
    pub default_port: u16,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        default_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "drivesrv" => {
            r#"
 ██████╗ ██████╗ ██╗██╗   ██╗███████╗███████╗██████╗ ██╗   ██╗
 ██╔══██╗██╔══██╗██║██║   ██║██╔════╝██╔════╝██╔══██╗██║   ██║
 ██║  ██║██████╔╝██║██║   ██║█████╗  ███████╗██████╔╝██║   ██║
 ██║  ██║██╔══██╗██║╚██╗ ██╔╝██╔══╝  ╚════██║██╔══██╗╚██╗ ██╔╝
 ██████╔╝██║  ██║██║ ╚████╔╝ ███████╗███████║██║  ██║ ╚████╔╝
 ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═══╝  ╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#
        },
        _ => "",
    };

    if !banner.is_empty() {
        info!("{}", banner);
    }
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
}

/// Initialize logging for a service with standard configuration
///
/// Log root directory priority:
/// 1. DRIVESRV_LOG_DIR environment variable
/// 2. `log_dir` from the service configuration
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    log_dir: Option<&str>,
    level: Level,
    enable_json: bool,
) -> anyhow::Result<()> {
    logging::init_log_root(log_dir);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        console_level: level,
        enable_json,
        ..Default::default()
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
