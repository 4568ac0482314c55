//! Common command-line arguments for service binaries
//!
//! Provides a unified argument structure that individual services embed

use clap::Parser;

/// Common service startup arguments
#[derive(Debug, Clone, Parser)]
#[clap(author, version, about)]
pub struct ServiceArgs {
    /// Path to the YAML configuration file
    #[clap(short = 'c', long, env = "DRIVESRV_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Optional bind address override (e.g., 127.0.0.1:6010)
    #[clap(short = 'b', long, alias = "bind", env = "BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Enable debug mode with verbose output
    #[clap(long, env = "DEBUG")]
    pub debug: bool,

    /// Disable colored output and the startup banner
    #[clap(long)]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[clap(long)]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            config: None,
            log_level: "info".to_string(),
            bind_address: None,
            debug: false,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        if self.debug {
            return tracing::Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Config file path with fallback to `config/{service}.yaml`
    pub fn config_path(&self, service_name: &str) -> String {
        self.config
            .clone()
            .unwrap_or_else(|| format!("config/{}.yaml", service_name))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
        assert_eq!(args.config_path("drivesrv"), "config/drivesrv.yaml");
    }

    #[test]
    fn test_parse_from_cli() {
        let args = ServiceArgs::try_parse_from([
            "drivesrv",
            "--config",
            "/etc/drivesrv.yaml",
            "-l",
            "warn",
            "--validate",
        ])
        .unwrap();

        assert_eq!(args.config_path("drivesrv"), "/etc/drivesrv.yaml");
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);
        assert!(args.validate);
    }

    #[test]
    fn test_debug_overrides_level() {
        let args = ServiceArgs {
            debug: true,
            log_level: "error".into(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::DEBUG);
    }
}
