//! Basic library shared by service binaries
//!
//! Provides:
//! - logging initialization and runtime level control
//! - shutdown signal handling
//! - common command-line arguments and startup banner
//! - HTTP response envelopes for axum handlers

pub mod admin_api;
pub mod api_types;
pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use api_types::{AppError, ErrorInfo, ErrorResponse, SuccessResponse};
pub use bootstrap_args::ServiceArgs;
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use anyhow;
pub use tokio;
