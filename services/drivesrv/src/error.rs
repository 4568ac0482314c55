//! Error handling for the drive service
//!
//! One variant per failure class of the polling engine. Every I/O failure ends
//! in "disconnect, wait, retry"; nothing here is fatal to the process.

use errors::ServiceError;
use thiserror::Error;

/// Drive service error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriveSrvError {
    /// I/O attempted while the controller session is not established
    #[error("Not connected to controller")]
    NotConnected,

    /// I/O attempted after the connection manager was closed
    #[error("Connection closed")]
    Closed,

    /// I/O failure mid-operation; the session is presumed dead
    #[error("Transport error: {0}")]
    Transport(String),

    /// Controller answered with a negative acknowledgement or a malformed frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Buffer too short for the requested record
    #[error("Malformed buffer: need {needed} bytes at offset {offset}, {available} available")]
    MalformedBuffer {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Value outside the configured limits
    #[error("Out of range: {value} not in [{min}, {max}]")]
    OutOfRange { value: i32, min: i32, max: i32 },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request validation errors (unknown drive id and similar)
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for the drive service
pub type Result<T> = std::result::Result<T, DriveSrvError>;

impl DriveSrvError {
    pub fn transport(msg: impl Into<String>) -> Self {
        DriveSrvError::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        DriveSrvError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        DriveSrvError::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DriveSrvError::Validation(msg.into())
    }

    /// Whether the session must be considered dead after this error
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            DriveSrvError::Transport(_) | DriveSrvError::Protocol(_)
        )
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "DRIVESRV_NOT_CONNECTED",
            Self::Closed => "DRIVESRV_CLOSED",
            Self::Transport(_) => "DRIVESRV_TRANSPORT_ERROR",
            Self::Protocol(_) => "DRIVESRV_PROTOCOL_ERROR",
            Self::MalformedBuffer { .. } => "DRIVESRV_MALFORMED_BUFFER",
            Self::OutOfRange { .. } => "DRIVESRV_OUT_OF_RANGE",
            Self::Config(_) => "DRIVESRV_CONFIG_ERROR",
            Self::Validation(_) => "DRIVESRV_VALIDATION_ERROR",
        }
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for DriveSrvError {
    fn from(err: std::io::Error) -> Self {
        DriveSrvError::Transport(err.to_string())
    }
}

impl From<figment::Error> for DriveSrvError {
    fn from(err: figment::Error) -> Self {
        DriveSrvError::Config(err.to_string())
    }
}

// ============================================================================
// Conversion to ServiceError for process boundaries
// ============================================================================

impl From<DriveSrvError> for ServiceError {
    fn from(err: DriveSrvError) -> Self {
        match err {
            DriveSrvError::Config(msg) => ServiceError::Configuration(msg),
            DriveSrvError::Validation(msg) => ServiceError::Validation(msg),
            DriveSrvError::OutOfRange { value, min, max } => ServiceError::OutOfRange {
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            },
            other @ (DriveSrvError::NotConnected
            | DriveSrvError::Closed
            | DriveSrvError::Transport(_)
            | DriveSrvError::Protocol(_)) => ServiceError::Communication(other.to_string()),
            other @ DriveSrvError::MalformedBuffer { .. } => {
                ServiceError::Internal(other.to_string())
            },
        }
    }
}

// ============================================================================
// API Adaptation: DriveSrvError → AppError conversion
// ============================================================================

impl From<DriveSrvError> for common::AppError {
    fn from(err: DriveSrvError) -> Self {
        use axum::http::StatusCode;
        use common::{AppError, ErrorInfo};

        let message = err.to_string();
        let mut app_error = match &err {
            DriveSrvError::Validation(_) | DriveSrvError::OutOfRange { .. } => {
                AppError::bad_request(message)
            },
            DriveSrvError::NotConnected | DriveSrvError::Closed => {
                AppError::service_unavailable(message)
            },
            DriveSrvError::Transport(_) | DriveSrvError::Protocol(_) => AppError::new(
                StatusCode::BAD_GATEWAY,
                ErrorInfo::new(message).with_code(StatusCode::BAD_GATEWAY.as_u16()),
            ),
            DriveSrvError::MalformedBuffer { .. } | DriveSrvError::Config(_) => {
                AppError::internal_error(message)
            },
        };
        app_error.error = app_error
            .error
            .with_details(format!("error_code: {}", err.error_code()));
        app_error
    }
}
