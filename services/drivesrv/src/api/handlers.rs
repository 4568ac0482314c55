//! API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use tracing::info;

use super::dto::{CommandRequest, CommandResult, HealthStatus, ServiceStatus};
use super::AppState;
use crate::core::DriveState;
use common::{AppError, SuccessResponse};

fn uptime_seconds(state: &AppState) -> u64 {
    (Utc::now() - state.started_at)
        .num_seconds()
        .max(0)
        .try_into()
        .unwrap_or(0)
}

/// GET /health
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<HealthStatus>>, AppError> {
    Ok(Json(SuccessResponse::new(HealthStatus {
        status: "healthy".to_string(),
        service: "drivesrv".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(&state),
    })))
}

/// GET /api/status
pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<ServiceStatus>>, AppError> {
    let connection_state = state.connection.state();
    let status = ServiceStatus {
        name: "Drive Service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        start_time: state.started_at,
        uptime_seconds: uptime_seconds(&state),
        plc_endpoint: state.connection.endpoint().to_string(),
        connection_state,
        connected: connection_state.is_connected(),
        drive_count: state.drive_count,
        known_drives: state.registry.len(),
        connection: state.connection.stats(),
        polling: state.poll_stats.lock().clone(),
    };
    Ok(Json(SuccessResponse::new(status)))
}

/// GET /api/drives
pub async fn list_drives(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<DriveState>>>, AppError> {
    let drives = state.registry.snapshot_all();
    let connected = state.connection.is_connected();
    Ok(Json(
        SuccessResponse::new(drives).with_metadata("plc_connected", serde_json::Value::Bool(connected)),
    ))
}

/// GET /api/drives/{id}
///
/// 404 until the drive has been read at least once.
pub async fn get_drive(
    State(state): State<AppState>,
    Path(id): Path<u16>,
) -> Result<Json<SuccessResponse<DriveState>>, AppError> {
    state
        .registry
        .get(id)
        .map(|drive| Json(SuccessResponse::new(drive)))
        .ok_or_else(|| AppError::not_found(format!("Drive {id} has not been read yet")))
}

/// POST /api/drives/{id}/command
///
/// Answers with a `CommandResult` in both cases; the HTTP status reflects the
/// failure class.
pub async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<u16>,
    Json(request): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResult>) {
    let result = match request.into_command(id) {
        Ok(command) => {
            info!(drive_id = id, "Command received: {}", command.describe());
            state.dispatcher.dispatch(&command).await
        },
        Err(e) => Err(e),
    };
    let status = match &result {
        Ok(()) => StatusCode::OK,
        Err(e) => AppError::from(e.clone()).status,
    };
    (
        status,
        Json(CommandResult {
            drive_id: id,
            success: result.is_ok(),
            timestamp: Utc::now(),
            error: result.err().map(|e| e.to_string()),
        }),
    )
}
