//! Admin endpoints shared by services (runtime log level)

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api_types::{AppError, SuccessResponse};
use crate::logging;

/// Current log level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLevelResponse {
    pub level: String,
}

/// Request body for changing the log level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLogLevelRequest {
    pub level: String,
}

/// GET /api/admin/log-level
pub async fn get_log_level() -> Json<SuccessResponse<LogLevelResponse>> {
    Json(SuccessResponse::new(LogLevelResponse {
        level: logging::get_log_level(),
    }))
}

/// PUT /api/admin/log-level
pub async fn set_log_level(
    Json(req): Json<SetLogLevelRequest>,
) -> Result<Json<SuccessResponse<LogLevelResponse>>, AppError> {
    logging::set_log_level(&req.level).map_err(AppError::bad_request)?;
    Ok(Json(SuccessResponse::new(LogLevelResponse {
        level: req.level,
    })))
}
