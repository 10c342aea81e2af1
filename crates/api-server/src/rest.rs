//! Shared REST state, error mapping and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rewards_core::RewardsError;
use rewards_loyalty::RewardsEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RewardsEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<RewardsEngine>, node_id: impl Into<String>) -> Self {
        Self {
            engine,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Engine error carried to the HTTP edge.
#[derive(Debug)]
pub struct ApiError(pub RewardsError);

impl From<RewardsError> for ApiError {
    fn from(err: RewardsError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn status_for(err: &RewardsError) -> StatusCode {
    match err {
        RewardsError::NotFound(_) => StatusCode::NOT_FOUND,
        RewardsError::Conflict(_) => StatusCode::CONFLICT,
        RewardsError::InvalidInput(_) | RewardsError::Config(_) => StatusCode::BAD_REQUEST,
        RewardsError::Serialization(_) | RewardsError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
            ErrorResponse {
                error: self.0.kind().to_string(),
                message: "Internal processing error".to_string(),
            }
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            metrics::counter!("api.rejections", "kind" => self.0.kind().as_str()).increment(1);
            ErrorResponse {
                error: self.0.kind().to_string(),
                message: self.0.to_string(),
            }
        };
        (status, Json(body)).into_response()
    }
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        program_active: state.engine.program_config().is_active,
    })
}

/// GET /ready: Readiness probe. Ready once a valid program configuration
/// can be read.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.engine.program_config().validate().is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub program_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&RewardsError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&RewardsError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&RewardsError::Config("gap".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&RewardsError::InsufficientPoints {
                requested: 10,
                available: 0
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&RewardsError::Internal(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
