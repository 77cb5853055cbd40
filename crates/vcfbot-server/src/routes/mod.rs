//! HTTP route handlers.

pub mod messages;
pub mod pairing;

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};
use vcfbot_core::BotError;
use vcfbot_types::{SessionStatus, StorageStatus};

/// Error answered as `{ "success": false, "message": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BotError> for ApiError {
    fn from(err: BotError) -> Self {
        match err {
            BotError::InvalidPhoneNumber(_) => ApiError::BadRequest("Invalid phone number".to_string()),
            BotError::SessionAlreadyActive(id) => {
                ApiError::Conflict(format!("Session {} is already connected", id))
            }
            BotError::NoSessions => ApiError::Unavailable("Bot not initialized".to_string()),
            BotError::SessionNotConnected(_) => ApiError::Unavailable("Bot not connected".to_string()),
            e @ (BotError::ClientUnavailable(_)
            | BotError::Superseded(_)
            | BotError::BridgeSpawnFailed(_)) => {
                warn!(target: "vcfbot::api", "Client unavailable: {}", e);
                ApiError::Unavailable("Bot not initialized".to_string())
            }
            e => {
                error!(target: "vcfbot::api", "Request failed: {}", e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEntry {
    pub id: String,
    pub status: SessionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub bot: String,
    pub version: String,
    pub is_connected: bool,
    pub active_connections: usize,
    pub sessions: Vec<SessionStatusEntry>,
    pub uptime: f64,
    pub timestamp: DateTime<Utc>,
}

/// GET /status - Registry view.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let sessions = state.session_manager.list_active().await;
    Json(StatusResponse {
        bot: state.config.bot_name.clone(),
        version: state.config.bot_version.clone(),
        is_connected: sessions.iter().any(|s| s.is_connected()),
        active_connections: sessions.len(),
        sessions: sessions
            .into_iter()
            .map(|s| SessionStatusEntry {
                id: s.id,
                status: s.status,
                last_connected_at: s.last_connected_at,
            })
            .collect(),
        uptime: state.uptime_secs(),
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
pub struct MemoryUsage {
    /// Resident set size in bytes, when the platform reports it.
    pub rss: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: String,
    pub storage: StorageStatus,
    pub active_connections: usize,
    pub uptime: f64,
    pub memory: MemoryUsage,
    pub timestamp: DateTime<Utc>,
}

/// GET /health - Process liveness.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: state.config.bot_name.clone(),
        version: state.config.bot_version.clone(),
        storage: state.settings.status(),
        active_connections: state.session_manager.len().await,
        uptime: state.uptime_secs(),
        memory: MemoryUsage {
            rss: resident_memory_bytes(),
        },
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
pub struct TestResponse {
    pub message: &'static str,
    pub environment: String,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
}

/// GET /test - Deployment smoke test.
pub async fn test(State(state): State<Arc<AppState>>) -> Json<TestResponse> {
    Json(TestResponse {
        message: "Server is running",
        environment: if cfg!(debug_assertions) {
            "development".to_string()
        } else {
            "production".to_string()
        },
        port: state.config.port,
        timestamp: Utc::now(),
    })
}

#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}
