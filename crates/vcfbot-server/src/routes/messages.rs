//! Outbound message route.

use super::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: &'static str,
    /// Normalized recipient address.
    pub to: String,
}

/// POST /send-message - Send a text through the first connected session.
pub async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    if let Some(expected) = &state.config.api_key {
        if bearer_token(&headers) != Some(expected.as_str()) {
            warn!(target: "vcfbot::api", "Rejected send-message with a bad API key");
            return Err(ApiError::Unauthorized("Invalid API key".to_string()));
        }
    }

    let (Some(to), Some(message)) = (non_empty(req.to), non_empty(req.message)) else {
        return Err(ApiError::BadRequest(
            "Both 'to' and 'message' are required".to_string(),
        ));
    };

    let recipient = state.session_manager.send_text(&to, &message).await?;
    info!(target: "vcfbot::api", "Message sent to {}", recipient);

    Ok(Json(SendMessageResponse {
        success: true,
        message: "Message sent",
        to: recipient,
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
