//! Pairing code route.

use super::ApiError;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use vcfbot_types::SessionStatus;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    pub success: bool,
    /// Code to show to the user.
    pub pairing_code: String,
    /// Network-issued code, formatted.
    pub original_code: String,
    pub phone_number: String,
    pub status: SessionStatus,
}

/// POST /pairing-code - Start a session for a phone number and return its pairing code.
pub async fn request_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PairingRequest>,
) -> Result<Json<PairingResponse>, ApiError> {
    let phone = req
        .phone_number
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Phone number required".to_string()))?;

    info!(target: "vcfbot::api", "Pairing code requested for {}", phone);
    let code = state.session_manager.request_pairing_code(&phone).await?;

    let status = state
        .session_manager
        .get(&code.phone_number)
        .await
        .map(|s| s.status)
        .unwrap_or(SessionStatus::Disconnected);

    Ok(Json(PairingResponse {
        success: true,
        pairing_code: state
            .config
            .custom_pairing_code
            .clone()
            .unwrap_or_else(|| code.formatted.clone()),
        original_code: code.formatted,
        phone_number: code.phone_number,
        status,
    }))
}
