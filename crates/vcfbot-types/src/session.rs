//! Session types and connection state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status of one session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No live connection (terminal for the current client instance).
    Disconnected,
    /// A client handle exists and the handshake is in progress.
    Connecting,
    /// Handshake completed; the session can send and receive.
    Connected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Registry key, usually the phone number digits.
    pub id: String,
    pub status: SessionStatus,
    /// Set on every transition into `connected`.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// When the current client instance was requested.
    pub created_at: DateTime<Utc>,
    /// Counts client instances created for this id.
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }
}
