//! Per-session user preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used to detect commands when a session has no stored preference.
pub const DEFAULT_PREFIX: &str = ".";

/// Stored preferences for one session id.
///
/// Missing fields in the stored document fall back to the same defaults
/// `get_user_with_defaults` reports, so older records stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub phone_number: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub status_read_enabled: bool,
    #[serde(default)]
    pub auto_react_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl UserSettings {
    /// Default preferences for an id, without timestamps (not persisted).
    pub fn defaults_for(phone_number: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            prefix: default_prefix(),
            status_read_enabled: true,
            auto_react_enabled: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// True when this record came from the store rather than defaults.
    pub fn is_persisted(&self) -> bool {
        self.created_at.is_some()
    }

    /// Prefix to match commands against; an empty stored prefix means the default.
    pub fn effective_prefix(&self) -> &str {
        if self.prefix.is_empty() {
            DEFAULT_PREFIX
        } else {
            &self.prefix
        }
    }

    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(prefix) = &update.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(enabled) = update.status_read_enabled {
            self.status_read_enabled = enabled;
        }
        if let Some(enabled) = update.auto_react_enabled {
            self.auto_react_enabled = enabled;
        }
    }
}

/// Partial update merged into an existing record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub status_read_enabled: Option<bool>,
    #[serde(default)]
    pub auto_react_enabled: Option<bool>,
}

/// Backend description reported by the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    pub storage_type: String,
    pub status: String,
}
