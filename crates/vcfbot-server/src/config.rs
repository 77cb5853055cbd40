//! Server configuration.

use anyhow::Result;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use vcfbot_core::SessionManagerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    /// One credential directory per session lives here.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    #[serde(default = "default_bridge_command")]
    pub bridge_command: String,
    #[serde(default)]
    pub bridge_args: Vec<String>,
    /// Session started at boot. An empty string disables it, so sessions
    /// only start from pairing requests.
    #[serde(default = "default_session", deserialize_with = "empty_as_none")]
    pub default_session: Option<String>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_handshake_retry_delay")]
    pub handshake_retry_delay_secs: u64,
    #[serde(default = "default_pairing_delay")]
    pub pairing_delay_secs: u64,
    /// Bearer key required by `/send-message` when set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Replaces the network-issued code in `/pairing-code` responses.
    #[serde(default)]
    pub custom_pairing_code: Option<String>,
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_bot_version")]
    pub bot_version: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./public")
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vcfbot")
}

fn default_settings_path() -> PathBuf {
    data_dir().join("users.json")
}

fn default_sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

fn default_bridge_command() -> String {
    "vcfbot-bridge".to_string()
}

fn default_session() -> Option<String> {
    Some("default_session".to_string())
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_handshake_retry_delay() -> u64 {
    5
}

fn default_pairing_delay() -> u64 {
    3
}

fn default_bot_name() -> String {
    "VCF BOT".to_string()
}

fn default_bot_version() -> String {
    "1.0.0".to_string()
}

fn default_welcome_message() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            settings_path: default_settings_path(),
            sessions_dir: default_sessions_dir(),
            bridge_command: default_bridge_command(),
            bridge_args: Vec::new(),
            default_session: default_session(),
            reconnect_delay_secs: default_reconnect_delay(),
            handshake_retry_delay_secs: default_handshake_retry_delay(),
            pairing_delay_secs: default_pairing_delay(),
            api_key: None,
            custom_pairing_code: None,
            bot_name: default_bot_name(),
            bot_version: default_bot_version(),
            welcome_message: default_welcome_message(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to read variables. Empty values are ignored.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            match port.trim().parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(target: "vcfbot::startup", "Ignoring invalid PORT '{}'", port),
            }
        }
        if let Some(command) = var("BOT_BRIDGE_COMMAND") {
            self.bridge_command = command;
        }
        if let Some(key) = var("BOT_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(code) = var("CUSTOM_PAIRING_CODE") {
            self.custom_pairing_code = Some(code);
        }
        if let Some(name) = var("BOT_NAME") {
            self.bot_name = name;
        }
        if let Some(version) = var("BOT_VERSION") {
            self.bot_version = version;
        }
    }

    /// Session manager settings derived from this config.
    pub fn session_manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            handshake_retry_delay: Duration::from_secs(self.handshake_retry_delay_secs),
            pairing_delay: Duration::from_secs(self.pairing_delay_secs),
            bot_name: self.bot_name.clone(),
            bot_version: self.bot_version.clone(),
            welcome_message: self.welcome_message,
        }
    }
}
