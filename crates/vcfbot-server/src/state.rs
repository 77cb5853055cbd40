//! Shared application state.

use crate::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use vcfbot_core::{
    register_builtin, BridgeConnector, ClientConnector, CommandDispatcher, SessionManager,
    SettingsStore,
};

/// Shared application state.
pub struct AppState {
    pub session_manager: Arc<SessionManager>,
    pub settings: Arc<SettingsStore>,
    pub config: Config,
    pub started_at: Instant,
}

impl AppState {
    /// State backed by the external bridge program.
    pub fn new(config: Config) -> vcfbot_core::Result<Self> {
        let connector = Arc::new(BridgeConnector::new(
            PathBuf::from(&config.bridge_command),
            config.bridge_args.clone(),
            config.sessions_dir.clone(),
        ));
        Self::with_connector(config, connector)
    }

    /// State using any protocol client connector.
    pub fn with_connector(
        config: Config,
        connector: Arc<dyn ClientConnector>,
    ) -> vcfbot_core::Result<Self> {
        let settings = Arc::new(SettingsStore::open(&config.settings_path)?);
        let dispatcher = register_builtin(
            CommandDispatcher::builder(),
            settings.clone(),
            &config.bot_name,
            &config.bot_version,
        )
        .build();

        let session_manager = SessionManager::new(
            config.session_manager_config(),
            connector,
            settings.clone(),
            Arc::new(dispatcher),
        );

        Ok(Self {
            session_manager,
            settings,
            config,
            started_at: Instant::now(),
        })
    }

    /// Seconds since the state was built.
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
