//! Core session, lifecycle and command handling for the VCF bot.

mod bridge;
mod client;
mod commands;
mod error;
mod plugins;
mod session;
mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bridge::{BridgeClient, BridgeConnector};
pub use client::{
    ClientConnector, ClientEvent, EventReceiver, EventSender, ProtocolClient, LOGGED_OUT_STATUS,
};
pub use commands::{
    parse_command, CommandContext, CommandDispatcher, CommandDispatcherBuilder, CommandHandler,
    DispatchOutcome, COMMAND_FAILURE_REPLY,
};
pub use error::BotError;
pub use plugins::{register_builtin, StatsCommand, STATS_COMMANDS};
pub use session::{format_pairing_code, PairingCode, SessionManager, SessionManagerConfig};
pub use settings::SettingsStore;

/// Result type for bot core operations.
pub type Result<T> = std::result::Result<T, BotError>;
