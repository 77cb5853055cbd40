//! Error types for the bot core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Session already active: {0}")]
    SessionAlreadyActive(String),

    #[error("Session not connected: {0}")]
    SessionNotConnected(String),

    #[error("No sessions registered")]
    NoSessions,

    #[error("Session {0} was removed or replaced while connecting")]
    Superseded(String),

    #[error("No client handle available for session {0}")]
    ClientUnavailable(String),

    #[error("Protocol client error: {0}")]
    Client(String),

    #[error("Bridge spawn failed: {0}")]
    BridgeSpawnFailed(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,
}
