//! Seam to the external messaging-protocol client.
//!
//! The wire protocol, handshake and credential format live outside this crate.
//! A [`ClientConnector`] produces one [`ProtocolClient`] handle per connection
//! attempt and reports lifecycle and inbound-message events on a channel the
//! session manager consumes in order.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use vcfbot_types::{InboundEnvelope, MessageKey};

/// Close status code meaning the credentials were revoked.
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Events emitted by a protocol client instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake started.
    Connecting,
    /// Handshake completed; `user_id` is the account's own address.
    Open { user_id: Option<String> },
    /// Connection closed. `None` means no status was reported.
    Close { status_code: Option<u16> },
    /// An inbound message.
    Message(InboundEnvelope),
}

impl ClientEvent {
    /// True for a close carrying the logged-out status.
    pub fn is_logout(&self) -> bool {
        matches!(self, ClientEvent::Close { status_code: Some(LOGGED_OUT_STATUS) })
    }
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// A live connection handle for one session.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// The account's own address, known once the connection is open.
    fn user_id(&self) -> Option<String>;

    /// Send a text message, optionally quoting an earlier one.
    async fn send_text(&self, to: &str, text: &str, quoted: Option<&MessageKey>) -> Result<()>;

    /// Ask the network for a device pairing code for `phone` (digits only).
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    /// Close the connection and release the handle's resources.
    async fn end(&self);
}

/// Produces protocol client handles from stored credentials.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Start a connection for `session_id`, creating credentials if absent.
    ///
    /// Returns once the handle exists; handshake completion is reported later
    /// through `events`.
    async fn connect(&self, session_id: &str, events: EventSender) -> Result<Arc<dyn ProtocolClient>>;
}
