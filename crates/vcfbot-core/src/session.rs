//! Session registry and connection lifecycle.
//!
//! The [`SessionManager`] owns one protocol client handle per session id.
//! Every client instance gets its own event task, so events of one session are
//! handled in emission order while sessions stay independent. Each instance is
//! tagged with a generation number; events from an instance that has since
//! been replaced or removed are ignored.

use crate::client::{ClientConnector, ClientEvent, EventReceiver, ProtocolClient};
use crate::commands::CommandDispatcher;
use crate::{BotError, Result, SettingsStore};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use vcfbot_types::{jid, InboundEnvelope, SessionSnapshot, SessionStatus};

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Wait before reconnecting after a non-logout close.
    pub reconnect_delay: Duration,
    /// Wait before retrying after the connector failed to produce a handle.
    pub handshake_retry_delay: Duration,
    /// Wait between creating a session and asking for its pairing code.
    pub pairing_delay: Duration,
    pub bot_name: String,
    pub bot_version: String,
    /// Send a welcome text to the account's own chat after connecting.
    pub welcome_message: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            handshake_retry_delay: Duration::from_secs(5),
            pairing_delay: Duration::from_secs(3),
            bot_name: "VCF BOT".to_string(),
            bot_version: "1.0.0".to_string(),
            welcome_message: true,
        }
    }
}

/// A pairing code issued for a phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    /// Digits-only phone number, also the session id.
    pub phone_number: String,
    /// Code as returned by the network.
    pub code: String,
    /// Code in groups of four separated by dashes.
    pub formatted: String,
}

struct SessionEntry {
    id: String,
    status: SessionStatus,
    last_connected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    generation: u64,
    client: Option<Arc<dyn ProtocolClient>>,
    user_id: Option<String>,
}

impl SessionEntry {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            status: self.status,
            last_connected_at: self.last_connected_at,
            created_at: self.created_at,
            generation: self.generation,
        }
    }
}

/// Owns live sessions and reacts to their lifecycle events.
pub struct SessionManager {
    config: SessionManagerConfig,
    connector: Arc<dyn ClientConnector>,
    settings: Arc<SettingsStore>,
    dispatcher: Arc<CommandDispatcher>,
    /// Insertion-ordered registry.
    sessions: RwLock<Vec<SessionEntry>>,
    next_generation: AtomicU64,
    this: Weak<SessionManager>,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(
        config: SessionManagerConfig,
        connector: Arc<dyn ClientConnector>,
        settings: Arc<SettingsStore>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            connector,
            settings,
            dispatcher,
            sessions: RwLock::new(Vec::new()),
            next_generation: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Start a client instance for `session_id`.
    ///
    /// Fails with [`BotError::SessionAlreadyActive`] when the session is
    /// connected. A connecting or disconnected entry is replaced: its handle is
    /// ended before the new one is requested. Handshake completion is reported
    /// through lifecycle events, not through the return value.
    pub async fn create(&self, session_id: &str) -> Result<SessionSnapshot> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let prior = {
            let mut sessions = self.sessions.write().await;
            match sessions.iter_mut().find(|e| e.id == session_id) {
                Some(entry) if entry.status == SessionStatus::Connected => {
                    return Err(BotError::SessionAlreadyActive(session_id.to_string()));
                }
                Some(entry) => {
                    entry.status = SessionStatus::Connecting;
                    entry.created_at = Utc::now();
                    entry.generation = generation;
                    entry.user_id = None;
                    entry.client.take()
                }
                None => {
                    sessions.push(SessionEntry {
                        id: session_id.to_string(),
                        status: SessionStatus::Connecting,
                        last_connected_at: None,
                        created_at: Utc::now(),
                        generation,
                        client: None,
                        user_id: None,
                    });
                    None
                }
            }
        };

        if let Some(prior) = prior {
            debug!(target: "vcfbot::session", "Releasing previous client for session {}", session_id);
            prior.end().await;
        }

        info!(target: "vcfbot::session", "Creating session {} (generation {})", session_id, generation);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = match self.connector.connect(session_id, events_tx).await {
            Ok(client) => client,
            Err(e) => {
                error!(target: "vcfbot::session", "Failed to start session {}: {}", session_id, e);
                self.set_status(session_id, generation, SessionStatus::Disconnected).await;
                self.schedule_reconnect(session_id, generation, self.config.handshake_retry_delay);
                return Err(e);
            }
        };

        let snapshot = {
            let mut sessions = self.sessions.write().await;
            match sessions
                .iter_mut()
                .find(|e| e.id == session_id && e.generation == generation)
            {
                Some(entry) => {
                    entry.client = Some(client.clone());
                    Some(entry.snapshot())
                }
                None => None,
            }
        };

        let Some(snapshot) = snapshot else {
            // Removed or replaced while the connector was working.
            warn!(target: "vcfbot::session", "Session {} superseded during connect", session_id);
            client.end().await;
            return Err(BotError::Superseded(session_id.to_string()));
        };

        self.spawn_event_loop(session_id.to_string(), generation, events_rx);
        Ok(snapshot)
    }

    /// Current state of a session.
    pub async fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|e| e.id == session_id)
            .map(SessionEntry::snapshot)
    }

    /// End a session's handle and drop its entry. Removing an absent id is a
    /// no-op; the return value tells whether an entry existed.
    ///
    /// Reconnects already scheduled for the id are not cancelled.
    pub async fn remove(&self, session_id: &str) -> bool {
        let entry = {
            let mut sessions = self.sessions.write().await;
            sessions
                .iter()
                .position(|e| e.id == session_id)
                .map(|pos| sessions.remove(pos))
        };

        match entry {
            Some(entry) => {
                if let Some(client) = entry.client {
                    client.end().await;
                }
                info!(target: "vcfbot::session", "Session {} removed", session_id);
                true
            }
            None => false,
        }
    }

    /// Snapshots of every registered session, in insertion order.
    pub async fn list_active(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .await
            .iter()
            .map(SessionEntry::snapshot)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// True when any session is connected.
    pub async fn any_connected(&self) -> bool {
        self.sessions
            .read()
            .await
            .iter()
            .any(|e| e.status == SessionStatus::Connected)
    }

    /// Handle of the first connected session in insertion order.
    pub async fn connected_client(&self) -> Result<(String, Arc<dyn ProtocolClient>)> {
        let sessions = self.sessions.read().await;
        let first = sessions.first().ok_or(BotError::NoSessions)?;
        sessions
            .iter()
            .find_map(|e| match (&e.client, e.status) {
                (Some(client), SessionStatus::Connected) => Some((e.id.clone(), client.clone())),
                _ => None,
            })
            .ok_or_else(|| BotError::SessionNotConnected(first.id.clone()))
    }

    /// Send a text to a phone number through the first connected session.
    ///
    /// Returns the normalized recipient address.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        let (session_id, client) = self.connected_client().await?;
        let recipient = jid::user_jid(to);
        client.send_text(&recipient, text, None).await?;
        debug!(target: "vcfbot::session", "Session {} sent a message to {}", session_id, recipient);
        Ok(recipient)
    }

    /// Ask the network for a pairing code for `phone`.
    ///
    /// The number is reduced to digits and used as the session id. A session
    /// is created unless one with a live handle is already connecting.
    pub async fn request_pairing_code(&self, phone: &str) -> Result<PairingCode> {
        let digits = jid::digits_only(phone);
        if digits.len() < 8 {
            return Err(BotError::InvalidPhoneNumber(phone.to_string()));
        }

        let existing = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .find(|e| e.id == digits)
                .map(|e| (e.status, e.client.is_some()))
        };
        match existing {
            Some((SessionStatus::Connected, _)) => {
                return Err(BotError::SessionAlreadyActive(digits));
            }
            Some((SessionStatus::Connecting, true)) => {
                debug!(target: "vcfbot::session", "Reusing connecting session {} for pairing", digits);
            }
            _ => {
                self.create(&digits).await.map_err(|e| match e {
                    BotError::SessionAlreadyActive(_) => e,
                    other => {
                        warn!(target: "vcfbot::session", "No client for pairing {}: {}", digits, other);
                        BotError::ClientUnavailable(digits.clone())
                    }
                })?;
            }
        }

        tokio::time::sleep(self.config.pairing_delay).await;

        let client = self
            .client_for(&digits)
            .await
            .ok_or_else(|| BotError::ClientUnavailable(digits.clone()))?;
        let code = client.request_pairing_code(&digits).await?;
        info!(target: "vcfbot::session", "Pairing code issued for {}", digits);

        Ok(PairingCode {
            formatted: format_pairing_code(&code),
            phone_number: digits,
            code,
        })
    }

    /// End every handle and clear the registry.
    pub async fn shutdown(&self) {
        let entries: Vec<SessionEntry> = self.sessions.write().await.drain(..).collect();
        let count = entries.len();
        let ends = entries
            .into_iter()
            .filter_map(|e| e.client)
            .map(|client| async move { client.end().await });
        futures::future::join_all(ends).await;
        info!(target: "vcfbot::session", "Shut down {} sessions", count);
    }

    async fn client_for(&self, session_id: &str) -> Option<Arc<dyn ProtocolClient>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|e| e.id == session_id)
            .and_then(|e| e.client.clone())
    }

    /// True when the entry for `session_id` belongs to an instance newer than
    /// `generation`.
    async fn replaced_since(&self, session_id: &str, generation: u64) -> bool {
        self.sessions
            .read()
            .await
            .iter()
            .any(|e| e.id == session_id && e.generation > generation)
    }

    async fn set_status(&self, session_id: &str, generation: u64, status: SessionStatus) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions
            .iter_mut()
            .find(|e| e.id == session_id && e.generation == generation)
        {
            entry.status = status;
        }
    }

    fn spawn_event_loop(&self, session_id: String, generation: u64, mut events: EventReceiver) {
        let this = self.this.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = this.upgrade() else {
                    break;
                };
                if !manager.handle_event(&session_id, generation, event).await {
                    break;
                }
            }
            debug!(
                target: "vcfbot::lifecycle",
                "Event loop for session {} (generation {}) finished",
                session_id, generation
            );
        });
    }

    /// Fire-and-forget reconnect after `delay` on behalf of instance
    /// `generation`.
    ///
    /// The retry is dropped when a newer instance holds the id by then. It is
    /// not cancelled by `remove`: a removed id is created again.
    fn schedule_reconnect(&self, session_id: &str, generation: u64, delay: Duration) {
        let this = self.this.clone();
        let session_id = session_id.to_string();
        info!(
            target: "vcfbot::lifecycle",
            "Reconnecting session {} in {:?}",
            session_id, delay
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = this.upgrade() else {
                return;
            };
            if manager.replaced_since(&session_id, generation).await {
                info!(
                    target: "vcfbot::lifecycle",
                    "Session {} was restarted since generation {}, dropping scheduled reconnect",
                    session_id, generation
                );
                return;
            }
            match manager.create(&session_id).await {
                Ok(_) => {}
                Err(BotError::SessionAlreadyActive(_)) => {
                    info!(
                        target: "vcfbot::lifecycle",
                        "Session {} already connected, dropping scheduled reconnect",
                        session_id
                    );
                }
                Err(e) => {
                    warn!(target: "vcfbot::lifecycle", "Reconnect of session {} failed: {}", session_id, e);
                }
            }
        });
    }

    /// Apply one event. Returns false once this client instance is finished.
    async fn handle_event(&self, session_id: &str, generation: u64, event: ClientEvent) -> bool {
        let current = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .any(|e| e.id == session_id && e.generation == generation)
        };
        if !current {
            debug!(
                target: "vcfbot::lifecycle",
                "Ignoring event from stale instance of session {} (generation {})",
                session_id, generation
            );
            return false;
        }

        let logged_out = event.is_logout();
        match event {
            ClientEvent::Connecting => {
                self.set_status(session_id, generation, SessionStatus::Connecting).await;
                true
            }
            ClientEvent::Open { user_id } => {
                self.on_open(session_id, generation, user_id).await;
                true
            }
            ClientEvent::Close { status_code } => {
                self.on_close(session_id, generation, status_code, logged_out).await;
                false
            }
            ClientEvent::Message(envelope) => {
                self.on_message(session_id, generation, envelope).await;
                true
            }
        }
    }

    async fn on_open(&self, session_id: &str, generation: u64, user_id: Option<String>) {
        let client = {
            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions
                .iter_mut()
                .find(|e| e.id == session_id && e.generation == generation)
            else {
                return;
            };
            entry.status = SessionStatus::Connected;
            entry.last_connected_at = Some(Utc::now());
            entry.user_id = user_id.or_else(|| entry.client.as_ref().and_then(|c| c.user_id()));
            entry.client.clone().map(|c| (c, entry.user_id.clone()))
        };
        info!(target: "vcfbot::lifecycle", "Session {} connected", session_id);

        let (record, created) = self.settings.ensure_user(session_id).await;
        if created {
            info!(target: "vcfbot::lifecycle", "New user created for session {}", session_id);
        }

        if !self.config.welcome_message {
            return;
        }
        let Some((client, Some(user_id))) = client else {
            return;
        };
        let text = self.welcome_text(record.effective_prefix());
        if let Err(e) = client
            .send_text(&jid::own_user_jid(&user_id), &text, None)
            .await
        {
            warn!(target: "vcfbot::lifecycle", "Failed to send welcome message for {}: {}", session_id, e);
        }
    }

    async fn on_close(
        &self,
        session_id: &str,
        generation: u64,
        status_code: Option<u16>,
        logged_out: bool,
    ) {

        let client = {
            let mut sessions = self.sessions.write().await;
            let Some(pos) = sessions
                .iter()
                .position(|e| e.id == session_id && e.generation == generation)
            else {
                return;
            };
            if logged_out {
                sessions.remove(pos).client
            } else {
                let entry = &mut sessions[pos];
                entry.status = SessionStatus::Disconnected;
                entry.user_id = None;
                entry.client.take()
            }
        };

        if let Some(client) = client {
            client.end().await;
        }

        if logged_out {
            info!(target: "vcfbot::lifecycle", "Session {} logged out", session_id);
        } else {
            warn!(
                target: "vcfbot::lifecycle",
                "Session {} connection closed (status {:?})",
                session_id, status_code
            );
            self.schedule_reconnect(session_id, generation, self.config.reconnect_delay);
        }
    }

    async fn on_message(&self, session_id: &str, generation: u64, envelope: InboundEnvelope) {
        let target = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .find(|e| e.id == session_id && e.generation == generation)
                .and_then(|e| {
                    let client = e.client.clone()?;
                    let user_id = e.user_id.clone().or_else(|| client.user_id());
                    Some((client, user_id))
                })
        };
        let Some((client, user_id)) = target else {
            return;
        };
        let Some(user_id) = user_id else {
            warn!(target: "vcfbot::lifecycle", "Session {} user not initialized, dropping message", session_id);
            return;
        };
        let Some(message) = envelope.normalize(&user_id) else {
            return;
        };

        let settings = self.settings.get_user_with_defaults(session_id).await;
        self.dispatcher
            .dispatch(session_id, &message, settings.effective_prefix(), &user_id, client)
            .await;
    }

    fn welcome_text(&self, prefix: &str) -> String {
        let commands = self
            .dispatcher
            .names()
            .iter()
            .map(|name| format!("{}{}", prefix, name))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "*✅ {name} connected successfully!*\n\n*🤖 Bot:* {name}\n*📱 Version:* {version}\n*📊 Commands:* {commands}\n\n*💬 Ready to serve VCF Generator users!*",
            name = self.config.bot_name,
            version = self.config.bot_version,
            commands = if commands.is_empty() { "none".to_string() } else { commands },
        )
    }
}

/// Group a pairing code in blocks of four: `ABCD1234` -> `ABCD-1234`.
pub fn format_pairing_code(code: &str) -> String {
    code.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
