//! In-memory protocol clients for tests.

use crate::client::{ClientConnector, ClientEvent, EventSender, ProtocolClient};
use crate::{BotError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vcfbot_types::MessageKey;

/// A message recorded by [`MockClient::send_text`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub text: String,
    pub quoted: Option<MessageKey>,
}

/// Protocol client that records calls instead of talking to a network.
pub struct MockClient {
    user_id: Mutex<Option<String>>,
    sent: Mutex<Vec<SentMessage>>,
    pairing_requests: Mutex<Vec<String>>,
    pairing_code: Mutex<String>,
    ended: AtomicBool,
}

impl MockClient {
    pub fn new(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user_id: Mutex::new(Some(user_id.to_string())),
            sent: Mutex::new(Vec::new()),
            pairing_requests: Mutex::new(Vec::new()),
            pairing_code: Mutex::new("ABCD1234".to_string()),
            ended: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().unwrap().clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap().clone()
    }

    async fn send_text(&self, to: &str, text: &str, quoted: Option<&MessageKey>) -> Result<()> {
        if self.is_ended() {
            return Err(BotError::Client("connection ended".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            text: text.to_string(),
            quoted: quoted.cloned(),
        });
        Ok(())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        self.pairing_requests.lock().unwrap().push(phone.to_string());
        Ok(self.pairing_code.lock().unwrap().clone())
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// One `connect` call seen by [`MockConnector`].
#[derive(Clone)]
pub struct ConnectAttempt {
    pub session_id: String,
    pub client: Option<Arc<MockClient>>,
    pub events: EventSender,
}

/// Connector handing out [`MockClient`]s and keeping their event senders.
#[derive(Default)]
pub struct MockConnector {
    attempts: Mutex<Vec<ConnectAttempt>>,
    failures_left: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Number of connect calls (failed ones included) for a session.
    pub fn connect_count(&self, session_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.session_id == session_id)
            .count()
    }

    /// Client returned by the latest successful connect for a session.
    pub fn last_client(&self, session_id: &str) -> Option<Arc<MockClient>> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|a| a.session_id == session_id)
            .find_map(|a| a.client.clone())
    }

    /// Emit an event from the latest client instance of a session.
    pub fn emit(&self, session_id: &str, event: ClientEvent) -> bool {
        let attempts = self.attempts.lock().unwrap();
        attempts
            .iter()
            .rev()
            .find(|a| a.session_id == session_id && a.client.is_some())
            .map(|a| a.events.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Emit an event from a specific (possibly stale) attempt.
    pub fn emit_from(&self, attempt: usize, event: ClientEvent) -> bool {
        let attempts = self.attempts.lock().unwrap();
        attempts
            .get(attempt)
            .map(|a| a.events.send(event).is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ClientConnector for MockConnector {
    async fn connect(&self, session_id: &str, events: EventSender) -> Result<Arc<dyn ProtocolClient>> {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let client = (!fail).then(|| MockClient::new(&format!("{}:1@s.whatsapp.net", session_id)));
        self.attempts.lock().unwrap().push(ConnectAttempt {
            session_id: session_id.to_string(),
            client: client.clone(),
            events,
        });

        match client {
            Some(client) => Ok(client as Arc<dyn ProtocolClient>),
            None => Err(BotError::Client("handshake failed".to_string())),
        }
    }
}

/// Convenience for emitting the open event with the client's account id.
pub fn open_event(session_id: &str) -> ClientEvent {
    ClientEvent::Open {
        user_id: Some(format!("{}:1@s.whatsapp.net", session_id)),
    }
}
