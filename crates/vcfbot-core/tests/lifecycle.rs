//! Integration tests for the session registry and connection lifecycle.
//!
//! These tests verify:
//! - open/close/logout transitions and their registry effects
//! - reconnect scheduling after transient failures
//! - the replace-unless-connected creation policy
//! - inbound message dispatch through the command table
//! - pairing code and outbound send flows

use async_trait::async_trait;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vcfbot_core::testing::{open_event, MockConnector};
use vcfbot_core::{
    BotError, ClientEvent, CommandContext, CommandDispatcher, CommandHandler, SessionManager,
    SessionManagerConfig, SettingsStore, COMMAND_FAILURE_REPLY, LOGGED_OUT_STATUS,
};
use vcfbot_types::{InboundEnvelope, SessionStatus};

const SESSION: &str = "22500000001";

struct PingCommand {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl CommandHandler for PingCommand {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("ping exploded");
        }
        ctx.reply(&format!("pong {}", ctx.query())).await?;
        Ok(())
    }
}

fn fast_config() -> SessionManagerConfig {
    SessionManagerConfig {
        reconnect_delay: Duration::from_millis(50),
        handshake_retry_delay: Duration::from_millis(80),
        pairing_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

struct Harness {
    manager: Arc<SessionManager>,
    connector: Arc<MockConnector>,
    settings: Arc<SettingsStore>,
    ping: Arc<PingCommand>,
    _dir: TempDir,
}

fn harness_with(config: SessionManagerConfig, failing_ping: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(SettingsStore::open(&dir.path().join("users.json")).unwrap());
    let ping = Arc::new(PingCommand {
        calls: AtomicUsize::new(0),
        fail: failing_ping,
    });
    let dispatcher = Arc::new(CommandDispatcher::builder().register(&["ping"], ping.clone()).build());
    let connector = MockConnector::new();
    let manager = SessionManager::new(config, connector.clone(), settings.clone(), dispatcher);
    Harness {
        manager,
        connector,
        settings,
        ping,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(fast_config(), false)
}

/// Poll `check` until it returns true or two seconds pass.
async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_status(h: &Harness, status: SessionStatus) {
    wait_for(&format!("status {}", status), || async {
        h.manager.get(SESSION).await.map(|s| s.status) == Some(status)
    })
    .await;
}

async fn connect_session(h: &Harness) {
    h.manager.create(SESSION).await.unwrap();
    assert!(h.connector.emit(SESSION, open_event(SESSION)));
    wait_for_status(h, SessionStatus::Connected).await;
}

fn text_message(from: &str, text: &str) -> ClientEvent {
    let envelope: InboundEnvelope = serde_json::from_value(json!({
        "key": { "remoteJid": from, "fromMe": false, "id": "MSG1" },
        "message": { "conversation": text }
    }))
    .unwrap();
    ClientEvent::Message(envelope)
}

// =============================================================================
// Open / close transitions
// =============================================================================

#[tokio::test]
async fn test_create_starts_connecting() {
    let h = harness();
    let snapshot = h.manager.create(SESSION).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Connecting);
    assert!(snapshot.last_connected_at.is_none());
    assert_eq!(h.connector.connect_count(SESSION), 1);
}

#[tokio::test]
async fn test_open_marks_connected_and_runs_post_connect() {
    let h = harness();
    connect_session(&h).await;

    let snapshot = h.manager.get(SESSION).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Connected);
    assert!(snapshot.last_connected_at.is_some());

    wait_for("settings record", || async { h.settings.find_user(SESSION).await.is_some() }).await;

    let client = h.connector.last_client(SESSION).unwrap();
    wait_for("welcome message", || async { !client.sent().is_empty() }).await;
    let welcome = &client.sent()[0];
    assert_eq!(welcome.to, format!("{}@s.whatsapp.net", SESSION));
    assert!(welcome.text.contains("VCF BOT"));
    assert!(welcome.text.contains(".ping"));
}

#[tokio::test]
async fn test_welcome_message_can_be_disabled() {
    let h = harness_with(
        SessionManagerConfig {
            welcome_message: false,
            ..fast_config()
        },
        false,
    );
    connect_session(&h).await;
    wait_for("settings record", || async { h.settings.find_user(SESSION).await.is_some() }).await;

    assert!(h.connector.last_client(SESSION).unwrap().sent().is_empty());
}

#[tokio::test]
async fn test_logout_removes_session_without_retry() {
    let h = harness();
    connect_session(&h).await;
    let client = h.connector.last_client(SESSION).unwrap();

    h.connector.emit(
        SESSION,
        ClientEvent::Close {
            status_code: Some(LOGGED_OUT_STATUS),
        },
    );

    wait_for("session removal", || async { h.manager.get(SESSION).await.is_none() }).await;
    assert!(client.is_ended());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.connector.connect_count(SESSION), 1);
    assert!(h.manager.get(SESSION).await.is_none());
}

#[tokio::test]
async fn test_transient_close_schedules_exactly_one_retry() {
    let h = harness();
    connect_session(&h).await;
    let first = h.connector.last_client(SESSION).unwrap();

    h.connector.emit(SESSION, ClientEvent::Close { status_code: Some(428) });

    wait_for_status(&h, SessionStatus::Disconnected).await;
    assert!(first.is_ended(), "prior handle must be released before reconnecting");

    wait_for("reconnect", || async { h.connector.connect_count(SESSION) == 2 }).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.connector.connect_count(SESSION), 2);

    let snapshot = h.manager.get(SESSION).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Connecting);
    assert!(snapshot.last_connected_at.is_some());
}

#[tokio::test]
async fn test_close_without_status_is_transient() {
    let h = harness();
    h.manager.create(SESSION).await.unwrap();
    h.connector.emit(SESSION, ClientEvent::Close { status_code: None });

    wait_for("reconnect", || async { h.connector.connect_count(SESSION) == 2 }).await;
}

#[tokio::test]
async fn test_handshake_failure_retries_after_longer_delay() {
    let h = harness();
    h.connector.fail_next(1);

    let result = h.manager.create(SESSION).await;
    assert!(matches!(result, Err(BotError::Client(_))));
    assert_eq!(
        h.manager.get(SESSION).await.unwrap().status,
        SessionStatus::Disconnected
    );

    wait_for("handshake retry", || async { h.connector.connect_count(SESSION) == 2 }).await;
    wait_for_status(&h, SessionStatus::Connecting).await;
    assert!(h.connector.last_client(SESSION).is_some());
}

// =============================================================================
// Creation policy
// =============================================================================

#[tokio::test]
async fn test_create_rejects_connected_session() {
    let h = harness();
    connect_session(&h).await;

    let result = h.manager.create(SESSION).await;
    assert!(matches!(result, Err(BotError::SessionAlreadyActive(id)) if id == SESSION));
    assert_eq!(h.connector.connect_count(SESSION), 1);
}

#[tokio::test]
async fn test_create_replaces_connecting_session() {
    let h = harness();
    let first = h.manager.create(SESSION).await.unwrap();
    let first_client = h.connector.last_client(SESSION).unwrap();

    let second = h.manager.create(SESSION).await.unwrap();

    assert!(second.generation > first.generation);
    assert!(first_client.is_ended());
    assert_eq!(h.manager.len().await, 1);

    // Events from the replaced instance are ignored.
    h.connector.emit_from(0, open_event(SESSION));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.manager.get(SESSION).await.unwrap().status,
        SessionStatus::Connecting
    );
}

// =============================================================================
// Registry operations
// =============================================================================

#[tokio::test]
async fn test_remove_is_idempotent() {
    let h = harness();
    h.manager.create(SESSION).await.unwrap();
    let client = h.connector.last_client(SESSION).unwrap();

    assert!(h.manager.remove(SESSION).await);
    assert!(!h.manager.remove(SESSION).await);
    assert!(client.is_ended());
    assert!(h.manager.get(SESSION).await.is_none());
}

#[tokio::test]
async fn test_list_active_keeps_insertion_order() {
    let h = harness();
    for id in ["30000000003", "10000000001", "20000000002"] {
        h.manager.create(id).await.unwrap();
    }

    let ids: Vec<String> = h.manager.list_active().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["30000000003", "10000000001", "20000000002"]);
}

#[tokio::test]
async fn test_scheduled_reconnect_survives_remove() {
    let h = harness();
    h.manager.create(SESSION).await.unwrap();
    h.connector.emit(SESSION, ClientEvent::Close { status_code: Some(500) });
    wait_for_status(&h, SessionStatus::Disconnected).await;

    h.manager.remove(SESSION).await;

    // The retry was already scheduled and re-creates the entry.
    wait_for("stray reconnect", || async { h.manager.get(SESSION).await.is_some() }).await;
    assert_eq!(h.connector.connect_count(SESSION), 2);
}

#[tokio::test]
async fn test_shutdown_ends_every_client() {
    let h = harness();
    h.manager.create("10000000001").await.unwrap();
    h.manager.create("20000000002").await.unwrap();

    h.manager.shutdown().await;

    assert!(h.manager.is_empty().await);
    assert!(h.connector.last_client("10000000001").unwrap().is_ended());
    assert!(h.connector.last_client("20000000002").unwrap().is_ended());
}

// =============================================================================
// Inbound messages
// =============================================================================

#[tokio::test]
async fn test_inbound_command_is_dispatched() {
    let h = harness_with(
        SessionManagerConfig {
            welcome_message: false,
            ..fast_config()
        },
        false,
    );
    connect_session(&h).await;
    let client = h.connector.last_client(SESSION).unwrap();

    h.connector.emit(SESSION, text_message("111@s.whatsapp.net", ".PING a b"));
    h.connector.emit(SESSION, text_message("111@s.whatsapp.net", "hello"));

    wait_for("reply", || async { !client.sent().is_empty() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.ping.calls.load(Ordering::SeqCst), 1);
    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "111@s.whatsapp.net");
    assert_eq!(sent[0].text, "pong a b");
    assert_eq!(sent[0].quoted.as_ref().and_then(|k| k.id.as_deref()), Some("MSG1"));
}

#[tokio::test]
async fn test_custom_prefix_from_settings() {
    let h = harness_with(
        SessionManagerConfig {
            welcome_message: false,
            ..fast_config()
        },
        false,
    );
    h.settings.create_user(SESSION).await;
    h.settings
        .update_user(
            SESSION,
            &vcfbot_types::SettingsUpdate {
                prefix: Some("!".to_string()),
                ..Default::default()
            },
        )
        .await;
    connect_session(&h).await;

    h.connector.emit(SESSION, text_message("111@s.whatsapp.net", ".ping"));
    h.connector.emit(SESSION, text_message("111@s.whatsapp.net", "!ping"));

    wait_for("ping", || async { h.ping.calls.load(Ordering::SeqCst) == 1 }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.ping.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failing_command_keeps_session_connected() {
    let h = harness_with(
        SessionManagerConfig {
            welcome_message: false,
            ..fast_config()
        },
        true,
    );
    connect_session(&h).await;
    let client = h.connector.last_client(SESSION).unwrap();

    h.connector.emit(SESSION, text_message("111@s.whatsapp.net", ".ping"));

    wait_for("failure reply", || async { !client.sent().is_empty() }).await;
    assert_eq!(client.sent()[0].text, COMMAND_FAILURE_REPLY);
    assert_eq!(
        h.manager.get(SESSION).await.unwrap().status,
        SessionStatus::Connected
    );
    assert_eq!(h.connector.connect_count(SESSION), 1);
}

// =============================================================================
// Pairing and outbound messages
// =============================================================================

#[tokio::test]
async fn test_pairing_code_creates_session() {
    let h = harness();

    let code = h.manager.request_pairing_code("+225 00-00-00-01").await.unwrap();

    assert_eq!(code.phone_number, SESSION);
    assert_eq!(code.code, "ABCD1234");
    assert_eq!(code.formatted, "ABCD-1234");
    let client = h.connector.last_client(SESSION).unwrap();
    assert_eq!(client.pairing_requests(), vec![SESSION.to_string()]);
}

#[tokio::test]
async fn test_pairing_code_rejects_short_numbers_and_connected_sessions() {
    let h = harness();
    assert!(matches!(
        h.manager.request_pairing_code("+225 12").await,
        Err(BotError::InvalidPhoneNumber(_))
    ));
    assert_eq!(h.connector.attempts().len(), 0);

    connect_session(&h).await;
    assert!(matches!(
        h.manager.request_pairing_code(SESSION).await,
        Err(BotError::SessionAlreadyActive(_))
    ));
}

#[tokio::test]
async fn test_pairing_code_without_client_handle() {
    let h = harness();
    h.connector.fail_next(1);

    let result = h.manager.request_pairing_code(SESSION).await;
    assert!(matches!(result, Err(BotError::ClientUnavailable(id)) if id == SESSION));
}

#[tokio::test]
async fn test_stale_retry_keeps_fresh_pairing_session() {
    let h = harness();
    h.connector.fail_next(1);
    assert!(h.manager.request_pairing_code(SESSION).await.is_err());

    let code = h.manager.request_pairing_code(SESSION).await.unwrap();
    assert_eq!(code.code, "ABCD1234");
    let client = h.connector.last_client(SESSION).unwrap();

    // Past the handshake retry delay scheduled by the failed attempt.
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(h.connector.connect_count(SESSION), 2);
    assert!(!client.is_ended());
    assert!(h.manager.get(SESSION).await.is_some());
}

#[tokio::test]
async fn test_send_text_requires_connected_session() {
    let h = harness_with(
        SessionManagerConfig {
            welcome_message: false,
            ..fast_config()
        },
        false,
    );
    assert!(matches!(
        h.manager.send_text("111", "hi").await,
        Err(BotError::NoSessions)
    ));

    h.manager.create(SESSION).await.unwrap();
    assert!(matches!(
        h.manager.send_text("111", "hi").await,
        Err(BotError::SessionNotConnected(_))
    ));

    h.connector.emit(SESSION, open_event(SESSION));
    wait_for_status(&h, SessionStatus::Connected).await;

    let to = h.manager.send_text("+225 11", "hi").await.unwrap();
    assert_eq!(to, "22511@s.whatsapp.net");
    let sent = h.connector.last_client(SESSION).unwrap().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "hi");
}

#[tokio::test]
async fn test_send_text_skips_sessions_still_connecting() {
    let h = harness_with(
        SessionManagerConfig {
            welcome_message: false,
            ..fast_config()
        },
        false,
    );
    h.manager.create("10000000001").await.unwrap();
    connect_session(&h).await;

    let to = h.manager.send_text("111", "hi").await.unwrap();

    assert_eq!(to, "111@s.whatsapp.net");
    assert!(h.connector.last_client("10000000001").unwrap().sent().is_empty());
    assert_eq!(h.connector.last_client(SESSION).unwrap().sent().len(), 1);
}
