//! Protocol client backed by an external bridge process.
//!
//! One bridge process runs per session. It owns the credentials under
//! `<sessions_dir>/<session id>` and speaks newline-delimited JSON:
//!
//! - stdout carries events: `connection` (connecting/open/close), `message`
//!   (a raw envelope) and `response` (the answer to a command, by id);
//! - stdin carries commands: `send_text`, `request_pairing_code`, `end`.
//!
//! If the process exits without reporting a close, a close without status
//! code is emitted so the session manager treats it as a transient failure.

use crate::client::{ClientConnector, ClientEvent, EventSender, ProtocolClient};
use crate::{BotError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use vcfbot_types::{InboundEnvelope, MessageKey};

/// How long `end` waits for the bridge to exit before killing it.
const END_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// A line written by the bridge on stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Connection {
        connection: ConnectionState,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
    },
    Message {
        message: InboundEnvelope,
    },
    Response {
        id: Uuid,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// A line written to the bridge on stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    SendText {
        id: Uuid,
        to: &'a str,
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        quoted: Option<&'a MessageKey>,
    },
    RequestPairingCode {
        id: Uuid,
        phone: &'a str,
    },
    End,
}

type ResponseResult = std::result::Result<serde_json::Value, String>;
type PendingMap = DashMap<Uuid, oneshot::Sender<ResponseResult>>;

/// Spawns one bridge process per session.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    command: PathBuf,
    args: Vec<String>,
    sessions_dir: PathBuf,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(command: PathBuf, args: Vec<String>, sessions_dir: PathBuf) -> Self {
        Self {
            command,
            args,
            sessions_dir,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Credential directory for a session.
    pub fn auth_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }
}

fn is_safe_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl ClientConnector for BridgeConnector {
    async fn connect(&self, session_id: &str, events: EventSender) -> Result<Arc<dyn ProtocolClient>> {
        if !is_safe_session_id(session_id) {
            return Err(BotError::BridgeSpawnFailed(format!(
                "Invalid session id: {:?}",
                session_id
            )));
        }

        let auth_dir = self.auth_dir(session_id);
        tokio::fs::create_dir_all(&auth_dir).await?;

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--session")
            .arg(session_id)
            .arg("--auth-dir")
            .arg(&auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            target: "vcfbot::bridge",
            "Spawning bridge {:?} for session {}",
            self.command, session_id
        );

        let mut child = cmd.spawn().map_err(|e| {
            error!(target: "vcfbot::bridge", "Failed to spawn bridge process: {}", e);
            BotError::BridgeSpawnFailed(format!("Failed to spawn {:?}: {}", self.command, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BotError::BridgeSpawnFailed("stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BotError::BridgeSpawnFailed("stdin not captured".to_string()))?;
        let stderr = child.stderr.take();

        // Channel for commands to the bridge
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);

        // Stdin writer task
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut stdin = stdin;
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Stderr reader task - log only
        if let Some(stderr) = stderr {
            let sid = session_id.to_string();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "vcfbot::bridge", "Bridge stderr [{}]: {}", sid, line);
                }
            });
        }

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let user_id = Arc::new(RwLock::new(None));
        let ended = Arc::new(AtomicBool::new(false));

        // Stdout reader task; owns the child so aborting it kills the process
        let reader = {
            let sid = session_id.to_string();
            let pending = pending.clone();
            let user_id = user_id.clone();
            let ended = ended.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stdout).lines();
                let mut closed = false;

                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(target: "vcfbot::bridge", "Bridge stdout [{}]: {}", sid, line);
                    let event = match serde_json::from_str::<BridgeEvent>(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!(target: "vcfbot::bridge", "Ignoring bridge line [{}]: {}", sid, e);
                            continue;
                        }
                    };
                    match event {
                        BridgeEvent::Response { id, ok, result, error } => {
                            if let Some((_, tx)) = pending.remove(&id) {
                                let answer = if ok {
                                    Ok(result.unwrap_or(serde_json::Value::Null))
                                } else {
                                    Err(error.unwrap_or_else(|| "request failed".to_string()))
                                };
                                let _ = tx.send(answer);
                            }
                        }
                        other => {
                            let Some(client_event) = translate(other) else {
                                continue;
                            };
                            if let ClientEvent::Open { user_id: Some(id) } = &client_event {
                                if let Ok(mut slot) = user_id.write() {
                                    *slot = Some(id.clone());
                                }
                            }
                            closed |= matches!(client_event, ClientEvent::Close { .. });
                            let _ = events.send(client_event);
                        }
                    }
                }

                let exit_code = child.wait().await.ok().and_then(|s| s.code());
                info!(target: "vcfbot::bridge", "Bridge for session {} exited with code: {:?}", sid, exit_code);

                let waiting: Vec<Uuid> = pending.iter().map(|e| *e.key()).collect();
                for id in waiting {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(Err("bridge exited".to_string()));
                    }
                }

                if !closed && !ended.load(Ordering::SeqCst) {
                    let _ = events.send(ClientEvent::Close { status_code: None });
                }
            })
        };

        Ok(Arc::new(BridgeClient {
            session_id: session_id.to_string(),
            stdin_tx,
            pending,
            user_id,
            ended,
            reader: Mutex::new(Some(reader)),
            request_timeout: self.request_timeout,
        }))
    }
}

/// Map a bridge event to a client event. Responses are handled by the reader.
fn translate(event: BridgeEvent) -> Option<ClientEvent> {
    match event {
        BridgeEvent::Connection {
            connection,
            user_id,
            status_code,
        } => Some(match connection {
            ConnectionState::Connecting => ClientEvent::Connecting,
            ConnectionState::Open => ClientEvent::Open { user_id },
            ConnectionState::Close => ClientEvent::Close { status_code },
        }),
        BridgeEvent::Message { message } => Some(ClientEvent::Message(message)),
        BridgeEvent::Response { .. } => None,
    }
}

/// Handle to one running bridge process.
pub struct BridgeClient {
    session_id: String,
    stdin_tx: mpsc::Sender<String>,
    pending: Arc<PendingMap>,
    user_id: Arc<RwLock<Option<String>>>,
    ended: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl BridgeClient {
    async fn write(&self, command: &BridgeCommand<'_>) -> Result<()> {
        let line = serde_json::to_string(command)?;
        self.stdin_tx
            .send(line)
            .await
            .map_err(|_| BotError::ChannelClosed)
    }

    async fn request(&self, id: Uuid, command: BridgeCommand<'_>) -> Result<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.write(&command).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(BotError::Client(message)),
            Ok(Err(_)) => Err(BotError::ChannelClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(BotError::Client(format!(
                    "bridge request timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    fn user_id(&self) -> Option<String> {
        self.user_id.read().ok().and_then(|id| id.clone())
    }

    async fn send_text(&self, to: &str, text: &str, quoted: Option<&MessageKey>) -> Result<()> {
        let id = Uuid::new_v4();
        self.request(id, BridgeCommand::SendText { id, to, text, quoted })
            .await
            .map(|_| ())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        let id = Uuid::new_v4();
        let value = self
            .request(id, BridgeCommand::RequestPairingCode { id, phone })
            .await?;
        match value {
            serde_json::Value::String(code) if !code.is_empty() => Ok(code),
            other => Err(BotError::Client(format!(
                "bridge returned no pairing code: {}",
                other
            ))),
        }
    }

    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "vcfbot::bridge", "Ending bridge for session {}", self.session_id);
        let _ = self.write(&BridgeCommand::End).await;

        let handle = self.reader.lock().ok().and_then(|mut h| h.take());
        let Some(mut handle) = handle else {
            return;
        };
        if tokio::time::timeout(END_GRACE_PERIOD, &mut handle).await.is_err() {
            info!(
                target: "vcfbot::bridge",
                "Bridge for session {} did not exit, killing it",
                self.session_id
            );
            handle.abort();
        }
    }
}
