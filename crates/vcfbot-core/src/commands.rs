//! Command table and dispatch of prefixed chat commands.
//!
//! The table is built once at startup through [`CommandDispatcherBuilder`] and
//! is immutable afterwards.

use crate::client::ProtocolClient;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vcfbot_types::{jid, MessageKey, NormalizedMessage};

/// Reply sent to the chat when a handler fails.
pub const COMMAND_FAILURE_REPLY: &str = "❌ Error while executing the command.";

/// A chat command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()>;
}

/// Everything a handler gets to know about one invocation.
pub struct CommandContext {
    pub session_id: String,
    pub chat: String,
    pub sender: String,
    pub command: String,
    /// Whitespace-separated tokens after the command token.
    pub args: Vec<String>,
    pub prefix: String,
    /// Sender is the session's own account.
    pub is_owner: bool,
    pub is_group: bool,
    pub push_name: String,
    client: Arc<dyn ProtocolClient>,
    quoted: MessageKey,
}

impl CommandContext {
    /// Arguments joined back into one string.
    pub fn query(&self) -> String {
        self.args.join(" ")
    }

    /// Send `text` to the originating chat, quoting the command message.
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.client
            .send_text(&self.chat, text, Some(&self.quoted))
            .await
    }
}

/// What `dispatch` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Text does not start with the prefix or has no token after it.
    NotCommand,
    /// Token is not registered.
    Unknown,
    /// Message was sent by the bot's own account.
    SelfMessage,
    Handled,
    /// Handler returned an error; a failure reply was attempted.
    Failed,
}

/// Split prefixed text into a lowercase command token and its arguments.
///
/// Returns `None` when the text does not start with `prefix` or nothing
/// follows it.
pub fn parse_command(text: &str, prefix: &str) -> Option<(String, Vec<String>)> {
    let rest = text.strip_prefix(prefix)?;
    let mut tokens = rest.split_whitespace();
    let command = tokens.next()?.to_lowercase();
    let args = tokens.map(str::to_string).collect();
    Some((command, args))
}

/// Builds the immutable command table.
#[derive(Default)]
pub struct CommandDispatcherBuilder {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandDispatcherBuilder {
    /// Register a handler under several names. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(mut self, names: &[&str], handler: Arc<dyn CommandHandler>) -> Self {
        for name in names {
            let key = name.to_lowercase();
            if self.handlers.insert(key.clone(), handler.clone()).is_some() {
                warn!(target: "vcfbot::commands", "Command '{}' registered twice, keeping the last", key);
            } else {
                info!(target: "vcfbot::commands", "Loaded command: {}", key);
            }
        }
        self
    }

    pub fn build(self) -> CommandDispatcher {
        CommandDispatcher {
            handlers: self.handlers,
        }
    }
}

/// Maps command tokens to handlers and invokes them.
pub struct CommandDispatcher {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn builder() -> CommandDispatcherBuilder {
        CommandDispatcherBuilder::default()
    }

    /// A dispatcher with no commands.
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_lowercase())
    }

    /// Run the handler for `message`, if it is a registered command.
    ///
    /// Handler errors are logged and answered with [`COMMAND_FAILURE_REPLY`];
    /// they never propagate to the caller.
    pub async fn dispatch(
        &self,
        session_id: &str,
        message: &NormalizedMessage,
        prefix: &str,
        own_user_id: &str,
        client: Arc<dyn ProtocolClient>,
    ) -> DispatchOutcome {
        let Some((command, args)) = parse_command(&message.text, prefix) else {
            return DispatchOutcome::NotCommand;
        };
        let Some(handler) = self.handlers.get(&command) else {
            debug!(target: "vcfbot::commands", "Unknown command '{}' in {}", command, message.chat);
            return DispatchOutcome::Unknown;
        };
        if message.from_me {
            return DispatchOutcome::SelfMessage;
        }

        let ctx = CommandContext {
            session_id: session_id.to_string(),
            chat: message.chat.clone(),
            sender: message.sender.clone(),
            command: command.clone(),
            args,
            prefix: prefix.to_string(),
            is_owner: jid::jid_user(&message.sender) == jid::jid_user(own_user_id),
            is_group: message.is_group,
            push_name: message.push_name.clone().unwrap_or_else(|| "User".to_string()),
            client,
            quoted: message.key.clone(),
        };

        info!(
            target: "vcfbot::commands",
            "Session {} running '{}' for {}",
            session_id, command, ctx.sender
        );

        match handler.execute(&ctx).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                error!(target: "vcfbot::commands", "Command '{}' failed: {:#}", command, e);
                if let Err(reply_err) = ctx.reply(COMMAND_FAILURE_REPLY).await {
                    warn!(
                        target: "vcfbot::commands",
                        "Failed to send failure reply to {}: {}",
                        ctx.chat, reply_err
                    );
                }
                DispatchOutcome::Failed
            }
        }
    }
}
