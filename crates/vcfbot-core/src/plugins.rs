//! Built-in chat commands.

use crate::commands::{CommandContext, CommandDispatcherBuilder, CommandHandler};
use crate::SettingsStore;
use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;

/// Names the statistics command answers to.
pub const STATS_COMMANDS: &[&str] = &["stat", "stats", "statistiques"];

/// Replies with user counts from the settings store and bot identity.
pub struct StatsCommand {
    settings: Arc<SettingsStore>,
    bot_name: String,
    bot_version: String,
}

impl StatsCommand {
    pub fn new(settings: Arc<SettingsStore>, bot_name: &str, bot_version: &str) -> Self {
        Self {
            settings,
            bot_name: bot_name.to_string(),
            bot_version: bot_version.to_string(),
        }
    }

    async fn render(&self) -> String {
        let registered = self.settings.count().await;
        format!(
            "📊 *VCF Generator statistics*\n\n\
             👥 *Registered users:* {registered}\n\n\
             🤖 *Bot:* {name} v{version}\n\
             ⚡ *Status:* Online\n\
             🔄 *Updated:* {time}",
            registered = registered,
            name = self.bot_name,
            version = self.bot_version,
            time = Local::now().format("%H:%M:%S"),
        )
    }
}

#[async_trait]
impl CommandHandler for StatsCommand {
    async fn execute(&self, ctx: &CommandContext) -> anyhow::Result<()> {
        let text = self.render().await;
        ctx.reply(&text).await?;
        Ok(())
    }
}

/// Register every built-in command on `builder`.
pub fn register_builtin(
    builder: CommandDispatcherBuilder,
    settings: Arc<SettingsStore>,
    bot_name: &str,
    bot_version: &str,
) -> CommandDispatcherBuilder {
    builder.register(
        STATS_COMMANDS,
        Arc::new(StatsCommand::new(settings, bot_name, bot_version)),
    )
}
