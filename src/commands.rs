//! Commands: /start, /help, /tickle
//!
//! The same three commands are registered as Discord slash commands and are
//! also recognized when typed as plain text.

use anyhow::Result;
use log::info;
use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::Command as ApplicationCommand;
use serenity::model::id::GuildId;
use serenity::prelude::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Tickle,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Start, Command::Help, Command::Tickle];

    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Tickle => "tickle",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Command::Start => "Say hello and see how reminders work",
            Command::Help => "Show how to set a reminder",
            Command::Tickle => "Set a new reminder",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Recognize a command typed as text, e.g. `/tickle` or `/help@bot`.
    /// Unknown `/words` are not commands and go through as free text.
    pub fn from_text(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Self::from_name(&name.to_lowercase())
    }
}

/// Creates the slash command definitions
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    Command::ALL
        .into_iter()
        .map(|command| {
            CreateApplicationCommand::default()
                .name(command.name())
                .description(command.description())
                .to_owned()
        })
        .collect()
}

/// Registers all slash commands globally
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    ApplicationCommand::set_global_application_commands(&ctx.http, |commands| {
        for command in create_commands() {
            commands.add_application_command(command);
        }
        commands
    })
    .await?;

    info!("Global slash commands registered ({} commands)", Command::ALL.len());
    Ok(())
}

/// Registers all slash commands for a specific guild (faster for testing)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id
        .set_application_commands(&ctx.http, |commands| {
            for command in create_commands() {
                commands.add_application_command(command);
            }
            commands
        })
        .await?;

    info!(
        "Guild slash commands registered for guild {} ({} commands)",
        guild_id,
        Command::ALL.len()
    );
    Ok(())
}
