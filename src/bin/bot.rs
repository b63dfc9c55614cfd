//! Tickle reminder bot entry point
//!
//! Loads `instance/config.yaml` (or `CONFIG_FILE`), opens the database, starts
//! the reminder scheduler and connects to the Discord gateway.

use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::{GuildId, UserId};
use serenity::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tickle::commands::{register_global_commands, register_guild_commands, Command};
use tickle::conversation::NOT_UNDERSTOOD;
use tickle::{Config, ConversationEngine, Database, DiscordDelivery, ReminderScheduler, UserKey};

const ERROR_REPLY: &str = "Sorry, I encountered an error processing your message.";

struct Handler {
    engine: ConversationEngine,
    guild_id: Option<GuildId>,
}

fn user_key(user_id: UserId) -> Result<UserKey> {
    Ok(UserKey::try_from(user_id.0)?)
}

impl Handler {
    async fn handle_message(&self, ctx: &Context, msg: &Message) -> Result<()> {
        let user = user_key(msg.author.id)?;
        let is_dm = msg.guild_id.is_none();
        let text = (!msg.content.is_empty()).then_some(msg.content.as_str());

        let reply = self.engine.handle_message(user, text, is_dm).await?;

        if let Some(reply) = reply {
            msg.channel_id.say(&ctx.http, reply).await?;
        }
        Ok(())
    }

    async fn handle_slash_command(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
    ) -> Result<()> {
        let user = user_key(command.user.id)?;
        let reply = match Command::from_name(&command.data.name) {
            Some(cmd) => self.engine.handle_command(user, cmd).await?,
            None => NOT_UNDERSTOOD.to_string(),
        };

        command
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|message| message.content(&reply))
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        if let Err(e) = self.handle_message(&ctx, &msg).await {
            error!("Error handling message from {}: {e}", msg.author.id);
            if let Err(why) = msg.channel_id.say(&ctx.http, ERROR_REPLY).await {
                error!("Failed to send error message: {why}");
            }
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected and ready!", ready.user.name);

        let registered = match self.guild_id {
            Some(guild_id) => {
                info!("Development mode: Registering commands for guild {guild_id}");
                register_guild_commands(&ctx, guild_id).await
            }
            None => register_global_commands(&ctx).await,
        };

        if let Err(e) = registered {
            error!("Failed to register slash commands: {e}");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::ApplicationCommand(command) = interaction {
            if let Err(e) = self.handle_slash_command(&ctx, &command).await {
                error!("Error handling slash command '{}': {}", command.data.name, e);

                if let Err(why) = command
                    .create_interaction_response(&ctx.http, |response| {
                        response
                            .kind(InteractionResponseType::ChannelMessageWithSource)
                            .interaction_response_data(|message| message.content(ERROR_REPLY))
                    })
                    .await
                {
                    error!("Failed to send error response: {why}");
                }
            }
        }
    }
}

/// Run the gateway client with retry logic
async fn run_bot(config: &Config, engine: ConversationEngine) -> Result<()> {
    let max_retries = 5;
    let mut retry_count = 0;

    loop {
        info!("Starting bot (attempt {}/{})", retry_count + 1, max_retries);

        match run_bot_inner(config, engine.clone()).await {
            Ok(()) => {
                info!("Bot exited normally");
                return Ok(());
            }
            Err(e) => {
                retry_count += 1;
                if retry_count >= max_retries {
                    error!("Bot failed after {} retries: {}", max_retries, e);
                    return Err(e);
                }

                let delay = Duration::from_secs(5 * retry_count as u64);
                warn!("Bot failed: {}. Retrying in {:?}...", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn run_bot_inner(config: &Config, engine: ConversationEngine) -> Result<()> {
    let handler = Handler {
        engine,
        guild_id: config.guild_id().map(GuildId),
    };

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| anyhow::anyhow!("Client creation failed: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    let shutdown = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                shard_manager.lock().await.shutdown_all().await;
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    info!("Connecting to Discord gateway...");
    let result = client.start().await;
    shutdown.abort();

    result.map_err(|e| anyhow::anyhow!("Gateway connection failed: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::auto_load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    info!("Starting Tickle reminder bot...");

    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let database = Database::new(&config.database_path).await?;

    // Delivery gets its own HTTP client so the scheduler can run before the gateway connects
    let http = Arc::new(Http::new(&config.discord_token));
    let scheduler = ReminderScheduler::new(database.clone(), Arc::new(DiscordDelivery::new(http)));
    let engine = ConversationEngine::new(database, scheduler.clone());

    tokio::spawn(scheduler.run());

    run_bot(&config, engine).await
}
