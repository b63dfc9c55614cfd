//! Reminder delivery: the one thing the scheduler needs from the transport.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serenity::http::Http;
use serenity::model::id::UserId;
use std::sync::Arc;

use crate::database::UserKey;

/// Sends text back to a user
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send_message(&self, user: UserKey, text: &str) -> Result<()>;
}

/// Delivers reminders as Discord direct messages
pub struct DiscordDelivery {
    http: Arc<Http>,
}

impl DiscordDelivery {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Delivery for DiscordDelivery {
    async fn send_message(&self, user: UserKey, text: &str) -> Result<()> {
        let http: &Http = &self.http;
        let user_id = UserId(u64::try_from(user)?);
        let dm = user_id.create_dm_channel(http).await?;
        dm.say(http, text).await?;
        debug!("Sent DM to user {user}");
        Ok(())
    }
}
