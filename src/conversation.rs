//! # Feature: Conversation Engine
//!
//! Per-user state machine that collects a reminder in two steps: the message,
//! then the time. State lives in the database between messages and is never
//! cached here.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Re-prompt when the time cannot be parsed
//! - 1.0.0: Initial message/time flow

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::database::{Database, UserKey};
use crate::scheduler::ReminderScheduler;
use crate::time_parser::parse_time;

pub const PROMPT_MESSAGE: &str = "Now send me the message";
pub const PROMPT_TIME: &str = "Now send the time";
pub const NOT_UNDERSTOOD: &str = "Didn't understand that";
pub const TIME_NOT_UNDERSTOOD: &str =
    "I couldn't read that time. Send a number and a unit, like `10 min`, `2 hours` or `1 month`.";
pub const HELP_TEXT: &str = "Hello! I can remind you of things.\n\n\
    Use `/tickle`, then send me the message, then tell me when: \
    a number and a unit such as `30 s`, `10 min`, `2 h`, `3 months` or `1 year`.";

/// Where a user is in the reminder flow. `Idle` is persisted as NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingMessage,
    AwaitingTime { pending_message: String },
}

impl ConversationState {
    /// JSON for storage, or `None` for idle
    pub fn encode(&self) -> Result<Option<String>> {
        match self {
            ConversationState::Idle => Ok(None),
            other => Ok(Some(serde_json::to_string(other)?)),
        }
    }

    pub fn decode(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationState::Idle)
    }
}

#[derive(Clone)]
pub struct ConversationEngine {
    database: Database,
    scheduler: ReminderScheduler,
}

impl ConversationEngine {
    pub fn new(database: Database, scheduler: ReminderScheduler) -> Self {
        ConversationEngine {
            database,
            scheduler,
        }
    }

    /// Handle a command and return the reply for the user
    pub async fn handle_command(&self, user: UserKey, command: Command) -> Result<String> {
        match command {
            Command::Start | Command::Help => Ok(HELP_TEXT.to_string()),
            Command::Tickle => {
                self.database
                    .set_state(user, &ConversationState::AwaitingMessage)
                    .await?;
                debug!("User {user} started a reminder");
                Ok(PROMPT_MESSAGE.to_string())
            }
        }
    }

    /// Handle an incoming message. `text` is `None` when the message carried
    /// no text (attachments, stickers). Returns the reply, if any.
    pub async fn handle_text(&self, user: UserKey, text: Option<&str>) -> Result<Option<String>> {
        let text = text.filter(|t| !t.trim().is_empty());

        match self.database.get_state(user).await? {
            ConversationState::Idle => Ok(Some(NOT_UNDERSTOOD.to_string())),
            ConversationState::AwaitingMessage => {
                let Some(message) = text else {
                    return Ok(None);
                };

                self.database
                    .set_state(
                        user,
                        &ConversationState::AwaitingTime {
                            pending_message: message.to_string(),
                        },
                    )
                    .await?;
                Ok(Some(PROMPT_TIME.to_string()))
            }
            ConversationState::AwaitingTime { pending_message } => {
                let Some(text) = text else {
                    return Ok(None);
                };

                let Some(due_at) = parse_time(text) else {
                    debug!("User {user} sent an unparseable time: {text:?}");
                    return Ok(Some(TIME_NOT_UNDERSTOOD.to_string()));
                };

                self.database.set_state(user, &ConversationState::Idle).await?;
                let reminder_id = self
                    .database
                    .add_reminder(user, &pending_message, due_at)
                    .await?;
                self.scheduler.arm(reminder_id, due_at);

                info!("User {user} scheduled reminder {reminder_id} for {due_at}");
                Ok(Some(format!("OK, I'll remind you <t:{due_at}:R>")))
            }
        }
    }

    /// Route a raw chat message. Typed commands work in any channel; other text
    /// in a shared channel is only taken up while the user is mid-flow.
    pub async fn handle_message(
        &self,
        user: UserKey,
        text: Option<&str>,
        direct: bool,
    ) -> Result<Option<String>> {
        if let Some(command) = text.and_then(Command::from_text) {
            return Ok(Some(self.handle_command(user, command).await?));
        }

        if !direct && !self.has_active_conversation(user).await? {
            return Ok(None);
        }
        self.handle_text(user, text).await
    }

    /// Whether `user` is somewhere in the middle of the flow
    pub async fn has_active_conversation(&self, user: UserKey) -> Result<bool> {
        Ok(!self.database.get_state(user).await?.is_idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Delivery;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SilentDelivery;

    #[async_trait]
    impl Delivery for SilentDelivery {
        async fn send_message(&self, _user: UserKey, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn engine() -> (ConversationEngine, Database) {
        let db = Database::new(":memory:").await.unwrap();
        let scheduler = ReminderScheduler::new(db.clone(), Arc::new(SilentDelivery));
        (ConversationEngine::new(db.clone(), scheduler), db)
    }

    #[test]
    fn test_state_encoding() {
        assert_eq!(ConversationState::Idle.encode().unwrap(), None);
        assert_eq!(
            ConversationState::AwaitingMessage.encode().unwrap().as_deref(),
            Some(r#"{"phase":"awaiting_message"}"#)
        );

        let json = ConversationState::AwaitingTime {
            pending_message: "Buy milk".to_string(),
        }
        .encode()
        .unwrap()
        .unwrap();
        assert_eq!(json, r#"{"phase":"awaiting_time","pending_message":"Buy milk"}"#);
        assert_eq!(
            ConversationState::decode(&json).unwrap(),
            ConversationState::AwaitingTime {
                pending_message: "Buy milk".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_phase() {
        assert!(ConversationState::decode(r#"{"phase":"dancing"}"#).is_err());
        assert!(ConversationState::decode(r#"{"phase":"awaiting_time"}"#).is_err());
    }

    #[tokio::test]
    async fn test_help_and_start_leave_state_alone() {
        let (engine, db) = engine().await;

        assert_eq!(engine.handle_command(1, Command::Help).await.unwrap(), HELP_TEXT);
        assert_eq!(engine.handle_command(1, Command::Start).await.unwrap(), HELP_TEXT);
        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn test_tickle_prompts_for_message() {
        let (engine, db) = engine().await;

        let reply = engine.handle_command(1, Command::Tickle).await.unwrap();
        assert_eq!(reply, PROMPT_MESSAGE);
        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::AwaitingMessage);
        assert!(engine.has_active_conversation(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_idle_text_is_not_understood() {
        let (engine, db) = engine().await;

        let reply = engine.handle_text(1, Some("hello there")).await.unwrap();
        assert_eq!(reply.as_deref(), Some(NOT_UNDERSTOOD));
        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::Idle);
        assert!(!engine.has_active_conversation(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_text_is_ignored_while_awaiting_message() {
        let (engine, db) = engine().await;
        engine.handle_command(1, Command::Tickle).await.unwrap();

        assert_eq!(engine.handle_text(1, None).await.unwrap(), None);
        assert_eq!(engine.handle_text(1, Some("   ")).await.unwrap(), None);
        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::AwaitingMessage);
    }

    #[tokio::test]
    async fn test_bad_time_reprompts_and_keeps_state() {
        let (engine, db) = engine().await;
        engine.handle_command(1, Command::Tickle).await.unwrap();
        engine.handle_text(1, Some("Buy milk")).await.unwrap();

        let reply = engine.handle_text(1, Some("tomorrow-ish")).await.unwrap();
        assert_eq!(reply.as_deref(), Some(TIME_NOT_UNDERSTOOD));
        assert_eq!(
            db.get_state(1).await.unwrap(),
            ConversationState::AwaitingTime {
                pending_message: "Buy milk".to_string()
            }
        );
        assert!(db.due_reminders(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tickle_restarts_flow_mid_conversation() {
        let (engine, db) = engine().await;
        engine.handle_command(1, Command::Tickle).await.unwrap();
        engine.handle_text(1, Some("Old message")).await.unwrap();

        engine.handle_command(1, Command::Tickle).await.unwrap();
        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::AwaitingMessage);
    }

    #[tokio::test]
    async fn test_typed_commands_work_in_shared_channels() {
        let (engine, db) = engine().await;

        let reply = engine.handle_message(1, Some("/help"), false).await.unwrap();
        assert_eq!(reply.as_deref(), Some(HELP_TEXT));

        let reply = engine.handle_message(1, Some("/tickle"), false).await.unwrap();
        assert_eq!(reply.as_deref(), Some(PROMPT_MESSAGE));
        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::AwaitingMessage);

        let reply = engine.handle_message(1, Some("Buy milk"), false).await.unwrap();
        assert_eq!(reply.as_deref(), Some(PROMPT_TIME));
    }

    #[tokio::test]
    async fn test_shared_channel_chatter_is_ignored_when_idle() {
        let (engine, _db) = engine().await;

        assert_eq!(engine.handle_message(1, Some("hello all"), false).await.unwrap(), None);
        assert_eq!(
            engine.handle_message(1, Some("hello bot"), true).await.unwrap().as_deref(),
            Some(NOT_UNDERSTOOD)
        );
    }

    #[tokio::test]
    async fn test_completed_flow_creates_and_arms_reminder() {
        let (engine, db) = engine().await;
        engine.handle_command(1, Command::Tickle).await.unwrap();

        let reply = engine.handle_text(1, Some("Buy milk")).await.unwrap();
        assert_eq!(reply.as_deref(), Some(PROMPT_TIME));

        let before = chrono::Utc::now().timestamp();
        let reply = engine.handle_text(1, Some("2 hours")).await.unwrap().unwrap();
        assert!(reply.starts_with("OK"));

        assert_eq!(db.get_state(1).await.unwrap(), ConversationState::Idle);
        let due = db.due_reminders(i64::MAX).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].due_at >= before + 7200 && due[0].due_at <= before + 7201);
        assert!(engine.scheduler.is_armed(due[0].id));
    }
}
