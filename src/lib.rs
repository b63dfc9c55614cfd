// Configuration
pub mod config;

// Persistence: conversation state and pending reminders
pub mod database;

// Core reminder flow
pub mod conversation;
pub mod scheduler;
pub mod time_parser;

// Transport-facing pieces
pub mod commands;
pub mod delivery;

pub use config::Config;
pub use conversation::{ConversationEngine, ConversationState};
pub use database::{Database, DueReminder, UserKey};
pub use delivery::{Delivery, DiscordDelivery};
pub use scheduler::ReminderScheduler;
pub use time_parser::{parse_time, parse_time_from, TimeUnit};
