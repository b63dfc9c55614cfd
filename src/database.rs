use anyhow::Result;
use log::{debug, info, warn};
use sqlite::{Connection, State};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::conversation::ConversationState;

/// Stable user identifier handed over by the transport layer
pub type UserKey = i64;

/// A pending reminder as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueReminder {
    pub id: i64,
    pub due_at: i64,
}

/// How long a statement waits on a lock held by another connection
pub const BUSY_TIMEOUT_MS: usize = 5_000;

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn new(database_path: &str) -> Result<Self> {
        let mut connection = sqlite::open(database_path)?;
        connection.set_busy_timeout(BUSY_TIMEOUT_MS)?;
        let db = Database {
            connection: Arc::new(Mutex::new(connection)),
        };

        db.init_tables().await?;
        info!("Database initialized at: {database_path}");
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        let conn = self.connection.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                user INTEGER PRIMARY KEY,
                state TEXT
            )",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tickle (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time INTEGER NOT NULL,
                user INTEGER NOT NULL,
                message TEXT NOT NULL
            )",
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tickle_time
             ON tickle(time)",
        )?;

        Ok(())
    }

    // Conversation State Methods

    /// Replace the stored state for `user`. Idle is stored as NULL, the row is kept.
    pub async fn set_state(&self, user: UserKey, state: &ConversationState) -> Result<()> {
        let conn = self.connection.lock().await;

        match state.encode()? {
            Some(json) => {
                let mut statement =
                    conn.prepare("INSERT OR REPLACE INTO users (user, state) VALUES (?, ?)")?;
                statement.bind((1, user))?;
                statement.bind((2, json.as_str()))?;
                statement.next()?;
            }
            None => {
                let mut statement =
                    conn.prepare("INSERT OR REPLACE INTO users (user, state) VALUES (?, NULL)")?;
                statement.bind((1, user))?;
                statement.next()?;
            }
        }

        debug!("Stored state for user {user}: {state:?}");
        Ok(())
    }

    pub async fn get_state(&self, user: UserKey) -> Result<ConversationState> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT state FROM users WHERE user = ?")?;
        statement.bind((1, user))?;

        if let State::Row = statement.next()? {
            if let Some(json) = statement.read::<Option<String>, _>(0)? {
                return Ok(ConversationState::decode(&json).unwrap_or_else(|e| {
                    warn!("Discarding unreadable state for user {user}: {e}");
                    ConversationState::Idle
                }));
            }
        }

        Ok(ConversationState::Idle)
    }

    // Reminder Methods

    pub async fn add_reminder(&self, owner: UserKey, payload: &str, due_at: i64) -> Result<i64> {
        if payload.is_empty() {
            anyhow::bail!("Reminder payload must not be empty");
        }

        let conn = self.connection.lock().await;
        let mut statement =
            conn.prepare("INSERT INTO tickle (time, user, message) VALUES (?, ?, ?)")?;
        statement.bind((1, due_at))?;
        statement.bind((2, owner))?;
        statement.bind((3, payload))?;
        statement.next()?;

        let mut stmt = conn.prepare("SELECT last_insert_rowid()")?;
        stmt.next()?;
        let reminder_id = stmt.read::<i64, _>(0)?;
        info!("Added reminder {reminder_id} for user {owner} due at {due_at}");
        Ok(reminder_id)
    }

    /// All pending reminders due at or before `before_or_at`, in no particular order
    pub async fn due_reminders(&self, before_or_at: i64) -> Result<Vec<DueReminder>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT id, time FROM tickle WHERE time <= ?")?;
        statement.bind((1, before_or_at))?;

        let mut reminders = Vec::new();
        while let State::Row = statement.next()? {
            let id = statement.read::<i64, _>(0)?;
            let due_at = statement.read::<i64, _>(1)?;
            reminders.push(DueReminder { id, due_at });
        }
        Ok(reminders)
    }

    /// Read and delete a reminder in one transaction.
    ///
    /// Only the first caller for a given id gets `Some((owner, payload))`;
    /// every later or concurrent caller gets `None`. On any error, including a
    /// failed commit, the transaction is rolled back and the reminder stays stored.
    pub async fn take_reminder(&self, reminder_id: i64) -> Result<Option<(UserKey, String)>> {
        let conn = self.connection.lock().await;
        conn.execute("BEGIN IMMEDIATE")?;

        let result = Self::take_in_transaction(&conn, reminder_id).and_then(|taken| {
            conn.execute("COMMIT")?;
            Ok(taken)
        });

        if let Err(e) = &result {
            warn!("Taking reminder {reminder_id} failed, rolling back: {e}");
            if let Err(rollback) = conn.execute("ROLLBACK") {
                warn!("Rollback after failed take of reminder {reminder_id} failed: {rollback}");
            }
        }
        result
    }

    fn take_in_transaction(conn: &Connection, reminder_id: i64) -> Result<Option<(UserKey, String)>> {
        let mut statement = conn.prepare("SELECT user, message FROM tickle WHERE id = ?")?;
        statement.bind((1, reminder_id))?;

        let taken = if let State::Row = statement.next()? {
            let owner = statement.read::<i64, _>(0)?;
            let payload = statement.read::<String, _>(1)?;
            Some((owner, payload))
        } else {
            None
        };
        drop(statement);

        if taken.is_some() {
            let mut delete = conn.prepare("DELETE FROM tickle WHERE id = ?")?;
            delete.bind((1, reminder_id))?;
            delete.next()?;
        }

        Ok(taken)
    }
}
