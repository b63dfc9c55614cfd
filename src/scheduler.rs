//! # Feature: Reminder Scheduler
//!
//! Arms one-shot timers for stored reminders and delivers them when due.
//! The database is authoritative; armed timers are in-memory only and are
//! rebuilt from the store on startup and on every refresh.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use anyhow::Result;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

use crate::database::Database;
use crate::delivery::Delivery;

/// How often the store is re-scanned
pub const REFRESH_INTERVAL_SECS: u64 = 60;
/// How far ahead of now a refresh arms reminders
pub const LOOKAHEAD_SECS: i64 = 120;

#[derive(Clone)]
pub struct ReminderScheduler {
    database: Database,
    delivery: Arc<dyn Delivery>,
    /// reminder id -> fire time (unix seconds)
    armed: Arc<DashMap<i64, i64>>,
}

impl ReminderScheduler {
    pub fn new(database: Database, delivery: Arc<dyn Delivery>) -> Self {
        ReminderScheduler {
            database,
            delivery,
            armed: Arc::new(DashMap::new()),
        }
    }

    /// Refresh immediately, then every `REFRESH_INTERVAL_SECS`. Never returns.
    pub async fn run(self) {
        info!("Reminder scheduler started");
        let mut interval = tokio::time::interval(Duration::from_secs(REFRESH_INTERVAL_SECS));

        loop {
            interval.tick().await;
            if let Err(e) = self.refresh().await {
                error!("Reminder refresh failed: {e}");
            }
        }
    }

    /// Arm every stored reminder due within the lookahead window that is not
    /// armed yet. Returns how many timers were newly armed.
    pub async fn refresh(&self) -> Result<usize> {
        let horizon = Utc::now().timestamp() + LOOKAHEAD_SECS;
        let due = self.database.due_reminders(horizon).await?;

        let total = due.len();
        let armed = due
            .into_iter()
            .filter(|reminder| self.arm(reminder.id, reminder.due_at))
            .count();

        debug!("Refresh found {total} reminder(s) due by {horizon}, armed {armed}");
        Ok(armed)
    }

    /// Arm a one-shot timer for `reminder_id`. Returns false if one is
    /// already armed. Must be called from within a tokio runtime.
    pub fn arm(&self, reminder_id: i64, due_at: i64) -> bool {
        match self.armed.entry(reminder_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(due_at);
            }
        }

        let delay = (due_at - Utc::now().timestamp()).max(0) as u64;
        debug!("Armed reminder {reminder_id} to fire in {delay}s");

        let database = self.database.clone();
        let delivery = self.delivery.clone();
        let armed = self.armed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            Self::fire(&database, delivery.as_ref(), reminder_id).await;
            armed.remove(&reminder_id);
        });

        true
    }

    pub fn is_armed(&self, reminder_id: i64) -> bool {
        self.armed.contains_key(&reminder_id)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    async fn fire(database: &Database, delivery: &dyn Delivery, reminder_id: i64) {
        let (owner, payload) = match database.take_reminder(reminder_id).await {
            Ok(Some(taken)) => taken,
            Ok(None) => {
                debug!("Reminder {reminder_id} already delivered");
                return;
            }
            Err(e) => {
                error!("Failed to load reminder {reminder_id}: {e}");
                return;
            }
        };

        match delivery.send_message(owner, &payload).await {
            Ok(()) => info!("Delivered reminder {reminder_id} to user {owner}"),
            Err(e) => error!("Failed to deliver reminder {reminder_id} to user {owner}, it is lost: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::UserKey;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingDelivery {
        sent: Mutex<Vec<(UserKey, String)>>,
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn send_message(&self, user: UserKey, text: &str) -> Result<()> {
            self.sent.lock().await.push((user, text.to_string()));
            Ok(())
        }
    }

    struct FailingDelivery;

    #[async_trait]
    impl Delivery for FailingDelivery {
        async fn send_message(&self, _user: UserKey, _text: &str) -> Result<()> {
            anyhow::bail!("user unreachable")
        }
    }

    async fn wait_until_disarmed(scheduler: &ReminderScheduler) {
        for _ in 0..100 {
            if scheduler.armed_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timers still armed");
    }

    #[tokio::test]
    async fn test_refresh_only_arms_within_lookahead() {
        let db = Database::new(":memory:").await.unwrap();
        let now = Utc::now().timestamp();
        let soon = db.add_reminder(1, "soon", now + 100).await.unwrap();
        let later = db.add_reminder(1, "later", now + 1000).await.unwrap();

        let scheduler = ReminderScheduler::new(db, Arc::new(RecordingDelivery::default()));
        assert_eq!(scheduler.refresh().await.unwrap(), 1);
        assert!(scheduler.is_armed(soon));
        assert!(!scheduler.is_armed(later));
    }

    #[tokio::test]
    async fn test_refresh_does_not_double_arm() {
        let db = Database::new(":memory:").await.unwrap();
        let now = Utc::now().timestamp();
        db.add_reminder(1, "soon", now + 100).await.unwrap();

        let scheduler = ReminderScheduler::new(db, Arc::new(RecordingDelivery::default()));
        assert_eq!(scheduler.refresh().await.unwrap(), 1);
        assert_eq!(scheduler.refresh().await.unwrap(), 0);
        assert_eq!(scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn test_past_due_reminder_fires_and_is_removed() {
        let db = Database::new(":memory:").await.unwrap();
        let now = Utc::now().timestamp();
        db.add_reminder(3, "overdue", now - 500).await.unwrap();

        let delivery = Arc::new(RecordingDelivery::default());
        let scheduler = ReminderScheduler::new(db.clone(), delivery.clone());
        scheduler.refresh().await.unwrap();
        wait_until_disarmed(&scheduler).await;

        assert_eq!(*delivery.sent.lock().await, vec![(3, "overdue".to_string())]);
        assert!(db.due_reminders(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timer_for_deleted_reminder_is_noop() {
        let db = Database::new(":memory:").await.unwrap();
        let now = Utc::now().timestamp();
        let id = db.add_reminder(3, "gone", now).await.unwrap();
        db.take_reminder(id).await.unwrap();

        let delivery = Arc::new(RecordingDelivery::default());
        let scheduler = ReminderScheduler::new(db, delivery.clone());
        assert!(scheduler.arm(id, now));
        wait_until_disarmed(&scheduler).await;

        assert!(delivery.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_still_consumes_reminder() {
        let db = Database::new(":memory:").await.unwrap();
        let now = Utc::now().timestamp();
        let id = db.add_reminder(3, "lost", now).await.unwrap();

        let scheduler = ReminderScheduler::new(db.clone(), Arc::new(FailingDelivery));
        scheduler.arm(id, now);
        wait_until_disarmed(&scheduler).await;

        assert!(db.due_reminders(i64::MAX).await.unwrap().is_empty());
        assert!(!scheduler.is_armed(id));
    }
}
