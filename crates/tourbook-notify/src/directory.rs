//! Async access to the subscriber registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tourbook_shared::{ChatId, ProfileFields};
use tourbook_store::{Database, Subscriber};

use crate::error::NotifyError;

/// Durable registry of notification endpoints.
///
/// Every failure is reported as [`NotifyError::DirectoryUnavailable`].
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Insert or reactivate, merging the provided profile fields and clearing
    /// the last delivery error.
    async fn upsert_active(&self, chat_id: &ChatId, profile: &ProfileFields) -> Result<Subscriber, NotifyError>;

    /// Stop broadcasting to `chat_id`. Unknown chats are a no-op.
    async fn deactivate(&self, chat_id: &ChatId) -> Result<(), NotifyError>;

    /// Store a failed delivery; 400/403 also deactivate. Unknown chats are
    /// left unregistered.
    async fn record_send_error(&self, chat_id: &ChatId, code: Option<i64>, message: &str) -> Result<(), NotifyError>;

    async fn touch_activity(&self, chat_id: &ChatId) -> Result<(), NotifyError>;

    async fn get(&self, chat_id: &ChatId) -> Result<Option<Subscriber>, NotifyError>;

    async fn list_active(&self) -> Result<Vec<Subscriber>, NotifyError>;
}

/// [`SubscriberDirectory`] over the shared SQLite handle. The lock is held
/// for one statement at a time.
#[derive(Clone)]
pub struct SqliteDirectory {
    db: Arc<Mutex<Database>>,
}

impl SqliteDirectory {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriberDirectory for SqliteDirectory {
    async fn upsert_active(&self, chat_id: &ChatId, profile: &ProfileFields) -> Result<Subscriber, NotifyError> {
        let db = self.db.lock().await;
        let sub = db.upsert_active_subscriber(chat_id, profile, Utc::now())?;
        tracing::info!(chat_id = %chat_id, kind = %sub.kind, "subscriber active");
        Ok(sub)
    }

    async fn deactivate(&self, chat_id: &ChatId) -> Result<(), NotifyError> {
        let db = self.db.lock().await;
        if db.deactivate_subscriber(chat_id, Utc::now())? {
            tracing::info!(chat_id = %chat_id, "subscriber deactivated");
        }
        Ok(())
    }

    async fn record_send_error(&self, chat_id: &ChatId, code: Option<i64>, message: &str) -> Result<(), NotifyError> {
        let db = self.db.lock().await;
        if let Some(sub) = db.record_send_error(chat_id, code, message, Utc::now())? {
            if !sub.is_active {
                tracing::info!(chat_id = %chat_id, code = ?code, "subscriber deactivated after delivery failure");
            }
        }
        Ok(())
    }

    async fn touch_activity(&self, chat_id: &ChatId) -> Result<(), NotifyError> {
        let db = self.db.lock().await;
        db.touch_subscriber(chat_id, Utc::now())?;
        Ok(())
    }

    async fn get(&self, chat_id: &ChatId) -> Result<Option<Subscriber>, NotifyError> {
        let db = self.db.lock().await;
        Ok(db.get_subscriber(chat_id)?)
    }

    async fn list_active(&self) -> Result<Vec<Subscriber>, NotifyError> {
        let db = self.db.lock().await;
        Ok(db.list_active_subscribers()?)
    }
}

#[cfg(test)]
mod tests {
    use tourbook_shared::ChatKind;

    use super::*;

    fn directory() -> SqliteDirectory {
        SqliteDirectory::new(Arc::new(Mutex::new(Database::open_in_memory().unwrap())))
    }

    #[tokio::test]
    async fn lifecycle_through_the_trait() {
        let dir = directory();
        let id = ChatId::from(-100123_i64);
        let profile = ProfileFields {
            kind: Some(ChatKind::Group),
            title: Some("Guides".into()),
            ..Default::default()
        };

        let sub = dir.upsert_active(&id, &profile).await.unwrap();
        assert!(sub.is_active);
        assert_eq!(dir.list_active().await.unwrap().len(), 1);

        dir.touch_activity(&id).await.unwrap();
        dir.record_send_error(&id, Some(500), "Internal Server Error").await.unwrap();
        assert_eq!(dir.list_active().await.unwrap().len(), 1);

        dir.deactivate(&id).await.unwrap();
        assert!(dir.list_active().await.unwrap().is_empty());

        let again = dir.upsert_active(&id, &ProfileFields::default()).await.unwrap();
        assert!(again.is_active);
        assert!(again.last_error.is_none());
        assert!(again.last_message_at.is_some());
    }

    #[tokio::test]
    async fn unknown_chats_are_no_ops() {
        let dir = directory();
        let ghost = ChatId::from(7_i64);
        dir.deactivate(&ghost).await.unwrap();
        dir.record_send_error(&ghost, Some(403), "blocked").await.unwrap();
        dir.touch_activity(&ghost).await.unwrap();
        assert!(dir.get(&ghost).await.unwrap().is_none());
        assert!(dir.list_active().await.unwrap().is_empty());
    }
}
