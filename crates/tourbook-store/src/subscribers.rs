use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tourbook_shared::{ChatId, ChatKind, ProfileFields};

use crate::database::{from_db_time, to_db_time, Database};
use crate::error::{Result, StoreError};
use crate::models::{DeliveryError, Subscriber};

const SUBSCRIBER_COLUMNS: &str = "chat_id, chat_type, username, first_name, last_name, title, \
     is_active, date_subscribed, last_message_at, last_error_code, last_error_message, \
     last_error_at, created_at, updated_at";

impl Database {
    /// Register `chat_id` (or re-register it) as an active subscriber.
    ///
    /// Provided profile fields overwrite stored ones; `None` keeps what is
    /// stored. Reactivation clears the last delivery error. `date_subscribed`
    /// is only written by the insert branch.
    pub fn upsert_active_subscriber(
        &self,
        chat_id: &ChatId,
        profile: &ProfileFields,
        now: DateTime<Utc>,
    ) -> Result<Subscriber> {
        let now = to_db_time(&now);
        self.conn()
            .execute(
                "INSERT INTO subscribers
                     (chat_id, chat_type, username, first_name, last_name, title,
                      is_active, date_subscribed, created_at, updated_at)
                 VALUES (?1, COALESCE(?2, 'private'), ?3, ?4, ?5, ?6, 1, ?7, ?7, ?7)
                 ON CONFLICT(chat_id) DO UPDATE SET
                     chat_type          = COALESCE(?2, chat_type),
                     username           = COALESCE(?3, username),
                     first_name         = COALESCE(?4, first_name),
                     last_name          = COALESCE(?5, last_name),
                     title              = COALESCE(?6, title),
                     is_active          = 1,
                     last_error_code    = NULL,
                     last_error_message = NULL,
                     last_error_at      = NULL,
                     updated_at         = ?7",
                params![
                    chat_id.as_str(),
                    profile.kind.map(|k| k.as_str()),
                    profile.username,
                    profile.first_name,
                    profile.last_name,
                    profile.title,
                    now,
                ],
            )
            .map_err(StoreError::from_query)?;

        self.get_subscriber(chat_id)?.ok_or(StoreError::NotFound)
    }

    /// Stop broadcasting to `chat_id`. Returns `false` when the chat is not
    /// registered; that is not an error.
    pub fn deactivate_subscriber(&self, chat_id: &ChatId, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE subscribers SET is_active = 0, updated_at = ?2 WHERE chat_id = ?1",
            params![chat_id.as_str(), to_db_time(&now)],
        )?;
        Ok(affected > 0)
    }

    /// Store the outcome of a failed delivery.
    ///
    /// Codes 400 and 403 also deactivate the subscriber. Unknown chats are
    /// left alone: a failed send never creates a record. Returns the updated
    /// subscriber, or `None` when the chat is not registered.
    pub fn record_send_error(
        &self,
        chat_id: &ChatId,
        code: Option<i64>,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>> {
        let affected = self.conn().execute(
            "UPDATE subscribers SET
                 last_error_code    = ?2,
                 last_error_message = ?3,
                 last_error_at      = ?4,
                 is_active          = CASE WHEN ?2 IN (400, 403) THEN 0 ELSE is_active END,
                 updated_at         = ?4
             WHERE chat_id = ?1",
            params![chat_id.as_str(), code, message, to_db_time(&now)],
        )?;

        if affected == 0 {
            tracing::debug!(chat_id = %chat_id, "send error for unknown chat ignored");
            return Ok(None);
        }
        self.get_subscriber(chat_id)
    }

    /// Mark inbound activity from `chat_id`. Returns `false` for unknown chats.
    pub fn touch_subscriber(&self, chat_id: &ChatId, now: DateTime<Utc>) -> Result<bool> {
        let now = to_db_time(&now);
        let affected = self.conn().execute(
            "UPDATE subscribers SET last_message_at = ?2, updated_at = ?2 WHERE chat_id = ?1",
            params![chat_id.as_str(), now],
        )?;
        Ok(affected > 0)
    }

    pub fn get_subscriber(&self, chat_id: &ChatId) -> Result<Option<Subscriber>> {
        self.conn()
            .query_row(
                &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE chat_id = ?1"),
                params![chat_id.as_str()],
                row_to_subscriber,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    /// Every active subscriber, most recently updated first.
    pub fn list_active_subscribers(&self) -> Result<Vec<Subscriber>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
             WHERE is_active = 1
             ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_subscriber)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_subscriber(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscriber> {
    let chat_id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;

    let chat_id = ChatId::new(&chat_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    // Unknown kinds written by older builds read back as private.
    let kind = kind_str.parse::<ChatKind>().unwrap_or_default();

    let date_subscribed = from_db_time(7, &row.get::<_, String>(7)?)?;
    let last_message_at = row
        .get::<_, Option<String>>(8)?
        .map(|s| from_db_time(8, &s))
        .transpose()?;

    let last_error_code: Option<i64> = row.get(9)?;
    let last_error_message: Option<String> = row.get(10)?;
    let last_error_at = row
        .get::<_, Option<String>>(11)?
        .map(|s| from_db_time(11, &s))
        .transpose()?;
    let last_error = match (last_error_message, last_error_at) {
        (Some(message), Some(at)) => Some(DeliveryError {
            code: last_error_code,
            message,
            at,
        }),
        _ => None,
    };

    Ok(Subscriber {
        chat_id,
        kind,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        title: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        date_subscribed,
        last_message_at,
        last_error,
        created_at: from_db_time(12, &row.get::<_, String>(12)?)?,
        updated_at: from_db_time(13, &row.get::<_, String>(13)?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn chat(id: &str) -> ChatId {
        ChatId::new(id).unwrap()
    }

    fn profile(username: &str) -> ProfileFields {
        ProfileFields {
            kind: Some(ChatKind::Private),
            username: Some(username.into()),
            first_name: Some("Anna".into()),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_creates_then_reactivates_without_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let id = chat("-1001234567890123");
        let t0 = Utc::now();

        let first = db.upsert_active_subscriber(&id, &profile("anna"), t0).unwrap();
        assert!(first.is_active);
        assert_eq!(first.date_subscribed, first.created_at);

        db.record_send_error(&id, Some(403), "Forbidden: bot was blocked by the user", t0)
            .unwrap();

        let later = t0 + Duration::hours(3);
        let again = db
            .upsert_active_subscriber(&id, &ProfileFields::default(), later)
            .unwrap();

        assert!(again.is_active);
        assert!(again.last_error.is_none());
        assert_eq!(again.date_subscribed, first.date_subscribed);
        // Fields not provided on re-registration are kept.
        assert_eq!(again.username.as_deref(), Some("anna"));
        assert_eq!(again.updated_at, from_db_time(0, &to_db_time(&later)).unwrap());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM subscribers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upsert_merges_provided_profile_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = chat("-42");
        db.upsert_active_subscriber(&id, &profile("old"), Utc::now()).unwrap();

        let group = ProfileFields {
            kind: Some(ChatKind::Supergroup),
            title: Some("Guides".into()),
            ..Default::default()
        };
        let sub = db.upsert_active_subscriber(&id, &group, Utc::now()).unwrap();
        assert_eq!(sub.kind, ChatKind::Supergroup);
        assert_eq!(sub.title.as_deref(), Some("Guides"));
        assert_eq!(sub.username.as_deref(), Some("old"));
    }

    #[test]
    fn permanent_codes_deactivate() {
        let db = Database::open_in_memory().unwrap();
        for (id, code) in [("1", 400), ("2", 403)] {
            db.upsert_active_subscriber(&chat(id), &profile(id), Utc::now()).unwrap();
            let sub = db
                .record_send_error(&chat(id), Some(code), "gone", Utc::now())
                .unwrap()
                .unwrap();
            assert!(!sub.is_active, "code {code} should deactivate");
            assert_eq!(sub.last_error.unwrap().code, Some(code));
        }
    }

    #[test]
    fn other_codes_keep_subscriber_active() {
        let db = Database::open_in_memory().unwrap();
        let id = chat("7");
        db.upsert_active_subscriber(&id, &profile("x"), Utc::now()).unwrap();

        for code in [Some(429), Some(500), None] {
            let sub = db
                .record_send_error(&id, code, "temporary", Utc::now())
                .unwrap()
                .unwrap();
            assert!(sub.is_active);
            let err = sub.last_error.unwrap();
            assert_eq!(err.code, code);
            assert_eq!(err.message, "temporary");
        }
    }

    #[test]
    fn send_error_never_creates_subscriber() {
        let db = Database::open_in_memory().unwrap();
        let result = db
            .record_send_error(&chat("999"), Some(403), "blocked", Utc::now())
            .unwrap();
        assert!(result.is_none());
        assert!(db.get_subscriber(&chat("999")).unwrap().is_none());
    }

    #[test]
    fn deactivate_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id = chat("5");
        db.upsert_active_subscriber(&id, &profile("x"), Utc::now()).unwrap();

        assert!(db.deactivate_subscriber(&id, Utc::now()).unwrap());
        assert!(db.deactivate_subscriber(&id, Utc::now()).unwrap());
        assert!(!db.deactivate_subscriber(&chat("absent"), Utc::now()).unwrap());
        assert!(!db.get_subscriber(&id).unwrap().unwrap().is_active);
    }

    #[test]
    fn touch_updates_last_message_only_for_known_chats() {
        let db = Database::open_in_memory().unwrap();
        let id = chat("11");
        db.upsert_active_subscriber(&id, &profile("x"), Utc::now()).unwrap();

        assert!(db.touch_subscriber(&id, Utc::now()).unwrap());
        assert!(db.get_subscriber(&id).unwrap().unwrap().last_message_at.is_some());
        assert!(!db.touch_subscriber(&chat("12"), Utc::now()).unwrap());
    }

    #[test]
    fn list_active_excludes_deactivated() {
        let db = Database::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            db.upsert_active_subscriber(&chat(id), &profile(id), Utc::now()).unwrap();
        }
        db.record_send_error(&chat("b"), Some(400), "chat not found", Utc::now())
            .unwrap();

        let mut ids: Vec<String> = db
            .list_active_subscribers()
            .unwrap()
            .into_iter()
            .map(|s| s.chat_id.as_str().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn large_group_ids_survive_as_text() {
        let db = Database::open_in_memory().unwrap();
        let id = chat("-1009007199254740993");
        db.upsert_active_subscriber(&id, &ProfileFields::default(), Utc::now())
            .unwrap();
        let stored = db.get_subscriber(&id).unwrap().unwrap();
        assert_eq!(stored.chat_id.as_str(), "-1009007199254740993");
        assert_eq!(stored.kind, ChatKind::Private);
    }
}
