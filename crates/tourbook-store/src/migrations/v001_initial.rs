//! v001 -- Initial schema creation.
//!
//! Creates `subscribers` (notification directory) and `tours` (catalog).

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Subscribers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS subscribers (
    chat_id            TEXT PRIMARY KEY NOT NULL,   -- always text, never integer
    chat_type          TEXT NOT NULL DEFAULT 'private',
    username           TEXT,
    first_name         TEXT,
    last_name          TEXT,
    title              TEXT,
    is_active          INTEGER NOT NULL DEFAULT 1,
    date_subscribed    TEXT NOT NULL,               -- set on insert only
    last_message_at    TEXT,
    last_error_code    INTEGER,
    last_error_message TEXT,
    last_error_at      TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscribers_active_updated
    ON subscribers(is_active, updated_at DESC);

CREATE INDEX IF NOT EXISTS idx_subscribers_type_active
    ON subscribers(chat_type, is_active);

-- ----------------------------------------------------------------
-- Tours
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tours (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    slug        TEXT NOT NULL UNIQUE,
    status      TEXT NOT NULL DEFAULT 'published',
    search_text TEXT NOT NULL,               -- lower-cased title/summary/categories/location
    body        TEXT NOT NULL,               -- full record as JSON
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tours_status_created
    ON tours(status, created_at DESC);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
