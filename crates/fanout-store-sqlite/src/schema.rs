//! SQL schema for the Fanout SQLite store.
//!
//! Executed once at connection startup. Foreign keys carry `ON DELETE
//! CASCADE` so removing a subscription removes its filters, and removing a
//! filter removes its platform bindings — the invalidation cascade the
//! dispatch core relies on.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id INTEGER PRIMARY KEY,
    endpoint        TEXT NOT NULL UNIQUE,
    p256dh          TEXT NOT NULL,
    auth            TEXT NOT NULL,
    expiration      REAL             -- expirationTime as reported by the client
);

CREATE TABLE IF NOT EXISTS filters (
    filter_id       INTEGER PRIMARY KEY,
    subscription_id INTEGER NOT NULL
                    REFERENCES subscriptions(subscription_id) ON DELETE CASCADE,
    entity_type     TEXT NOT NULL,
    pattern         TEXT NOT NULL    -- '' matches every entity of the type
);

CREATE TABLE IF NOT EXISTS filter_platforms (
    filter_id INTEGER NOT NULL REFERENCES filters(filter_id) ON DELETE CASCADE,
    platform  TEXT NOT NULL,
    UNIQUE (filter_id, platform)
);

-- Write-ahead delivery record: one row per attempted notification,
-- inserted before the transport reports any outcome. Append-only.
CREATE TABLE IF NOT EXISTS notification_history (
    history_id      INTEGER PRIMARY KEY,
    subscription_id INTEGER,         -- NULL for test notifications
    payload         TEXT NOT NULL,
    recorded_at     TEXT NOT NULL
);

-- Append-only delivery/persistence error log.
CREATE TABLE IF NOT EXISTS notification_errors (
    error_id    INTEGER PRIMARY KEY,
    source      TEXT NOT NULL,
    message     TEXT NOT NULL,
    details     TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS filters_subscription_idx  ON filters(subscription_id);
CREATE INDEX IF NOT EXISTS filters_type_idx          ON filters(entity_type);
CREATE INDEX IF NOT EXISTS filter_platforms_idx      ON filter_platforms(platform);
CREATE INDEX IF NOT EXISTS history_subscription_idx  ON notification_history(subscription_id);

PRAGMA user_version = 1;
";
