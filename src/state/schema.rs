//! Database Schema
//!
//! Table definitions for the agent's persistent state. The audit table
//! (`modifications`) is append-only by convention: nothing in this crate
//! issues UPDATE or DELETE against it.

pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS kv (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT
);

CREATE TABLE IF NOT EXISTS heartbeat_entries (
    name        TEXT PRIMARY KEY,
    schedule    TEXT NOT NULL,
    task        TEXT NOT NULL,
    enabled     INTEGER NOT NULL DEFAULT 1,
    last_run    TEXT,
    created_at  TEXT,
    updated_at  TEXT
);

CREATE TABLE IF NOT EXISTS modifications (
    id          TEXT PRIMARY KEY,
    timestamp   TEXT NOT NULL,
    type        TEXT NOT NULL,
    description TEXT NOT NULL,
    file_path   TEXT,
    diff        TEXT,
    reversible  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS mode_transitions (
    id            TEXT PRIMARY KEY,
    from_tier     TEXT NOT NULL,
    to_tier       TEXT NOT NULL,
    credits_cents INTEGER NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inbox_messages (
    id           TEXT PRIMARY KEY,
    from_address TEXT NOT NULL,
    content      TEXT NOT NULL,
    received_at  TEXT NOT NULL,
    reply_to     TEXT,
    processed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_modifications_timestamp
    ON modifications (timestamp);
CREATE INDEX IF NOT EXISTS idx_inbox_unprocessed
    ON inbox_messages (processed_at) WHERE processed_at IS NULL;
"#;
