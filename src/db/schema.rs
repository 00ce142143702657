//! SQL DDL for all dayweave tables.
//!
//! Defines the `events`, `transcript_chunks`, `daily_reflections`,
//! `activity_log`, and `schema_meta` tables. Everything is partitioned by the
//! `(username, day)` pair; there are no foreign keys between the tables.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One semantic segment of a user's day
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    day TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    location TEXT NOT NULL,
    activity_type TEXT NOT NULL,
    people_involved TEXT NOT NULL DEFAULT '[]',
    mood_score INTEGER CHECK(mood_score IS NULL OR (mood_score >= 0 AND mood_score <= 10)),
    stress_level INTEGER CHECK(stress_level IS NULL OR (stress_level >= 0 AND stress_level <= 10)),
    energy_level INTEGER CHECK(energy_level IS NULL OR (energy_level >= 0 AND energy_level <= 10)),
    one_sentence_summary TEXT NOT NULL DEFAULT '',
    event_title TEXT NOT NULL DEFAULT '',
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK(end_time >= start_time)
);

CREATE INDEX IF NOT EXISTS idx_events_day ON events(username, day, start_time);

-- Incremental transcript submissions and their processing lifecycle
CREATE TABLE IF NOT EXISTS transcript_chunks (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    day TEXT NOT NULL,
    raw_text TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','processing','completed','failed')),
    claim_token TEXT,
    claimed_at TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    event_id TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_day_status ON transcript_chunks(username, day, status);
CREATE INDEX IF NOT EXISTS idx_chunks_status ON transcript_chunks(status, created_at);

-- Derived per-day aggregate, rewritten wholesale on every recompute
CREATE TABLE IF NOT EXISTS daily_reflections (
    username TEXT NOT NULL,
    day TEXT NOT NULL,
    mood_score REAL,
    stress_level REAL,
    energy_level REAL,
    highlights TEXT NOT NULL DEFAULT '[]',
    event_count INTEGER NOT NULL DEFAULT 0,
    total_minutes INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT,
    PRIMARY KEY (username, day)
);

-- Audit log
CREATE TABLE IF NOT EXISTS activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','merge','claim','complete','fail','reset','recompute','purge')),
    subject_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
