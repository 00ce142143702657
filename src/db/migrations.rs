//! Schema versioning in `schema_meta` and the forward-only migration list.
//!
//! `init_schema` always lays down the version 1 tables. Each entry in
//! [`MIGRATIONS`] moves the database one version forward inside its own
//! transaction; a database is never moved backwards.

use rusqlite::{Connection, OptionalExtension};

const SCHEMA_VERSION_KEY: &str = "schema_version";
const EXTRACTOR_PROVIDER_KEY: &str = "extractor_provider";

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// v2: the background processor sweeps chunks in the order they describe,
/// not the order they arrived, so the status index is keyed on `observed_at`.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    name: "sweep chunks by observed time",
    sql: "DROP INDEX IF EXISTS idx_chunks_status;
          CREATE INDEX IF NOT EXISTS idx_chunks_sweep ON transcript_chunks(status, observed_at);",
}];

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

fn meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM schema_meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Stored schema version. A missing or unreadable value counts as version 1.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    Ok(meta(conn, SCHEMA_VERSION_KEY)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(1))
}

/// Extractor that segmented the stored events, if one was recorded.
pub fn get_extractor_provider(conn: &Connection) -> rusqlite::Result<Option<String>> {
    meta(conn, EXTRACTOR_PROVIDER_KEY)
}

pub fn set_extractor_provider(conn: &Connection, provider: &str) -> rusqlite::Result<()> {
    set_meta(conn, EXTRACTOR_PROVIDER_KEY, provider)
}

/// Apply every migration newer than the stored version, in order.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let from = get_schema_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > from);

    for migration in pending {
        tracing::info!(version = migration.version, name = migration.name, "applying migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        set_meta(&tx, SCHEMA_VERSION_KEY, &migration.version.to_string())?;
        tx.commit()?;
    }
    Ok(())
}
