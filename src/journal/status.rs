//! Transcript chunk lifecycle: register, claim, complete, fail, reset.
//!
//! Every transition is a conditional `UPDATE` keyed on the current status (and
//! the claim token where one is held), so two workers can never both win the
//! same edge. A claim is also refused while another chunk of the same
//! `(username, day)` holds a fresh claim; this serializes decide+merge per day.
//!
//! Functions take an explicit `now` so that claim expiry is testable.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

use crate::config::TrackerConfig;
use crate::db::{parse_timestamp, timestamp, write_activity_log};
use crate::error::{AnalysisError, Result};
use crate::journal::types::{ChunkStatus, TranscriptChunk};

const CHUNK_COLUMNS: &str = "id, username, day, raw_text, observed_at, status, claim_token, \
     claimed_at, retry_count, event_id, last_error, created_at, updated_at";

/// A fragment about to be tracked.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: String,
    pub username: String,
    pub day: NaiveDate,
    pub raw_text: String,
    pub observed_at: DateTime<Utc>,
}

/// A successful claim: the token must accompany `complete`/`fail`.
#[derive(Debug, Clone)]
pub struct Claim {
    pub token: String,
    pub chunk: TranscriptChunk,
}

#[derive(Debug, Default, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

struct ChunkRow {
    id: String,
    username: String,
    day: String,
    raw_text: String,
    observed_at: String,
    status: String,
    claim_token: Option<String>,
    claimed_at: Option<String>,
    retry_count: u32,
    event_id: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<ChunkRow> {
    Ok(ChunkRow {
        id: row.get(0)?,
        username: row.get(1)?,
        day: row.get(2)?,
        raw_text: row.get(3)?,
        observed_at: row.get(4)?,
        status: row.get(5)?,
        claim_token: row.get(6)?,
        claimed_at: row.get(7)?,
        retry_count: row.get(8)?,
        event_id: row.get(9)?,
        last_error: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl ChunkRow {
    fn into_chunk(self) -> Result<TranscriptChunk> {
        Ok(TranscriptChunk {
            day: self
                .day
                .parse::<NaiveDate>()
                .map_err(|e| AnalysisError::Corrupt(format!("bad day {:?}: {e}", self.day)))?,
            observed_at: parse_timestamp(&self.observed_at)?,
            status: self.status.parse().map_err(AnalysisError::Corrupt)?,
            claimed_at: self.claimed_at.as_deref().map(parse_timestamp).transpose()?,
            id: self.id,
            username: self.username,
            raw_text: self.raw_text,
            claim_token: self.claim_token,
            retry_count: self.retry_count,
            event_id: self.event_id,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Store a chunk as pending. Returns `false` when a chunk with the same id
/// already exists (the stored one is left untouched).
pub fn register(conn: &Connection, chunk: &NewChunk) -> Result<bool> {
    let now = timestamp(Utc::now());
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO transcript_chunks (id, username, day, raw_text, observed_at, status, \
         retry_count, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?6)",
        params![
            chunk.id,
            chunk.username,
            chunk.day.to_string(),
            chunk.raw_text,
            timestamp(chunk.observed_at),
            now,
        ],
    )?;
    Ok(inserted == 1)
}

pub fn get(conn: &Connection, chunk_id: &str) -> Result<Option<TranscriptChunk>> {
    let row = conn
        .query_row(
            &format!("SELECT {CHUNK_COLUMNS} FROM transcript_chunks WHERE id = ?1"),
            params![chunk_id],
            read_row,
        )
        .optional()?;
    row.map(ChunkRow::into_chunk).transpose()
}

fn require(conn: &Connection, chunk_id: &str) -> Result<TranscriptChunk> {
    get(conn, chunk_id)?.ok_or_else(|| AnalysisError::NotFound(format!("chunk {chunk_id}")))
}

fn claim_is_fresh(chunk: &TranscriptChunk, now: DateTime<Utc>, config: &TrackerConfig) -> bool {
    chunk
        .claimed_at
        .is_some_and(|at| now - at < config.claim_timeout())
}

/// Whether any chunk of the day other than `except` holds an unexpired claim.
pub fn day_has_fresh_claim(
    conn: &Connection,
    username: &str,
    day: NaiveDate,
    except: Option<&str>,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Result<bool> {
    let cutoff = timestamp(now - config.claim_timeout());
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transcript_chunks WHERE username = ?1 AND day = ?2 \
         AND status = 'processing' AND claimed_at > ?3 AND id != ?4",
        params![username, day.to_string(), cutoff, except.unwrap_or("")],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Take the processing claim on a chunk.
///
/// Allowed from `pending`, or from `processing` when the previous claim has
/// expired. A stale chunk that has already used `max_attempts` claims is
/// failed instead and [`AnalysisError::RetriesExhausted`] is returned.
pub fn claim(
    conn: &mut Connection,
    chunk_id: &str,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Result<Claim> {
    // IMMEDIATE takes the write lock up front so the day check and the update
    // cannot interleave with another claimer.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let chunk = require(&tx, chunk_id)?;

    match chunk.status {
        ChunkStatus::Pending => {}
        ChunkStatus::Processing if !claim_is_fresh(&chunk, now, config) => {
            if chunk.retry_count >= config.max_attempts {
                let reason = format!("retries exhausted after {} attempts", chunk.retry_count);
                tx.execute(
                    "UPDATE transcript_chunks SET status = 'failed', claim_token = NULL, \
                     last_error = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'processing'",
                    params![reason, timestamp(now), chunk_id],
                )?;
                write_activity_log(
                    &tx,
                    "fail",
                    chunk_id,
                    Some(&serde_json::json!({"reason": reason})),
                )?;
                tx.commit()?;
                tracing::warn!(chunk_id, attempts = chunk.retry_count, "chunk failed: retries exhausted");
                return Err(AnalysisError::RetriesExhausted {
                    chunk_id: chunk_id.to_string(),
                    attempts: chunk.retry_count,
                });
            }
            tracing::info!(chunk_id, "reclaiming chunk with expired claim");
        }
        _ => return Err(AnalysisError::AlreadyClaimed(chunk_id.to_string())),
    }

    if day_has_fresh_claim(&tx, &chunk.username, chunk.day, Some(chunk_id), now, config)? {
        return Err(AnalysisError::DayBusy {
            username: chunk.username,
            day: chunk.day.to_string(),
        });
    }

    let token = uuid::Uuid::now_v7().to_string();
    let changed = tx.execute(
        "UPDATE transcript_chunks SET status = 'processing', claim_token = ?1, claimed_at = ?2, \
         retry_count = retry_count + 1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![token, timestamp(now), chunk_id, chunk.status.as_str()],
    )?;
    if changed == 0 {
        return Err(AnalysisError::AlreadyClaimed(chunk_id.to_string()));
    }

    write_activity_log(
        &tx,
        "claim",
        chunk_id,
        Some(&serde_json::json!({"attempt": chunk.retry_count + 1})),
    )?;
    let claimed = require(&tx, chunk_id)?;
    tx.commit()?;

    Ok(Claim {
        token,
        chunk: claimed,
    })
}

/// Check that `chunk_id` is processing under `token` before moving it to `to`.
fn check_held(
    conn: &Connection,
    chunk_id: &str,
    token: &str,
    to: ChunkStatus,
) -> Result<TranscriptChunk> {
    let chunk = require(conn, chunk_id)?;
    if !chunk.status.can_transition_to(to) || chunk.status == to {
        return Err(AnalysisError::InvalidTransition {
            chunk_id: chunk_id.to_string(),
            from: chunk.status,
            to,
        });
    }
    if chunk.claim_token.as_deref() != Some(token) {
        return Err(AnalysisError::ClaimLost(chunk_id.to_string()));
    }
    Ok(chunk)
}

/// processing → completed, recording the event the fragment was folded into.
pub fn complete(
    conn: &Connection,
    chunk_id: &str,
    token: &str,
    event_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    check_held(conn, chunk_id, token, ChunkStatus::Completed)?;
    let changed = conn.execute(
        "UPDATE transcript_chunks SET status = 'completed', claim_token = NULL, event_id = ?1, \
         last_error = NULL, updated_at = ?2 WHERE id = ?3 AND status = 'processing' AND claim_token = ?4",
        params![event_id, timestamp(now), chunk_id, token],
    )?;
    if changed == 0 {
        return Err(AnalysisError::ClaimLost(chunk_id.to_string()));
    }
    write_activity_log(
        conn,
        "complete",
        chunk_id,
        Some(&serde_json::json!({"event_id": event_id})),
    )?;
    Ok(())
}

/// processing → failed with a reason.
pub fn fail(
    conn: &Connection,
    chunk_id: &str,
    token: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    check_held(conn, chunk_id, token, ChunkStatus::Failed)?;
    let changed = conn.execute(
        "UPDATE transcript_chunks SET status = 'failed', claim_token = NULL, last_error = ?1, \
         updated_at = ?2 WHERE id = ?3 AND status = 'processing' AND claim_token = ?4",
        params![reason, timestamp(now), chunk_id, token],
    )?;
    if changed == 0 {
        return Err(AnalysisError::ClaimLost(chunk_id.to_string()));
    }
    write_activity_log(
        conn,
        "fail",
        chunk_id,
        Some(&serde_json::json!({"reason": reason})),
    )?;
    tracing::warn!(chunk_id, reason, "chunk failed");
    Ok(())
}

/// Administrative failed → pending. Clears the claim and the attempt counter.
pub fn reset(conn: &Connection, chunk_id: &str, now: DateTime<Utc>) -> Result<TranscriptChunk> {
    let chunk = require(conn, chunk_id)?;
    if chunk.status != ChunkStatus::Failed {
        return Err(AnalysisError::InvalidTransition {
            chunk_id: chunk_id.to_string(),
            from: chunk.status,
            to: ChunkStatus::Pending,
        });
    }

    conn.execute(
        "UPDATE transcript_chunks SET status = 'pending', claim_token = NULL, claimed_at = NULL, \
         retry_count = 0, last_error = NULL, updated_at = ?1 WHERE id = ?2 AND status = 'failed'",
        params![timestamp(now), chunk_id],
    )?;
    write_activity_log(
        conn,
        "reset",
        chunk_id,
        Some(&serde_json::json!({"previous_error": chunk.last_error})),
    )?;
    require(conn, chunk_id)
}

/// Chunks a sweeper may try to claim: pending ones and ones whose claim
/// expired. Ordered by the moment they describe so a day replays in order.
pub fn list_claimable(
    conn: &Connection,
    now: DateTime<Utc>,
    config: &TrackerConfig,
    limit: usize,
) -> Result<Vec<TranscriptChunk>> {
    let cutoff = timestamp(now - config.claim_timeout());
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHUNK_COLUMNS} FROM transcript_chunks \
         WHERE status = 'pending' OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at <= ?1)) \
         ORDER BY observed_at ASC, created_at ASC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![cutoff, limit as i64], read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(ChunkRow::into_chunk).collect()
}

pub fn list_for_day(conn: &Connection, username: &str, day: NaiveDate) -> Result<Vec<TranscriptChunk>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHUNK_COLUMNS} FROM transcript_chunks WHERE username = ?1 AND day = ?2 \
         ORDER BY observed_at ASC, created_at ASC"
    ))?;
    let rows = stmt
        .query_map(params![username, day.to_string()], read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(ChunkRow::into_chunk).collect()
}

pub fn count_by_status(conn: &Connection) -> Result<StatusCounts> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM transcript_chunks GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut counts = StatusCounts::default();
    for (status, n) in rows {
        let n = n as u64;
        match status.parse::<ChunkStatus>().map_err(AnalysisError::Corrupt)? {
            ChunkStatus::Pending => counts.pending = n,
            ChunkStatus::Processing => counts.processing = n,
            ChunkStatus::Completed => counts.completed = n,
            ChunkStatus::Failed => counts.failed = n,
        }
    }
    Ok(counts)
}

/// Chunks that need an operator's attention.
#[derive(Debug, Default, Serialize)]
pub struct PipelineHealth {
    pub counts: StatusCounts,
    /// Processing chunks whose claim outlived the claim timeout.
    pub stale_claims: u64,
    /// Failed chunks that used up their attempts. Only a reset revives them.
    pub exhausted: u64,
    /// When the longest-waiting pending chunk was registered.
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Latest failures, newest first, as (chunk id, error).
    pub recent_failures: Vec<(String, String)>,
}

pub fn pipeline_health(
    conn: &Connection,
    now: DateTime<Utc>,
    config: &TrackerConfig,
    failure_limit: usize,
) -> Result<PipelineHealth> {
    let cutoff = timestamp(now - config.claim_timeout());
    let stale_claims: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transcript_chunks WHERE status = 'processing' \
         AND (claimed_at IS NULL OR claimed_at <= ?1)",
        params![cutoff],
        |row| row.get(0),
    )?;
    let exhausted: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transcript_chunks WHERE status = 'failed' AND retry_count >= ?1",
        params![config.max_attempts],
        |row| row.get(0),
    )?;
    let oldest_pending: Option<String> = conn.query_row(
        "SELECT MIN(created_at) FROM transcript_chunks WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT id, COALESCE(last_error, '') FROM transcript_chunks WHERE status = 'failed' \
         ORDER BY updated_at DESC, id ASC LIMIT ?1",
    )?;
    let recent_failures = stmt
        .query_map(params![failure_limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(PipelineHealth {
        counts: count_by_status(conn)?,
        stale_claims: stale_claims as u64,
        exhausted: exhausted as u64,
        oldest_pending: oldest_pending.as_deref().map(parse_timestamp).transpose()?,
        recent_failures,
    })
}

pub fn delete_day(conn: &Connection, username: &str, day: NaiveDate) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM transcript_chunks WHERE username = ?1 AND day = ?2",
        params![username, day.to_string()],
    )?)
}
