//! Incremental analysis: one fragment in, a consistent day out.
//!
//! [`Orchestrator::ingest`] stages the fragment, registers it as a chunk and
//! drives it through claim → decide → apply → complete. The database mutex is
//! only ever held inside `spawn_blocking` closures, never across the
//! extractor call. Event writes and the chunk's completion share one
//! transaction, so a fragment is either fully folded in or not at all.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::DayweaveConfig;
use crate::db::write_activity_log;
use crate::error::{AnalysisError, Result};
use crate::extract::SemanticExtractor;
use crate::journal::segmentation::SegmentationEngine;
use crate::journal::stats::{journal_stats, StatsResponse};
use crate::journal::status::{self, Claim, NewChunk};
use crate::journal::types::{DailyReflection, Decision, Event, EventView, TranscriptChunk};
use crate::journal::{events, reflection, transcript};
use crate::staging::{staging_key, StagingCache};

/// One fragment submitted for analysis.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub username: String,
    pub day: NaiveDate,
    pub text: String,
    /// Local moment the fragment describes; a leading time marker in `text` wins.
    pub observed_at: Option<DateTime<Utc>>,
    /// Caller-chosen idempotency key. Derived from the content when absent.
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Processed,
    /// Already completed, failed or in flight elsewhere; nothing changed.
    Duplicate,
    /// The day was busy; the chunk stays pending for the background processor.
    Queued,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub new_events_count: u32,
    pub updated_events_count: u32,
    pub total_events_count: u32,
    pub message: String,
    pub chunk_id: String,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Fragments the submitted text was split into.
    pub fragments: u32,
}

impl IngestOutcome {
    /// Fold a later fragment's outcome into this one. Identifiers and the
    /// day total follow the latest fragment; the status is the most
    /// significant one seen.
    fn absorb(self, next: IngestOutcome) -> IngestOutcome {
        let status = match (self.status, next.status) {
            (IngestStatus::Processed, _) | (_, IngestStatus::Processed) => IngestStatus::Processed,
            (IngestStatus::Queued, _) | (_, IngestStatus::Queued) => IngestStatus::Queued,
            _ => IngestStatus::Duplicate,
        };
        let fragments = self.fragments + next.fragments;
        IngestOutcome {
            new_events_count: self.new_events_count + next.new_events_count,
            updated_events_count: self.updated_events_count + next.updated_events_count,
            total_events_count: next.total_events_count,
            message: format!(
                "{fragments} fragments: {} new, {} updated",
                self.new_events_count + next.new_events_count,
                self.updated_events_count + next.updated_events_count,
            ),
            chunk_id: next.chunk_id,
            status,
            event_id: next.event_id.or(self.event_id),
            fragments,
        }
    }
}

/// The day's events as returned by queries.
#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub username: String,
    pub day: NaiveDate,
    pub events: Vec<EventView>,
    pub total_count: u32,
    /// Latest write to any of the day's events.
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeSummary {
    pub events_deleted: usize,
    pub chunks_deleted: usize,
    pub reflection_deleted: bool,
}

struct Applied {
    event: Event,
    created: bool,
}

pub struct Orchestrator {
    db: Arc<Mutex<Connection>>,
    engine: SegmentationEngine,
    staging: Arc<dyn StagingCache>,
    config: Arc<DayweaveConfig>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        extractor: Arc<dyn SemanticExtractor>,
        staging: Arc<dyn StagingCache>,
        config: Arc<DayweaveConfig>,
    ) -> Self {
        let engine = SegmentationEngine::new(
            extractor,
            config.segmentation.clone(),
            config.extractor.call_budget(),
        );
        Self {
            db,
            engine,
            staging,
            config,
        }
    }

    pub fn config(&self) -> &DayweaveConfig {
        &self.config
    }

    pub fn extractor_name(&self) -> &str {
        self.engine.extractor_name()
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(Arc::clone(&self.db), f).await
    }

    /// Stage, register and process a submitted transcript.
    ///
    /// Text carrying several time markers is split at each marker and the
    /// fragments are processed in time order; the outcome sums their counts.
    /// An error stops the batch. Fragments already folded in stay committed
    /// and come back as duplicates when the text is resubmitted.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(AnalysisError::InvalidInput("username must not be empty".into()));
        }
        let mut fragments = transcript::fragments(&request.text, request.day);
        if fragments.is_empty() {
            return Err(AnalysisError::InvalidInput("transcript text must not be empty".into()));
        }
        fragments.sort_by_key(|f| f.observed_at.or(request.observed_at));

        let batch = fragments.len() > 1;
        let mut outcome: Option<IngestOutcome> = None;
        for (n, fragment) in fragments.into_iter().enumerate() {
            let chunk_id = request
                .chunk_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| if batch { format!("{id}-{}", n + 1) } else { id.to_string() });
            let next = self
                .ingest_fragment(&username, request.day, fragment, request.observed_at, chunk_id)
                .await?;
            outcome = Some(match outcome {
                Some(so_far) => so_far.absorb(next),
                None => next,
            });
        }
        outcome.ok_or_else(|| AnalysisError::InvalidInput("transcript text must not be empty".into()))
    }

    async fn ingest_fragment(
        &self,
        username: &str,
        day: NaiveDate,
        fragment: transcript::Fragment,
        fallback_time: Option<DateTime<Utc>>,
        chunk_id: Option<String>,
    ) -> Result<IngestOutcome> {
        let explicit_time = fragment.observed_at.or(fallback_time);
        let chunk_id =
            chunk_id.unwrap_or_else(|| chunk_identity(username, day, &fragment.text, explicit_time));

        self.staging.put(
            &staging_key(username, day, &chunk_id),
            &fragment.text,
            Some(self.config.staging.default_ttl_secs),
        );

        let new_chunk = NewChunk {
            id: chunk_id.clone(),
            username: username.to_string(),
            day,
            raw_text: fragment.text,
            observed_at: explicit_time.unwrap_or_else(Utc::now),
        };
        let inserted = self
            .with_db(move |conn| status::register(conn, &new_chunk))
            .await?;
        if !inserted {
            debug!(chunk_id = %chunk_id, "fragment already registered");
        }

        self.process_chunk(&chunk_id, true).await
    }

    /// Drive an already-registered chunk to a terminal state.
    ///
    /// With `wait`, a busy day is polled for up to `tracker.claim_wait_ms`
    /// before the chunk is left queued.
    pub async fn process_chunk(&self, chunk_id: &str, wait: bool) -> Result<IngestOutcome> {
        let claim = match self.claim_with_wait(chunk_id, wait).await {
            Ok(claim) => claim,
            Err(AnalysisError::AlreadyClaimed(_)) => {
                info!(chunk_id, "duplicate fragment ignored");
                return self
                    .skipped(chunk_id, IngestStatus::Duplicate, "duplicate fragment, nothing changed")
                    .await;
            }
            Err(AnalysisError::DayBusy { .. }) => {
                info!(chunk_id, "day busy, fragment queued");
                return self
                    .skipped(
                        chunk_id,
                        IngestStatus::Queued,
                        "another fragment of this day is in progress, queued for processing",
                    )
                    .await;
            }
            Err(e) => return Err(e),
        };

        let Claim { token, chunk } = claim;
        let key = staging_key(&chunk.username, chunk.day, &chunk.id);
        let text = self
            .staging
            .get(&key)
            .unwrap_or_else(|| chunk.raw_text.clone());

        let applied = match self.decide_and_apply(&chunk, &token, &text).await {
            Ok(applied) => applied,
            Err(e) => {
                self.abandon(&chunk, &token, &e).await;
                return Err(e);
            }
        };

        self.staging.delete(&key);
        self.refresh_reflection(&chunk.username, chunk.day).await;

        let (username, day) = (chunk.username.clone(), chunk.day);
        let total = self
            .with_db(move |conn| events::count_for_day(conn, &username, day))
            .await?;

        let message = if applied.created {
            format!("started new event: {}", applied.event.event_title)
        } else {
            format!("extended event: {}", applied.event.event_title)
        };
        info!(
            chunk_id = %chunk.id,
            event_id = %applied.event.id,
            created = applied.created,
            total,
            "fragment processed"
        );

        Ok(IngestOutcome {
            new_events_count: u32::from(applied.created),
            updated_events_count: u32::from(!applied.created),
            total_events_count: total,
            message,
            chunk_id: chunk.id,
            status: IngestStatus::Processed,
            event_id: Some(applied.event.id),
            fragments: 1,
        })
    }

    async fn claim_with_wait(&self, chunk_id: &str, wait: bool) -> Result<Claim> {
        let tracker = &self.config.tracker;
        let deadline = Instant::now() + Duration::from_millis(tracker.claim_wait_ms);
        let poll = Duration::from_millis(tracker.claim_poll_ms.max(1));

        loop {
            let id = chunk_id.to_string();
            let tracker = tracker.clone();
            match self
                .with_db(move |conn| status::claim(conn, &id, Utc::now(), &tracker))
                .await
            {
                Err(AnalysisError::DayBusy { .. }) if wait && Instant::now() < deadline => {
                    tokio::time::sleep(poll).await;
                }
                other => return other,
            }
        }
    }

    /// decide + apply, retried on version conflicts.
    async fn decide_and_apply(
        &self,
        chunk: &TranscriptChunk,
        token: &str,
        text: &str,
    ) -> Result<Applied> {
        let max_attempts = self.config.repository.max_conflict_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (username, day, observed_at) = (chunk.username.clone(), chunk.day, chunk.observed_at);
            let active = self
                .with_db(move |conn| events::find_active_at(conn, &username, day, observed_at))
                .await?;

            let decision = self
                .engine
                .decide(text, active.as_ref(), chunk.observed_at)
                .await;
            let basis = active.map(|e| (e.id, e.version));

            let (chunk_owned, token_owned) = (chunk.clone(), token.to_string());
            let result = self
                .with_db(move |conn| {
                    apply_and_complete(conn, &chunk_owned, &token_owned, basis, &decision)
                })
                .await;

            match result {
                Err(AnalysisError::VersionConflict {
                    event_id,
                    expected,
                    found,
                }) => {
                    if attempt >= max_attempts {
                        warn!(chunk_id = %chunk.id, attempts = attempt, "giving up after repeated conflicts");
                        return Err(AnalysisError::TransientConflict { attempts: attempt });
                    }
                    debug!(chunk_id = %chunk.id, %event_id, expected, found, attempt, "version conflict, retrying");
                }
                other => return other,
            }
        }
    }

    /// Fail the chunk after an unrecoverable error. Events are untouched
    /// because the failed transaction was rolled back.
    async fn abandon(&self, chunk: &TranscriptChunk, token: &str, cause: &AnalysisError) {
        if matches!(cause, AnalysisError::ClaimLost(_)) {
            return;
        }
        let (id, token, reason) = (chunk.id.clone(), token.to_string(), cause.to_string());
        let result = self
            .with_db(move |conn| status::fail(conn, &id, &token, &reason, Utc::now()))
            .await;
        if let Err(e) = result {
            error!(chunk_id = %chunk.id, error = %e, "could not mark chunk failed");
        }
    }

    async fn skipped(
        &self,
        chunk_id: &str,
        outcome: IngestStatus,
        message: &str,
    ) -> Result<IngestOutcome> {
        let id = chunk_id.to_string();
        let (total, event_id) = self
            .with_db(move |conn| {
                let chunk = status::get(conn, &id)?
                    .ok_or_else(|| AnalysisError::NotFound(format!("chunk {id}")))?;
                let total = events::count_for_day(conn, &chunk.username, chunk.day)?;
                Ok((total, chunk.event_id))
            })
            .await?;

        Ok(IngestOutcome {
            new_events_count: 0,
            updated_events_count: 0,
            total_events_count: total,
            message: message.to_string(),
            chunk_id: chunk_id.to_string(),
            status: outcome,
            event_id,
            fragments: 1,
        })
    }

    /// Recompute the day's reflection. Failures are logged, not returned: the
    /// fragment is already committed and the reflection can be rebuilt later.
    async fn refresh_reflection(&self, username: &str, day: NaiveDate) {
        let name = username.to_string();
        if self.config.reflection.deferred {
            let db = Arc::clone(&self.db);
            tokio::spawn(async move {
                let who = name.clone();
                let result =
                    run_blocking(db, move |conn| reflection::recompute(conn, &who, day)).await;
                if let Err(e) = result {
                    warn!(username = %name, %day, error = %e, "deferred reflection recompute failed");
                }
            });
        } else if let Err(e) = self
            .with_db(move |conn| reflection::recompute(conn, &name, day))
            .await
        {
            warn!(%username, %day, error = %e, "reflection recompute failed");
        }
    }

    /// The day's events in time order.
    pub async fn query_day(&self, username: &str, day: NaiveDate) -> Result<DayView> {
        let name = username.to_string();
        let events = self
            .with_db(move |conn| events::list_for_day(conn, &name, day))
            .await?;

        Ok(DayView {
            username: username.to_string(),
            day,
            total_count: events.len() as u32,
            last_updated: events.iter().map(|e| e.updated_at.clone()).max(),
            events: events.iter().map(EventView::from).collect(),
        })
    }

    /// The stored reflection, computed on the spot when missing.
    pub async fn daily_reflection(&self, username: &str, day: NaiveDate) -> Result<DailyReflection> {
        let name = username.to_string();
        self.with_db(move |conn| match reflection::get(conn, &name, day)? {
            Some(existing) => Ok(existing),
            None => reflection::recompute(conn, &name, day),
        })
        .await
    }

    /// Store statistics, optionally restricted to one user.
    pub async fn stats(&self, username: Option<String>) -> Result<StatsResponse> {
        let db_path = self.config.resolved_db_path();
        self.with_db(move |conn| {
            journal_stats(conn, username.as_deref(), Some(&db_path))
                .map_err(|e| AnalysisError::ServiceUnavailable(format!("{e:#}")))
        })
        .await
    }

    /// Chunks the background processor may pick up now.
    pub async fn claimable(&self, limit: usize) -> Result<Vec<TranscriptChunk>> {
        let tracker = self.config.tracker.clone();
        self.with_db(move |conn| status::list_claimable(conn, Utc::now(), &tracker, limit))
            .await
    }

    /// Administrative failed → pending.
    pub async fn reset_chunk(&self, chunk_id: &str) -> Result<TranscriptChunk> {
        let id = chunk_id.to_string();
        let chunk = self
            .with_db(move |conn| status::reset(conn, &id, Utc::now()))
            .await?;
        info!(chunk_id, "chunk reset to pending");
        Ok(chunk)
    }

    /// Administrative purge of a day's events, chunks and reflection.
    pub async fn reset_day(&self, username: &str, day: NaiveDate) -> Result<PurgeSummary> {
        let name = username.to_string();
        let tracker = self.config.tracker.clone();
        let summary = self
            .with_db(move |conn| purge_day(conn, &name, day, Utc::now(), &tracker))
            .await?;
        info!(%username, %day, events = summary.events_deleted, chunks = summary.chunks_deleted, "day purged");
        Ok(summary)
    }
}

async fn run_blocking<T, F>(db: Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|e| AnalysisError::ServiceUnavailable(format!("db lock poisoned: {e}")))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| AnalysisError::ServiceUnavailable(format!("db task failed: {e}")))?
}

/// Apply a decision and complete the chunk in one transaction.
///
/// `basis` is the event in effect at the fragment's time (id, version) the
/// decision was computed against. If that event has moved on since, the decision is
/// stale and a [`AnalysisError::VersionConflict`] sends the caller back to
/// decide again.
fn apply_and_complete(
    conn: &mut Connection,
    chunk: &TranscriptChunk,
    token: &str,
    basis: Option<(String, i64)>,
    decision: &Decision,
) -> Result<Applied> {
    let tx = conn.transaction()?;

    let current = events::find_active_at(&tx, &chunk.username, chunk.day, chunk.observed_at)?
        .map(|e| (e.id, e.version));
    if current != basis {
        let event_id = current
            .as_ref()
            .or(basis.as_ref())
            .map(|(id, _)| id.clone())
            .unwrap_or_default();
        return Err(AnalysisError::VersionConflict {
            event_id,
            expected: basis.map_or(-1, |(_, v)| v),
            found: current.map_or(-1, |(_, v)| v),
        });
    }

    let (event, created) = match decision {
        Decision::New { fields, .. } => (events::insert(&tx, &chunk.username, chunk.day, fields)?, true),
        Decision::Continue {
            event_id,
            expected_version,
            patch,
            ..
        } => (events::merge(&tx, event_id, *expected_version, patch)?, false),
    };

    status::complete(&tx, &chunk.id, token, &event.id, Utc::now())?;
    tx.commit()?;

    Ok(Applied { event, created })
}

/// Delete a day's events, chunks and reflection, refusing while any chunk of
/// the day holds a fresh claim.
pub fn purge_day(
    conn: &mut Connection,
    username: &str,
    day: NaiveDate,
    now: DateTime<Utc>,
    tracker: &crate::config::TrackerConfig,
) -> Result<PurgeSummary> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    if status::day_has_fresh_claim(&tx, username, day, None, now, tracker)? {
        return Err(AnalysisError::DayBusy {
            username: username.to_string(),
            day: day.to_string(),
        });
    }

    let summary = PurgeSummary {
        events_deleted: events::delete_day(&tx, username, day)?,
        chunks_deleted: status::delete_day(&tx, username, day)?,
        reflection_deleted: reflection::delete_day(&tx, username, day)? > 0,
    };
    write_activity_log(
        &tx,
        "purge",
        &format!("{username}/{day}"),
        Some(&serde_json::json!({
            "events": summary.events_deleted,
            "chunks": summary.chunks_deleted,
        })),
    )?;
    tx.commit()?;
    Ok(summary)
}

/// Deterministic chunk id so that re-submitting a fragment hits the same chunk.
pub fn chunk_identity(
    username: &str,
    day: NaiveDate,
    text: &str,
    observed_at: Option<DateTime<Utc>>,
) -> String {
    let mut name = format!("{username}\n{day}\n{text}");
    if let Some(at) = observed_at {
        name.push('\n');
        name.push_str(&crate::db::timestamp(at));
    }
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn chunk_identity_is_stable_and_distinguishing() {
        let a = chunk_identity("ana", day(), "at home", None);
        assert_eq!(a, chunk_identity("ana", day(), "at home", None));
        assert_ne!(a, chunk_identity("bo", day(), "at home", None));
        assert_ne!(a, chunk_identity("ana", day(), "at work", None));

        let at = Utc::now();
        assert_ne!(a, chunk_identity("ana", day(), "at home", Some(at)));
    }

    #[test]
    fn purge_refuses_while_claim_is_fresh() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let tracker = crate::config::TrackerConfig::default();
        let now = Utc::now();
        status::register(
            &conn,
            &NewChunk {
                id: "c1".into(),
                username: "ana".into(),
                day: day(),
                raw_text: "at home".into(),
                observed_at: now,
            },
        )
        .unwrap();
        status::claim(&mut conn, "c1", now, &tracker).unwrap();

        let err = purge_day(&mut conn, "ana", day(), now, &tracker).unwrap_err();
        assert!(matches!(err, AnalysisError::DayBusy { .. }));

        let later = now + tracker.claim_timeout() + chrono::Duration::seconds(1);
        let summary = purge_day(&mut conn, "ana", day(), later, &tracker).unwrap();
        assert_eq!(summary.chunks_deleted, 1);
        assert!(status::get(&conn, "c1").unwrap().is_none());
    }
}
