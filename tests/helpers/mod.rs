#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dayweave::config::DayweaveConfig;
use dayweave::db;
use dayweave::extract::{Extraction, ExtractionError, SemanticExtractor};
use dayweave::journal::types::Scores;
use dayweave::journal::Orchestrator;
use dayweave::staging::MemoryStagingCache;
use rusqlite::Connection;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

/// A moment on [`day`].
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
}

/// Config suited to tests: inline reflection, no background loop, short waits.
pub fn test_config() -> DayweaveConfig {
    let mut config = DayweaveConfig::default();
    config.reflection.deferred = false;
    config.processor.enabled = false;
    config.tracker.claim_wait_ms = 200;
    config.tracker.claim_poll_ms = 10;
    config.extractor.timeout_ms = 500;
    config.extractor.max_retries = 0;
    config
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub db: Arc<Mutex<Connection>>,
    pub staging: Arc<MemoryStagingCache>,
}

pub fn harness(extractor: Arc<dyn SemanticExtractor>) -> Harness {
    harness_with(extractor, test_config())
}

pub fn harness_with(extractor: Arc<dyn SemanticExtractor>, config: DayweaveConfig) -> Harness {
    let db = Arc::new(Mutex::new(test_db()));
    let staging = Arc::new(MemoryStagingCache::from_config(&config.staging));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        extractor,
        staging.clone(),
        Arc::new(config),
    ));
    Harness {
        orchestrator,
        db,
        staging,
    }
}

/// A confident extraction with the given labels.
pub fn reading(location: Option<&str>, activity: Option<&str>, people: &[&str]) -> Extraction {
    Extraction {
        location: location.map(String::from),
        activity_type: activity.map(String::from),
        participants: people.iter().map(|p| p.to_string()).collect(),
        confidence: 0.9,
        scores: Scores::default(),
        summary: None,
        title: None,
    }
}

/// Answers by keyword: the first rule whose key occurs in the text wins.
/// Text matching no rule is reported as empty.
pub struct ScriptedExtractor {
    rules: Vec<(String, Result<Extraction, String>)>,
    pub calls: AtomicU32,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn on(mut self, keyword: &str, extraction: Extraction) -> Self {
        self.rules.push((keyword.to_string(), Ok(extraction)));
        self
    }

    /// Fail with a transport error whenever `keyword` appears.
    pub fn failing_on(mut self, keyword: &str) -> Self {
        self.rules
            .push((keyword.to_string(), Err("connection refused".to_string())));
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticExtractor for ScriptedExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (keyword, answer) in &self.rules {
            if text.contains(keyword.as_str()) {
                return answer
                    .clone()
                    .map_err(ExtractionError::Transport);
            }
        }
        Err(ExtractionError::Empty)
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

/// Simulates a concurrent writer: while armed, every extraction bumps the
/// version of each event of `day` behind the orchestrator's back, so the
/// following version-checked write conflicts.
pub struct InterferingExtractor {
    inner: ScriptedExtractor,
    db: Mutex<Option<Arc<Mutex<Connection>>>>,
    remaining: AtomicU32,
}

impl InterferingExtractor {
    pub fn new(inner: ScriptedExtractor) -> Self {
        Self {
            inner,
            db: Mutex::new(None),
            remaining: AtomicU32::new(0),
        }
    }

    pub fn attach(&self, db: Arc<Mutex<Connection>>) {
        *self.db.lock().unwrap() = Some(db);
    }

    /// Interfere with the next `n` extractions.
    pub fn arm(&self, n: u32) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.inner.call_count()
    }
}

#[async_trait]
impl SemanticExtractor for InterferingExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractionError> {
        let armed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            let db = self.db.lock().unwrap().clone();
            if let Some(db) = db {
                db.lock()
                    .unwrap()
                    .execute(
                        "UPDATE events SET version = version + 1 WHERE day = ?1",
                        [day().to_string()],
                    )
                    .unwrap();
            }
        }
        self.inner.extract(text).await
    }

    fn provider_name(&self) -> &str {
        "interfering"
    }
}

/// Row count of a table.
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
