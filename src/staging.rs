//! Short-lived staging of raw fragments between upload and analysis.
//!
//! [`StagingCache`] is a plain key/value store with per-entry expiry. A TTL of
//! `None` or `0` means the configured default (60 s unless overridden).
//! [`MemoryStagingCache`] is backed by a bounded `moka` cache, so expired and
//! abandoned fragments are evicted instead of accumulating.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use moka::sync::Cache;
use moka::Expiry;

use crate::config::StagingConfig;

pub trait StagingCache: Send + Sync {
    fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>);
    fn get(&self, key: &str) -> Option<String>;
    fn exists(&self, key: &str) -> bool;
    fn delete(&self, key: &str) -> bool;
}

/// Key a staged fragment is stored under.
pub fn staging_key(username: &str, day: NaiveDate, chunk_id: &str) -> String {
    format!("transcript:{username}:{day}:{chunk_id}")
}

#[derive(Clone)]
struct Staged {
    text: String,
    ttl: Duration,
}

/// Each entry lives for the TTL it was written with; a re-put restarts it.
struct StagedExpiry;

impl Expiry<String, Staged> for StagedExpiry {
    fn expire_after_create(&self, _key: &String, value: &Staged, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Staged,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct MemoryStagingCache {
    entries: Cache<String, Staged>,
    default_ttl: Duration,
}

impl MemoryStagingCache {
    pub fn new(default_ttl_secs: u64, max_entries: u64) -> Self {
        let default_ttl_secs = if default_ttl_secs == 0 { 60 } else { default_ttl_secs };
        let entries = Cache::builder()
            .max_capacity(max_entries.max(1))
            .expire_after(StagedExpiry)
            .eviction_listener(|key: std::sync::Arc<String>, _value, cause| {
                tracing::debug!(key = %key, ?cause, "staged fragment evicted");
            })
            .build();
        Self {
            entries,
            default_ttl: Duration::from_secs(default_ttl_secs),
        }
    }

    pub fn from_config(config: &StagingConfig) -> Self {
        Self::new(config.default_ttl_secs, config.max_entries)
    }

    fn ttl(&self, ttl_secs: Option<u64>) -> Duration {
        match ttl_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.default_ttl,
        }
    }

    /// Number of live entries. Flushes pending evictions first.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StagingCache for MemoryStagingCache {
    fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        let staged = Staged {
            text: value.to_string(),
            ttl: self.ttl(ttl_secs),
        };
        self.entries.insert(key.to_string(), staged);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|staged| staged.text)
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}
