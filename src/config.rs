use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DayweaveConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub staging: StagingConfig,
    pub extractor: ExtractorConfig,
    pub segmentation: SegmentationConfig,
    pub tracker: TrackerConfig,
    pub repository: RepositoryConfig,
    pub reflection: ReflectionConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Username used when a caller does not name one.
    pub default_username: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StagingConfig {
    pub default_ttl_secs: u64,
    /// Upper bound on staged fragments held at once.
    pub max_entries: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractorConfig {
    /// `"rules"` (built-in lexicon) or `"http"` (remote model endpoint).
    pub provider: String,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SegmentationConfig {
    pub confidence_threshold: f64,
    pub staleness_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub claim_timeout_secs: i64,
    pub max_attempts: u32,
    /// How long an ingest waits for another fragment of the same day to finish.
    pub claim_wait_ms: u64,
    pub claim_poll_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RepositoryConfig {
    pub max_conflict_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Recompute the daily reflection on a background task instead of inline.
    pub deferred: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: usize,
}

impl Default for DayweaveConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            staging: StagingConfig::default(),
            extractor: ExtractorConfig::default(),
            segmentation: SegmentationConfig::default(),
            tracker: TrackerConfig::default(),
            repository: RepositoryConfig::default(),
            reflection: ReflectionConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 8765,
            log_level: "info".into(),
            default_username: "me".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_dayweave_dir()
            .join("dayweave.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60,
            max_entries: 10_000,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            provider: "rules".into(),
            endpoint: String::new(),
            timeout_ms: 5000,
            max_retries: 2,
            backoff_ms: 250,
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            staleness_minutes: 30,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            claim_timeout_secs: 300,
            max_attempts: 5,
            claim_wait_ms: 5000,
            claim_poll_ms: 50,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self { deferred: true }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 120,
            batch_size: 100,
        }
    }
}

impl SegmentationConfig {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_minutes)
    }
}

impl TrackerConfig {
    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_secs)
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound for one extraction including every retry and backoff sleep.
    pub fn call_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff: u64 = (0..self.max_retries)
            .map(|i| self.backoff_ms.saturating_mul(1u64 << i.min(16)))
            .sum();
        Duration::from_millis(
            self.timeout_ms
                .saturating_mul(attempts as u64)
                .saturating_add(backoff),
        )
    }
}

/// Returns `~/.dayweave/`
pub fn default_dayweave_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dayweave")
}

/// Returns the default config file path: `~/.dayweave/config.toml`
pub fn default_config_path() -> PathBuf {
    default_dayweave_dir().join("config.toml")
}

impl DayweaveConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            DayweaveConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (DAYWEAVE_DB, DAYWEAVE_USER, DAYWEAVE_LOG_LEVEL, DAYWEAVE_EXTRACTOR_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DAYWEAVE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("DAYWEAVE_USER") {
            self.server.default_username = val;
        }
        if let Ok(val) = std::env::var("DAYWEAVE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("DAYWEAVE_EXTRACTOR_URL") {
            self.extractor.provider = "http".into();
            self.extractor.endpoint = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
