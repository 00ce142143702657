//! Semantic extraction of place, activity and participants from fragment text.
//!
//! Provides the [`SemanticExtractor`] capability, a lexicon-based
//! implementation ([`rules::RuleExtractor`]) and a model-backed one calling a
//! remote endpoint ([`http::HttpExtractor`]). The provider is created via
//! [`create_extractor`] from configuration.

pub mod http;
pub mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::journal::types::{normalize_label, Scores};

/// Why an extraction produced nothing usable. Never fatal to a fragment.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("extractor transport failed: {0}")]
    Transport(String),

    #[error("extractor returned malformed output: {0}")]
    Malformed(String),

    #[error("nothing to extract from empty text")]
    Empty,
}

impl ExtractionError {
    /// Worth another attempt with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// Best-effort reading of a fragment.
///
/// `location`/`activity_type` are `None` when the text gives no evidence. The
/// optional enrichment fields ride along when the provider can produce them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
    #[serde(default, flatten)]
    pub scores: Scores,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Extraction {
    /// Normalize labels, drop blanks, dedupe participants and clamp numbers.
    pub fn normalized(self) -> Self {
        let label = |v: Option<String>| {
            v.map(|s| normalize_label(&s))
                .filter(|s| !s.is_empty())
        };
        let mut participants: Vec<String> = self
            .participants
            .iter()
            .map(|p| normalize_label(p))
            .filter(|p| !p.is_empty())
            .collect();
        participants.sort();
        participants.dedup();

        Self {
            location: label(self.location),
            activity_type: label(self.activity_type),
            participants,
            confidence: if self.confidence.is_finite() {
                self.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            scores: self.scores.clamped(),
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            title: self.title.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Single-method capability: any rule-based or model-backed reader can satisfy it.
#[async_trait]
pub trait SemanticExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractionError>;

    /// Identifier recorded in `schema_meta` and logs.
    fn provider_name(&self) -> &str;
}

/// Create an extractor from config.
///
/// `"rules"` needs nothing external; `"http"` requires `extractor.endpoint`.
pub fn create_extractor(
    config: &crate::config::ExtractorConfig,
) -> anyhow::Result<Arc<dyn SemanticExtractor>> {
    match config.provider.as_str() {
        "rules" => Ok(Arc::new(rules::RuleExtractor::new()?)),
        "http" => {
            anyhow::ensure!(
                !config.endpoint.is_empty(),
                "extractor.endpoint must be set for the http provider"
            );
            Ok(Arc::new(http::HttpExtractor::new(config)?))
        }
        other => anyhow::bail!("unknown extractor provider: {other}. Supported: rules, http"),
    }
}
