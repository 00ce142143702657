//! Event segmentation: does a fragment continue the active event or start a new one?
//!
//! [`SegmentationEngine::decide`] asks the extractor for place/activity/people
//! and hands the result to [`classify`], a pure function of its inputs. Rules,
//! in precedence order:
//!
//! 1. no active event → NEW
//! 2. extraction failed or below the confidence threshold → NEW when the
//!    active event is stale, otherwise CONTINUE (participants still merged)
//! 3. location changed → NEW
//! 4. activity changed → NEW
//! 5. same context but stale → NEW
//! 6. otherwise CONTINUE
//!
//! A label the extraction does not mention is not evidence of change.
//! Participants never cause a split.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SegmentationConfig;
use crate::extract::{Extraction, ExtractionError, SemanticExtractor};
use crate::journal::types::{Decision, DecisionReason, Event, EventFields, MergePatch, TimeRange};

const UNKNOWN: &str = "unknown";
const SUMMARY_MAX_CHARS: usize = 160;

pub struct SegmentationEngine {
    extractor: Arc<dyn SemanticExtractor>,
    config: SegmentationConfig,
    /// Bound on one extractor call, retries included.
    budget: Duration,
}

impl SegmentationEngine {
    pub fn new(
        extractor: Arc<dyn SemanticExtractor>,
        config: SegmentationConfig,
        budget: Duration,
    ) -> Self {
        Self {
            extractor,
            config,
            budget,
        }
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.provider_name()
    }

    /// Decide how `text`, observed at `local_time`, relates to `active`.
    ///
    /// Never fails: an extractor error or timeout degrades to the time heuristic.
    pub async fn decide(
        &self,
        text: &str,
        active: Option<&Event>,
        local_time: DateTime<Utc>,
    ) -> Decision {
        let extraction = match tokio::time::timeout(self.budget, self.extractor.extract(text)).await {
            Ok(result) => result.map(Extraction::normalized),
            Err(_) => Err(ExtractionError::Timeout(self.budget)),
        };
        if let Err(e) = &extraction {
            warn!(error = %e, provider = self.extractor.provider_name(), "extraction degraded, using time heuristic");
        }

        let decision = classify(text, extraction.as_ref(), active, local_time, &self.config);
        debug!(
            reason = ?decision.reason(),
            new = decision.is_new(),
            "segmentation decision"
        );
        decision
    }
}

/// The pure decision rule. Identical inputs always yield identical output.
pub fn classify(
    text: &str,
    extraction: Result<&Extraction, &ExtractionError>,
    active: Option<&Event>,
    local_time: DateTime<Utc>,
    config: &SegmentationConfig,
) -> Decision {
    let extraction = extraction.ok();
    let participants: BTreeSet<String> = extraction
        .map(|x| x.participants.iter().cloned().collect())
        .unwrap_or_default();

    let Some(active) = active else {
        return Decision::New {
            fields: new_fields(text, extraction, None, local_time),
            reason: DecisionReason::NoActiveEvent,
        };
    };

    let stale = local_time - active.last_update() > config.staleness();
    let confident = extraction.filter(|x| x.confidence >= config.confidence_threshold);

    let reason = match confident {
        None if stale => Some(DecisionReason::LowConfidenceStale),
        None => None,
        Some(x) if changed(x.location.as_deref(), &active.location) => {
            Some(DecisionReason::LocationChanged)
        }
        Some(x) if changed(x.activity_type.as_deref(), &active.activity_type) => {
            Some(DecisionReason::ActivityChanged)
        }
        Some(_) if stale => Some(DecisionReason::Stale),
        Some(_) => None,
    };

    if let Some(reason) = reason {
        return Decision::New {
            fields: new_fields(text, extraction, Some(active), local_time),
            reason,
        };
    }

    let patch = match confident {
        Some(x) => MergePatch {
            end: local_time,
            people_involved: participants,
            scores: x.scores,
            one_sentence_summary: x.summary.clone(),
            event_title: x.title.clone(),
        },
        None => MergePatch {
            end: local_time,
            people_involved: participants,
            scores: Default::default(),
            one_sentence_summary: None,
            event_title: None,
        },
    };

    Decision::Continue {
        event_id: active.id.clone(),
        expected_version: active.version,
        patch,
        reason: if confident.is_some() {
            DecisionReason::SameContext
        } else {
            DecisionReason::LowConfidenceRecent
        },
    }
}

fn changed(observed: Option<&str>, current: &str) -> bool {
    observed.is_some_and(|label| label != current)
}

/// Fields for a NEW event. Labels the extraction omits carry over from the
/// previous event; the start is clamped so events never overlap.
fn new_fields(
    text: &str,
    extraction: Option<&Extraction>,
    previous: Option<&Event>,
    local_time: DateTime<Utc>,
) -> EventFields {
    let label = |observed: Option<&String>, carried: Option<&String>| {
        observed
            .or(carried)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    let location = label(
        extraction.and_then(|x| x.location.as_ref()),
        previous.map(|e| &e.location),
    );
    let activity_type = label(
        extraction.and_then(|x| x.activity_type.as_ref()),
        previous.map(|e| &e.activity_type),
    );

    let start = previous.map_or(local_time, |e| local_time.max(e.time_range.end));

    EventFields {
        time_range: TimeRange::at(start),
        event_title: extraction
            .and_then(|x| x.title.clone())
            .unwrap_or_else(|| title_for(&activity_type, &location)),
        one_sentence_summary: extraction
            .and_then(|x| x.summary.clone())
            .unwrap_or_else(|| summarize(text)),
        people_involved: extraction
            .map(|x| x.participants.iter().cloned().collect())
            .unwrap_or_default(),
        scores: extraction.map(|x| x.scores).unwrap_or_default(),
        location,
        activity_type,
    }
}

/// "work at coffeeshop", "walking", "at home" or "untitled moment".
pub fn title_for(activity: &str, location: &str) -> String {
    match (activity != UNKNOWN, location != UNKNOWN) {
        (true, true) => format!("{activity} at {location}"),
        (true, false) => activity.to_string(),
        (false, true) => format!("at {location}"),
        (false, false) => "untitled moment".to_string(),
    }
}

/// First sentence of the fragment, capped in length.
pub fn summarize(text: &str) -> String {
    let text = text.trim();
    let first = text
        .find(['.', '!', '?'])
        .map_or(text, |i| &text[..=i])
        .trim();
    if first.chars().count() <= SUMMARY_MAX_CHARS {
        return first.to_string();
    }
    let cut: String = first.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}
