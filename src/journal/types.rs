//! Core journal type definitions.
//!
//! Defines [`Event`] (one semantic segment of a day), [`TranscriptChunk`] and its
//! closed [`ChunkStatus`] lifecycle, the engine's [`Decision`] with the payloads it
//! carries ([`EventFields`], [`MergePatch`]), and the derived [`DailyReflection`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound of the mood/stress/energy scale (lower bound is 0).
pub const SCORE_MAX: u8 = 10;

/// Processing lifecycle of a transcript chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Stored, waiting for a worker to claim it.
    Pending,
    /// Claimed by a worker; the claim expires after the claim timeout.
    Processing,
    /// Folded into an event. Terminal.
    Completed,
    /// Gave up; only an administrative reset moves it back to pending.
    Failed,
}

impl ChunkStatus {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// The legal edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: ChunkStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown chunk status: {s}")),
        }
    }
}

/// Closed-open span of wall time covered by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            start: instant,
            end: instant,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Mood, stress and energy on the `0..=10` scale. `None` means "not observed yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub mood_score: Option<u8>,
    pub stress_level: Option<u8>,
    pub energy_level: Option<u8>,
}

impl Scores {
    pub fn is_empty(&self) -> bool {
        self.mood_score.is_none() && self.stress_level.is_none() && self.energy_level.is_none()
    }

    /// Clamp every present value into the bounded scale.
    pub fn clamped(self) -> Self {
        let clamp = |v: Option<u8>| v.map(|x| x.min(SCORE_MAX));
        Self {
            mood_score: clamp(self.mood_score),
            stress_level: clamp(self.stress_level),
            energy_level: clamp(self.energy_level),
        }
    }
}

/// One semantic segment of a user's day, matching the `events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub username: String,
    /// User-local calendar date the event belongs to.
    pub day: NaiveDate,
    pub time_range: TimeRange,
    /// Normalized place label (see [`normalize_label`]).
    pub location: String,
    /// Normalized activity label.
    pub activity_type: String,
    /// Union of every participant seen; never shrinks.
    pub people_involved: BTreeSet<String>,
    #[serde(flatten)]
    pub scores: Scores,
    pub one_sentence_summary: String,
    pub event_title: String,
    /// Bumped on every merge; guards read-modify-write.
    pub version: i64,
    /// Wall-clock creation timestamp (RFC 3339).
    pub created_at: String,
    /// Wall-clock timestamp of the last write (RFC 3339).
    pub updated_at: String,
}

impl Event {
    /// The event's last observed moment; staleness is measured from here.
    pub fn last_update(&self) -> DateTime<Utc> {
        self.time_range.end
    }
}

/// Everything needed to create a new event for a `(username, day)` key.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFields {
    pub time_range: TimeRange,
    pub location: String,
    pub activity_type: String,
    pub people_involved: BTreeSet<String>,
    pub scores: Scores,
    pub one_sentence_summary: String,
    pub event_title: String,
}

/// Changes a CONTINUE decision folds into an existing event.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePatch {
    /// Candidate new end; the stored end only ever moves forward.
    pub end: DateTime<Utc>,
    /// Participants to union into `people_involved`.
    pub people_involved: BTreeSet<String>,
    /// Scores observed in this fragment, averaged into the stored ones.
    pub scores: Scores,
    pub one_sentence_summary: Option<String>,
    pub event_title: Option<String>,
}

/// Why the engine reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoActiveEvent,
    LocationChanged,
    ActivityChanged,
    Stale,
    SameContext,
    /// Extraction failed or was below the confidence threshold.
    LowConfidenceStale,
    LowConfidenceRecent,
}

/// The continuity verdict for one fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    New {
        fields: EventFields,
        reason: DecisionReason,
    },
    Continue {
        event_id: String,
        expected_version: i64,
        patch: MergePatch,
        reason: DecisionReason,
    },
}

impl Decision {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    pub fn reason(&self) -> DecisionReason {
        match self {
            Self::New { reason, .. } | Self::Continue { reason, .. } => *reason,
        }
    }
}

/// One incremental transcript submission, matching the `transcript_chunks` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptChunk {
    pub id: String,
    pub username: String,
    pub day: NaiveDate,
    pub raw_text: String,
    /// Local moment the fragment describes.
    pub observed_at: DateTime<Utc>,
    pub status: ChunkStatus,
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Number of claims taken on this chunk so far.
    pub retry_count: u32,
    /// Event the fragment was folded into, once completed.
    pub event_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Day-level aggregate, always derived from the full event set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReflection {
    pub username: String,
    pub day: NaiveDate,
    pub mood_score: Option<f64>,
    pub stress_level: Option<f64>,
    pub energy_level: Option<f64>,
    /// One line per event, in time order.
    pub highlights: Vec<String>,
    pub event_count: u32,
    pub total_minutes: i64,
    /// Latest moment covered by any event of the day.
    pub last_updated: Option<DateTime<Utc>>,
}

impl DailyReflection {
    pub fn highlight_text(&self) -> String {
        self.highlights.join("\n")
    }
}

/// Serializable projection of an [`Event`] returned by queries.
#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: String,
    pub event_title: String,
    pub one_sentence_summary: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: i64,
    pub location: String,
    pub activity_type: String,
    pub people_involved: Vec<String>,
    #[serde(flatten)]
    pub scores: Scores,
    pub version: i64,
}

impl From<&Event> for EventView {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            event_title: event.event_title.clone(),
            one_sentence_summary: event.one_sentence_summary.clone(),
            start: crate::db::timestamp(event.time_range.start),
            end: crate::db::timestamp(event.time_range.end),
            duration_minutes: event.time_range.duration().num_minutes(),
            location: event.location.clone(),
            activity_type: event.activity_type.clone(),
            people_involved: event.people_involved.iter().cloned().collect(),
            scores: event.scores,
            version: event.version,
        }
    }
}

/// Lowercase, trim, and collapse internal whitespace so labels compare stably.
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ChunkStatus::Pending,
            ChunkStatus::Processing,
            ChunkStatus::Completed,
            ChunkStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ChunkStatus>().unwrap(), status);
        }
        assert!("done".parse::<ChunkStatus>().is_err());
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        assert!(!ChunkStatus::Pending.can_transition_to(ChunkStatus::Completed));
        assert!(!ChunkStatus::Pending.can_transition_to(ChunkStatus::Failed));
        assert!(!ChunkStatus::Completed.can_transition_to(ChunkStatus::Pending));
        assert!(!ChunkStatus::Failed.can_transition_to(ChunkStatus::Processing));
        assert!(ChunkStatus::Failed.can_transition_to(ChunkStatus::Pending));
    }

    #[test]
    fn normalize_label_folds_case_and_spaces() {
        assert_eq!(normalize_label("  Coffee   Shop "), "coffee shop");
        assert_eq!(normalize_label("CoffeeShop"), "coffeeshop");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn scores_clamp_to_scale() {
        let s = Scores {
            mood_score: Some(14),
            stress_level: Some(3),
            energy_level: None,
        }
        .clamped();
        assert_eq!(s.mood_score, Some(10));
        assert_eq!(s.stress_level, Some(3));
        assert_eq!(s.energy_level, None);
    }
}
