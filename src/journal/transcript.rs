//! Time markers and transcript splitting.
//!
//! A fragment may begin with a bracketed time marker: `[2026-03-01T09:15:00]`,
//! `[09:15]`, or a range `[09:00|09:20]` (the end of a range is the moment the
//! fragment describes). Timestamps without an offset are taken as-is on the
//! user's local clock. Brackets that do not parse as a time are ordinary text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// One fragment with the marker (if any) resolved and stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub observed_at: Option<DateTime<Utc>>,
}

fn marker_regex() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"\[([^\[\]]{1,64})\]").ok())
        .as_ref()
}

/// Resolve one side of a marker to an instant on `day`.
fn parse_instant(raw: &str, day: NaiveDate) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, format) {
            return Some(day.and_time(time).and_utc());
        }
    }
    None
}

/// Parse marker content (`START|END` or a single instant).
pub fn parse_marker(content: &str, day: NaiveDate) -> Option<DateTime<Utc>> {
    match content.split_once('|') {
        Some((start, end)) => {
            let start = parse_instant(start, day)?;
            let end = parse_instant(end, day)?;
            Some(start.max(end))
        }
        None => parse_instant(content, day),
    }
}

/// Parse a `YYYY-MM-DD` day as given by callers.
pub fn parse_day(raw: &str) -> crate::error::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        crate::error::AnalysisError::InvalidInput(format!("day must be YYYY-MM-DD, got {raw:?}: {e}"))
    })
}

/// Parse a caller-supplied time for `day`: RFC 3339, a naive timestamp, or `HH:MM`.
pub fn parse_time(raw: &str, day: NaiveDate) -> crate::error::Result<DateTime<Utc>> {
    parse_instant(raw, day)
        .ok_or_else(|| crate::error::AnalysisError::InvalidInput(format!("unrecognized time {raw:?}")))
}

/// Strip a leading time marker from one fragment.
pub fn parse_fragment(raw: &str, day: NaiveDate) -> Fragment {
    let trimmed = raw.trim();
    if let Some(caps) = marker_regex().and_then(|re| re.captures(trimmed)) {
        if let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) {
            if whole.start() == 0 {
                if let Some(at) = parse_marker(inner.as_str(), day) {
                    return Fragment {
                        text: trimmed[whole.end()..].trim().to_string(),
                        observed_at: Some(at),
                    };
                }
            }
        }
    }
    Fragment {
        text: trimmed.to_string(),
        observed_at: None,
    }
}

/// Split a whole transcript into fragments.
///
/// With time markers present, each marker starts a new fragment and any text
/// before the first marker is its own unmarked fragment. Without markers every
/// non-blank line is a fragment.
pub fn split_transcript(transcript: &str, day: NaiveDate) -> Vec<Fragment> {
    let starts = marker_starts(transcript, day);
    if starts.is_empty() {
        return transcript
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Fragment {
                text: line.to_string(),
                observed_at: None,
            })
            .collect();
    }

    let mut bounds = Vec::with_capacity(starts.len() + 1);
    if starts[0] > 0 {
        bounds.push(0);
    }
    bounds.extend(starts.iter().copied());

    bounds
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = bounds.get(i + 1).copied().unwrap_or(transcript.len());
            parse_fragment(&transcript[start..end], day)
        })
        .filter(|f| !f.text.is_empty())
        .collect()
}

/// Fragments of one submitted text. Marked text is split at every marker;
/// unmarked text, however many lines, stays a single fragment.
pub fn fragments(text: &str, day: NaiveDate) -> Vec<Fragment> {
    if marker_starts(text, day).is_empty() {
        let fragment = parse_fragment(text, day);
        return if fragment.text.is_empty() { Vec::new() } else { vec![fragment] };
    }
    split_transcript(text, day)
}

/// Byte offsets of every marker that parses as a time.
fn marker_starts(transcript: &str, day: NaiveDate) -> Vec<usize> {
    marker_regex()
        .map(|re| {
            re.captures_iter(transcript)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    parse_marker(caps.get(1)?.as_str(), day).map(|_| whole.start())
                })
                .collect()
        })
        .unwrap_or_default()
}
