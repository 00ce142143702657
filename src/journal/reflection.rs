//! Daily reflection: a day-level aggregate derived from the full event set.
//!
//! [`aggregate`] is pure and sorts its input first, so the result does not
//! depend on the order events were produced in. [`recompute`] rewrites the
//! stored row wholesale; reflections are never patched.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{parse_timestamp, timestamp, write_activity_log};
use crate::error::{AnalysisError, Result};
use crate::journal::events;
use crate::journal::types::{DailyReflection, Event};

/// Build the reflection for one day from its events.
///
/// Each metric is the duration-weighted mean over the events that carry it
/// (an instantaneous event weighs one second). `last_updated` is the latest
/// moment covered by any event, not the wall clock, so recomputing twice
/// yields the same value.
pub fn aggregate(username: &str, day: NaiveDate, events: &[Event]) -> DailyReflection {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.time_range
            .start
            .cmp(&b.time_range.start)
            .then_with(|| a.id.cmp(&b.id))
    });

    let weight = |e: &Event| e.time_range.duration().num_seconds().max(1) as f64;
    let mean = |metric: fn(&Event) -> Option<u8>| -> Option<f64> {
        let (sum, total) = ordered
            .iter()
            .filter_map(|&e| metric(e).map(|v| (v as f64 * weight(e), weight(e))))
            .fold((0.0, 0.0), |(s, w), (sv, wv)| (s + sv, w + wv));
        (total > 0.0).then(|| (sum / total * 100.0).round() / 100.0)
    };

    DailyReflection {
        username: username.to_string(),
        day,
        mood_score: mean(|e| e.scores.mood_score),
        stress_level: mean(|e| e.scores.stress_level),
        energy_level: mean(|e| e.scores.energy_level),
        highlights: ordered
            .iter()
            .map(|e| format!("{} {}", e.time_range.start.format("%H:%M"), e.event_title))
            .collect(),
        event_count: ordered.len() as u32,
        total_minutes: ordered
            .iter()
            .map(|e| e.time_range.duration().num_minutes())
            .sum(),
        last_updated: ordered.iter().map(|e| e.time_range.end).max(),
    }
}

/// Recompute and store the reflection for `(username, day)`.
pub fn recompute(conn: &Connection, username: &str, day: NaiveDate) -> Result<DailyReflection> {
    let events = events::list_for_day(conn, username, day)?;
    let reflection = aggregate(username, day, &events);

    conn.execute(
        "INSERT OR REPLACE INTO daily_reflections (username, day, mood_score, stress_level, \
         energy_level, highlights, event_count, total_minutes, last_updated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            username,
            day.to_string(),
            reflection.mood_score,
            reflection.stress_level,
            reflection.energy_level,
            serde_json::to_string(&reflection.highlights)?,
            reflection.event_count,
            reflection.total_minutes,
            reflection.last_updated.map(timestamp),
        ],
    )?;
    write_activity_log(
        conn,
        "recompute",
        &format!("{username}/{day}"),
        Some(&serde_json::json!({
            "event_count": reflection.event_count,
            "at": timestamp(Utc::now()),
        })),
    )?;

    tracing::debug!(%username, %day, events = reflection.event_count, "reflection recomputed");
    Ok(reflection)
}

/// Read the stored reflection, if one has been computed.
pub fn get(conn: &Connection, username: &str, day: NaiveDate) -> Result<Option<DailyReflection>> {
    type Raw = (Option<f64>, Option<f64>, Option<f64>, String, u32, i64, Option<String>);
    let raw: Option<Raw> = conn
        .query_row(
            "SELECT mood_score, stress_level, energy_level, highlights, event_count, total_minutes, \
             last_updated FROM daily_reflections WHERE username = ?1 AND day = ?2",
            params![username, day.to_string()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;

    let Some((mood, stress, energy, highlights, event_count, total_minutes, last_updated)) = raw
    else {
        return Ok(None);
    };

    Ok(Some(DailyReflection {
        username: username.to_string(),
        day,
        mood_score: mood,
        stress_level: stress,
        energy_level: energy,
        highlights: serde_json::from_str(&highlights)
            .map_err(|e| AnalysisError::Corrupt(format!("bad highlights: {e}")))?,
        event_count,
        total_minutes,
        last_updated: last_updated.as_deref().map(parse_timestamp).transpose()?,
    }))
}

pub fn delete_day(conn: &Connection, username: &str, day: NaiveDate) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM daily_reflections WHERE username = ?1 AND day = ?2",
        params![username, day.to_string()],
    )?)
}
