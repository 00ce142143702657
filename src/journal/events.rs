//! Durable event storage for one `(username, day)` partition at a time.
//!
//! Writes go through [`insert`] (NEW decisions) and [`merge`] (CONTINUE
//! decisions). `merge` is a versioned read-modify-write: the `UPDATE` only
//! lands when the stored version still equals the version the decision was
//! computed against, otherwise [`AnalysisError::VersionConflict`] is returned
//! and nothing changes.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

use crate::db::{parse_timestamp, timestamp, write_activity_log};
use crate::error::{AnalysisError, Result};
use crate::journal::types::{Event, EventFields, MergePatch, Scores, TimeRange, SCORE_MAX};

const EVENT_COLUMNS: &str = "id, username, day, start_time, end_time, location, activity_type, \
     people_involved, mood_score, stress_level, energy_level, one_sentence_summary, event_title, \
     version, created_at, updated_at";

/// Raw column values, converted into an [`Event`] outside the row closure so
/// that parse failures surface as [`AnalysisError::Corrupt`].
struct EventRow {
    id: String,
    username: String,
    day: String,
    start_time: String,
    end_time: String,
    location: String,
    activity_type: String,
    people_involved: String,
    mood_score: Option<u8>,
    stress_level: Option<u8>,
    energy_level: Option<u8>,
    one_sentence_summary: String,
    event_title: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        username: row.get(1)?,
        day: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        location: row.get(5)?,
        activity_type: row.get(6)?,
        people_involved: row.get(7)?,
        mood_score: row.get(8)?,
        stress_level: row.get(9)?,
        energy_level: row.get(10)?,
        one_sentence_summary: row.get(11)?,
        event_title: row.get(12)?,
        version: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let day = self
            .day
            .parse::<NaiveDate>()
            .map_err(|e| AnalysisError::Corrupt(format!("bad day {:?}: {e}", self.day)))?;
        let people_involved: BTreeSet<String> = serde_json::from_str(&self.people_involved)?;

        Ok(Event {
            id: self.id,
            username: self.username,
            day,
            time_range: TimeRange {
                start: parse_timestamp(&self.start_time)?,
                end: parse_timestamp(&self.end_time)?,
            },
            location: self.location,
            activity_type: self.activity_type,
            people_involved,
            scores: Scores {
                mood_score: self.mood_score,
                stress_level: self.stress_level,
                energy_level: self.energy_level,
            },
            one_sentence_summary: self.one_sentence_summary,
            event_title: self.event_title,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn query_events<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(EventRow::into_event).collect()
}

/// Fetch one event by id.
pub fn get(conn: &Connection, event_id: &str) -> Result<Option<Event>> {
    let row = conn
        .query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![event_id],
            read_row,
        )
        .optional()?;
    row.map(EventRow::into_event).transpose()
}

/// The latest-starting event of the day, if any. This is the only event a
/// CONTINUE decision may extend.
pub fn find_active(conn: &Connection, username: &str, day: NaiveDate) -> Result<Option<Event>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE username = ?1 AND day = ?2 \
                 ORDER BY start_time DESC, id DESC LIMIT 1"
            ),
            params![username, day.to_string()],
            read_row,
        )
        .optional()?;
    row.map(EventRow::into_event).transpose()
}

/// The event in effect at `at`: the latest one of the day starting no later
/// than `at`. For fragments that arrive in order this is [`find_active`]; a
/// late fragment is judged against the event it actually falls after.
pub fn find_active_at(
    conn: &Connection,
    username: &str,
    day: NaiveDate,
    at: DateTime<Utc>,
) -> Result<Option<Event>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE username = ?1 AND day = ?2 \
                 AND start_time <= ?3 ORDER BY start_time DESC, id DESC LIMIT 1"
            ),
            params![username, day.to_string(), timestamp(at)],
            read_row,
        )
        .optional()?;
    row.map(EventRow::into_event).transpose()
}

/// All events of the day ordered by start time.
pub fn list_for_day(conn: &Connection, username: &str, day: NaiveDate) -> Result<Vec<Event>> {
    query_events(
        conn,
        &format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE username = ?1 AND day = ?2 \
             ORDER BY start_time ASC, id ASC"
        ),
        params![username, day.to_string()],
    )
}

pub fn count_for_day(conn: &Connection, username: &str, day: NaiveDate) -> Result<u32> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE username = ?1 AND day = ?2",
        params![username, day.to_string()],
        |row| row.get(0),
    )?;
    Ok(n as u32)
}

/// Create a new event at version 0.
pub fn insert(
    conn: &Connection,
    username: &str,
    day: NaiveDate,
    fields: &EventFields,
) -> Result<Event> {
    if fields.time_range.end < fields.time_range.start {
        return Err(AnalysisError::InvalidInput(
            "event end precedes its start".into(),
        ));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let now = timestamp(Utc::now());
    let scores = fields.scores.clamped();

    conn.execute(
        "INSERT INTO events (id, username, day, start_time, end_time, location, activity_type, \
         people_involved, mood_score, stress_level, energy_level, one_sentence_summary, event_title, \
         version, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14, ?14)",
        params![
            id,
            username,
            day.to_string(),
            timestamp(fields.time_range.start),
            timestamp(fields.time_range.end),
            fields.location,
            fields.activity_type,
            serde_json::to_string(&fields.people_involved)?,
            scores.mood_score,
            scores.stress_level,
            scores.energy_level,
            fields.one_sentence_summary,
            fields.event_title,
            now,
        ],
    )?;

    write_activity_log(
        conn,
        "create",
        &id,
        Some(&serde_json::json!({
            "username": username,
            "day": day.to_string(),
            "location": fields.location,
            "activity_type": fields.activity_type,
        })),
    )?;

    tracing::debug!(event_id = %id, %username, %day, "event created");

    Ok(Event {
        id,
        username: username.to_string(),
        day,
        time_range: fields.time_range,
        location: fields.location.clone(),
        activity_type: fields.activity_type.clone(),
        people_involved: fields.people_involved.clone(),
        scores,
        one_sentence_summary: fields.one_sentence_summary.clone(),
        event_title: fields.event_title.clone(),
        version: 0,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Fold a CONTINUE patch into the event, guarded by `expected_version`.
pub fn merge(
    conn: &Connection,
    event_id: &str,
    expected_version: i64,
    patch: &MergePatch,
) -> Result<Event> {
    let current = get(conn, event_id)?
        .ok_or_else(|| AnalysisError::NotFound(format!("event {event_id}")))?;
    if current.version != expected_version {
        return Err(AnalysisError::VersionConflict {
            event_id: event_id.to_string(),
            expected: expected_version,
            found: current.version,
        });
    }

    let mut merged = apply_patch(&current, patch);
    merged.updated_at = timestamp(Utc::now());

    let changed = conn.execute(
        "UPDATE events SET end_time = ?1, people_involved = ?2, mood_score = ?3, stress_level = ?4, \
         energy_level = ?5, one_sentence_summary = ?6, event_title = ?7, version = version + 1, \
         updated_at = ?8 WHERE id = ?9 AND version = ?10",
        params![
            timestamp(merged.time_range.end),
            serde_json::to_string(&merged.people_involved)?,
            merged.scores.mood_score,
            merged.scores.stress_level,
            merged.scores.energy_level,
            merged.one_sentence_summary,
            merged.event_title,
            merged.updated_at,
            event_id,
            expected_version,
        ],
    )?;

    if changed == 0 {
        let found = get(conn, event_id)?
            .ok_or_else(|| AnalysisError::NotFound(format!("event {event_id}")))?
            .version;
        return Err(AnalysisError::VersionConflict {
            event_id: event_id.to_string(),
            expected: expected_version,
            found,
        });
    }

    write_activity_log(
        conn,
        "merge",
        event_id,
        Some(&serde_json::json!({
            "version": merged.version,
            "people_added": patch.people_involved.difference(&current.people_involved).count(),
        })),
    )?;

    Ok(merged)
}

/// Pure merge rule: end moves forward only, people are unioned, scores are
/// averaged with the prior weighted by the event's duration so far and the
/// patch weighted by how far it extends the event.
pub fn apply_patch(current: &Event, patch: &MergePatch) -> Event {
    let end = current.time_range.end.max(patch.end);
    let prior_weight = current.time_range.duration().num_seconds().max(1) as f64;
    let patch_weight = (patch.end - current.time_range.end).num_seconds().max(1) as f64;

    let average = |prior: Option<u8>, incoming: Option<u8>| -> Option<u8> {
        match (prior, incoming) {
            (Some(p), Some(n)) => {
                let mean = (p as f64 * prior_weight + n as f64 * patch_weight)
                    / (prior_weight + patch_weight);
                Some(mean.round().clamp(0.0, SCORE_MAX as f64) as u8)
            }
            (None, Some(n)) => Some(n.min(SCORE_MAX)),
            (p, None) => p,
        }
    };

    let mut people_involved = current.people_involved.clone();
    people_involved.extend(patch.people_involved.iter().cloned());

    Event {
        time_range: TimeRange {
            start: current.time_range.start,
            end,
        },
        people_involved,
        scores: Scores {
            mood_score: average(current.scores.mood_score, patch.scores.mood_score),
            stress_level: average(current.scores.stress_level, patch.scores.stress_level),
            energy_level: average(current.scores.energy_level, patch.scores.energy_level),
        },
        one_sentence_summary: patch
            .one_sentence_summary
            .clone()
            .unwrap_or_else(|| current.one_sentence_summary.clone()),
        event_title: patch
            .event_title
            .clone()
            .unwrap_or_else(|| current.event_title.clone()),
        version: current.version + 1,
        ..current.clone()
    }
}

/// Delete every event of the day. Returns the number removed.
pub fn delete_day(conn: &Connection, username: &str, day: NaiveDate) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM events WHERE username = ?1 AND day = ?2",
        params![username, day.to_string()],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn fields(start: DateTime<Utc>, location: &str) -> EventFields {
        EventFields {
            time_range: TimeRange::at(start),
            location: location.into(),
            activity_type: "work".into(),
            people_involved: BTreeSet::new(),
            scores: Scores::default(),
            one_sentence_summary: "Working.".into(),
            event_title: "work at cafe".into(),
        }
    }

    fn patch(end: DateTime<Utc>) -> MergePatch {
        MergePatch {
            end,
            people_involved: BTreeSet::new(),
            scores: Scores::default(),
            one_sentence_summary: None,
            event_title: None,
        }
    }

    #[test]
    fn insert_then_find_active() {
        let conn = crate::db::open_memory_database().unwrap();
        insert(&conn, "ana", day(), &fields(at(9, 0), "cafe")).unwrap();
        let second = insert(&conn, "ana", day(), &fields(at(11, 0), "office")).unwrap();

        let active = find_active(&conn, "ana", day()).unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.version, 0);
        assert!(find_active(&conn, "bo", day()).unwrap().is_none());
    }

    #[test]
    fn find_active_at_picks_the_event_in_effect() {
        let conn = crate::db::open_memory_database().unwrap();
        let early = insert(&conn, "ana", day(), &fields(at(9, 0), "cafe")).unwrap();
        let late = insert(&conn, "ana", day(), &fields(at(11, 0), "office")).unwrap();

        let pick = |h, m| find_active_at(&conn, "ana", day(), at(h, m)).unwrap().map(|e| e.id);
        assert_eq!(pick(7, 0), None);
        assert_eq!(pick(9, 0), Some(early.id.clone()));
        assert_eq!(pick(10, 59), Some(early.id));
        assert_eq!(pick(11, 0), Some(late.id.clone()));
        assert_eq!(pick(15, 0), Some(late.id));
    }

    #[test]
    fn merge_extends_and_bumps_version() {
        let conn = crate::db::open_memory_database().unwrap();
        let event = insert(&conn, "ana", day(), &fields(at(9, 0), "cafe")).unwrap();

        let mut p = patch(at(9, 30));
        p.people_involved.insert("colleague".into());
        let merged = merge(&conn, &event.id, 0, &p).unwrap();

        assert_eq!(merged.version, 1);
        assert_eq!(merged.time_range.end, at(9, 30));
        assert!(merged.people_involved.contains("colleague"));

        let stored = get(&conn, &event.id).unwrap().unwrap();
        assert_eq!(stored, merged);
    }

    #[test]
    fn merge_with_stale_version_conflicts() {
        let conn = crate::db::open_memory_database().unwrap();
        let event = insert(&conn, "ana", day(), &fields(at(9, 0), "cafe")).unwrap();
        merge(&conn, &event.id, 0, &patch(at(9, 10))).unwrap();

        let err = merge(&conn, &event.id, 0, &patch(at(9, 20))).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::VersionConflict { expected: 0, found: 1, .. }
        ));
        let stored = get(&conn, &event.id).unwrap().unwrap();
        assert_eq!(stored.time_range.end, at(9, 10));
    }

    #[test]
    fn merge_missing_event_is_not_found() {
        let conn = crate::db::open_memory_database().unwrap();
        let err = merge(&conn, "nope", 0, &patch(at(9, 0))).unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }

    #[test]
    fn end_never_moves_backwards() {
        let conn = crate::db::open_memory_database().unwrap();
        let event = insert(&conn, "ana", day(), &fields(at(9, 0), "cafe")).unwrap();
        merge(&conn, &event.id, 0, &patch(at(10, 0))).unwrap();
        let merged = merge(&conn, &event.id, 1, &patch(at(9, 30))).unwrap();
        assert_eq!(merged.time_range.end, at(10, 0));
    }

    #[test]
    fn scores_average_by_duration() {
        let mut event = Event {
            id: "e".into(),
            username: "ana".into(),
            day: day(),
            time_range: TimeRange {
                start: at(9, 0),
                end: at(10, 0),
            },
            location: "cafe".into(),
            activity_type: "work".into(),
            people_involved: BTreeSet::new(),
            scores: Scores {
                mood_score: Some(8),
                stress_level: None,
                energy_level: Some(6),
            },
            one_sentence_summary: String::new(),
            event_title: String::new(),
            version: 3,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let mut p = patch(at(10, 0) + Duration::minutes(20));
        p.scores = Scores {
            mood_score: Some(4),
            stress_level: Some(7),
            energy_level: None,
        };

        let merged = apply_patch(&event, &p);
        // 60 min at 8 and 20 min at 4 -> 7
        assert_eq!(merged.scores.mood_score, Some(7));
        assert_eq!(merged.scores.stress_level, Some(7));
        assert_eq!(merged.scores.energy_level, Some(6));
        assert_eq!(merged.version, 4);

        event.scores = Scores::default();
        assert!(apply_patch(&event, &patch(at(10, 5))).scores.is_empty());
    }

    #[test]
    fn list_and_delete_day() {
        let conn = crate::db::open_memory_database().unwrap();
        insert(&conn, "ana", day(), &fields(at(11, 0), "office")).unwrap();
        insert(&conn, "ana", day(), &fields(at(9, 0), "cafe")).unwrap();
        insert(&conn, "bo", day(), &fields(at(9, 0), "gym")).unwrap();

        let events = list_for_day(&conn, "ana", day()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].location, "cafe");
        assert_eq!(count_for_day(&conn, "ana", day()).unwrap(), 2);

        assert_eq!(delete_day(&conn, "ana", day()).unwrap(), 2);
        assert_eq!(count_for_day(&conn, "ana", day()).unwrap(), 0);
        assert_eq!(count_for_day(&conn, "bo", day()).unwrap(), 1);
    }
}
