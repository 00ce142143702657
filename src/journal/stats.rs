use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::journal::status::{self, StatusCounts};

/// Response from the stats surface.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_events: u64,
    pub users: u64,
    pub days: u64,
    pub chunks: StatusCounts,
    pub reflections: u64,
    /// Event counts keyed by activity label.
    pub by_activity: BTreeMap<String, u64>,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_day: Option<String>,
}

/// Compute store statistics, optionally restricted to one user.
///
/// `db_path` is used for file size calculation; pass None for in-memory databases.
pub fn journal_stats(
    conn: &Connection,
    username: Option<&str>,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let user = username.unwrap_or("");
    let filter = "(?1 = '' OR username = ?1)";

    let (total_events, users, days, first_day, last_day): (i64, i64, i64, Option<String>, Option<String>) =
        conn.query_row(
            &format!(
                "SELECT COUNT(*), COUNT(DISTINCT username), COUNT(DISTINCT username || '/' || day), \
                 MIN(day), MAX(day) FROM events WHERE {filter}"
            ),
            params![user],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

    let reflections: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM daily_reflections WHERE {filter}"),
        params![user],
        |row| row.get(0),
    )?;

    let mut by_activity = BTreeMap::new();
    let mut stmt = conn.prepare(&format!(
        "SELECT activity_type, COUNT(*) FROM events WHERE {filter} GROUP BY activity_type"
    ))?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![user], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (activity, count) in rows {
        by_activity.insert(activity, count as u64);
    }

    let chunks = match username {
        Some(u) => chunk_counts_for_user(conn, u)?,
        None => status::count_by_status(conn)?,
    };

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_events: total_events as u64,
        users: users as u64,
        days: days as u64,
        chunks,
        reflections: reflections as u64,
        by_activity,
        db_size_bytes,
        first_day,
        last_day,
    })
}

fn chunk_counts_for_user(conn: &Connection, username: &str) -> Result<StatusCounts> {
    let mut counts = StatusCounts::default();
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM transcript_chunks WHERE username = ?1 GROUP BY status",
    )?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![username], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (status, n) in rows {
        let n = n as u64;
        match status.as_str() {
            "pending" => counts.pending = n,
            "processing" => counts.processing = n,
            "completed" => counts.completed = n,
            "failed" => counts.failed = n,
            other => anyhow::bail!("unknown chunk status in store: {other}"),
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::events;
    use crate::journal::types::{EventFields, Scores, TimeRange};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn insert(conn: &Connection, user: &str, d: u32, activity: &str) {
        let day = NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, d, 9, 0, 0).unwrap();
        events::insert(
            conn,
            user,
            day,
            &EventFields {
                time_range: TimeRange::at(start),
                location: "home".into(),
                activity_type: activity.into(),
                people_involved: Default::default(),
                scores: Scores::default(),
                one_sentence_summary: String::new(),
                event_title: String::new(),
            },
        )
        .unwrap();
    }

    #[test]
    fn empty_store() {
        let conn = crate::db::open_memory_database().unwrap();
        let stats = journal_stats(&conn, None, None).unwrap();
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.chunks.pending, 0);
        assert!(stats.first_day.is_none());
    }

    #[test]
    fn counts_users_days_and_activities() {
        let conn = crate::db::open_memory_database().unwrap();
        insert(&conn, "ana", 1, "work");
        insert(&conn, "ana", 1, "eating");
        insert(&conn, "ana", 2, "work");
        insert(&conn, "bo", 1, "work");

        let all = journal_stats(&conn, None, None).unwrap();
        assert_eq!(all.total_events, 4);
        assert_eq!(all.users, 2);
        assert_eq!(all.days, 3);
        assert_eq!(all.by_activity.get("work"), Some(&3));
        assert_eq!(all.first_day.as_deref(), Some("2026-03-01"));

        let ana = journal_stats(&conn, Some("ana"), None).unwrap();
        assert_eq!(ana.total_events, 3);
        assert_eq!(ana.days, 2);
        assert_eq!(ana.last_day.as_deref(), Some("2026-03-02"));
    }
}
