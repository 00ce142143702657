use dayweave::db;
use rusqlite::Connection;

fn names(conn: &Connection, kind: &str) -> Vec<String> {
    conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
        .unwrap()
        .query_map([kind], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn on_disk_database_has_all_tables_and_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("dayweave.db");
    let conn = db::open_database(&path).unwrap();
    assert!(path.exists(), "parent directories should be created");

    let tables = names(&conn, "table");
    for table in [
        "events",
        "transcript_chunks",
        "daily_reflections",
        "activity_log",
        "schema_meta",
    ] {
        assert!(tables.contains(&table.to_string()), "{table} table missing");
    }

    let indexes = names(&conn, "index");
    for index in ["idx_events_day", "idx_chunks_day_status", "idx_chunks_sweep"] {
        assert!(indexes.contains(&index.to_string()), "{index} missing");
    }

    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn check_constraints_guard_scores_and_status() {
    let conn = db::open_memory_database().unwrap();

    let bad_score = conn.execute(
        "INSERT INTO events (id, username, day, start_time, end_time, location, activity_type, \
         mood_score, created_at, updated_at) VALUES ('e1', 'ana', '2026-03-01', \
         '2026-03-01T09:00:00.000000Z', '2026-03-01T09:00:00.000000Z', 'home', 'rest', 11, 'x', 'x')",
        [],
    );
    assert!(bad_score.is_err(), "mood above 10 should be rejected");

    let inverted = conn.execute(
        "INSERT INTO events (id, username, day, start_time, end_time, location, activity_type, \
         created_at, updated_at) VALUES ('e2', 'ana', '2026-03-01', \
         '2026-03-01T10:00:00.000000Z', '2026-03-01T09:00:00.000000Z', 'home', 'rest', 'x', 'x')",
        [],
    );
    assert!(inverted.is_err(), "end before start should be rejected");

    let bad_status = conn.execute(
        "INSERT INTO transcript_chunks (id, username, day, raw_text, observed_at, status, \
         created_at, updated_at) VALUES ('c1', 'ana', '2026-03-01', 'hi', 'x', 'lost', 'x', 'x')",
        [],
    );
    assert!(bad_status.is_err(), "unknown chunk status should be rejected");
}

#[test]
fn health_report_counts_rows() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open_database(dir.path().join("health.db")).unwrap();
    conn.execute(
        "INSERT INTO transcript_chunks (id, username, day, raw_text, observed_at, created_at, updated_at) \
         VALUES ('c1', 'ana', '2026-03-01', 'hi', 'x', 'x', 'x')",
        [],
    )
    .unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.event_count, 0);
    assert!(report.extractor_provider.is_none());
}
