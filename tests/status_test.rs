mod helpers;

use chrono::Utc;
use dayweave::config::TrackerConfig;
use dayweave::db;
use dayweave::error::AnalysisError;
use dayweave::journal::status::{self, NewChunk};
use dayweave::journal::types::ChunkStatus;
use helpers::{at, day};
use std::path::Path;
use std::sync::{Arc, Barrier};

fn chunk(id: &str, h: u32) -> NewChunk {
    NewChunk {
        id: id.into(),
        username: "ana".into(),
        day: day(),
        raw_text: format!("fragment {id}"),
        observed_at: at(h, 0),
    }
}

/// Race `ids.len()` claimers, each on its own connection to the same file.
fn race(path: &Path, ids: &[&str]) -> Vec<Result<String, AnalysisError>> {
    let barrier = Arc::new(Barrier::new(ids.len()));
    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let (path, id, barrier) = (path.to_path_buf(), id.to_string(), Arc::clone(&barrier));
            std::thread::spawn(move || {
                let mut conn = db::open_database(&path).unwrap();
                barrier.wait();
                status::claim(&mut conn, &id, Utc::now(), &TrackerConfig::default())
                    .map(|claim| claim.token)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn only_one_worker_wins_a_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    {
        let conn = db::open_database(&path).unwrap();
        status::register(&conn, &chunk("c1", 9)).unwrap();
    }

    let results = race(&path, &["c1", "c1", "c1", "c1"]);
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AnalysisError::AlreadyClaimed(_))));

    let conn = db::open_database(&path).unwrap();
    let stored = status::get(&conn, "c1").unwrap().unwrap();
    assert_eq!(stored.status, ChunkStatus::Processing);
    assert_eq!(stored.retry_count, 1);
}

#[test]
fn one_claim_per_day_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("day.db");
    {
        let conn = db::open_database(&path).unwrap();
        status::register(&conn, &chunk("a", 9)).unwrap();
        status::register(&conn, &chunk("b", 10)).unwrap();
    }

    let results = race(&path, &["a", "b"]);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AnalysisError::DayBusy { .. }))));
}

#[test]
fn lifecycle_is_audited() {
    let mut conn = helpers::test_db();
    let tracker = TrackerConfig::default();
    status::register(&conn, &chunk("c1", 9)).unwrap();

    let claim = status::claim(&mut conn, "c1", Utc::now(), &tracker).unwrap();
    status::fail(&conn, "c1", &claim.token, "extractor down", Utc::now()).unwrap();
    status::reset(&conn, "c1", Utc::now()).unwrap();
    let claim = status::claim(&mut conn, "c1", Utc::now(), &tracker).unwrap();
    status::complete(&conn, "c1", &claim.token, "e1", Utc::now()).unwrap();

    let ops: Vec<String> = conn
        .prepare("SELECT operation FROM activity_log WHERE subject_id = 'c1' ORDER BY id")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(ops, ["claim", "fail", "reset", "claim", "complete"]);

    let done = status::get(&conn, "c1").unwrap().unwrap();
    assert_eq!(done.status, ChunkStatus::Completed);
    assert_eq!(done.event_id.as_deref(), Some("e1"));
    assert!(done.last_error.is_none());
    assert!(done.claim_token.is_none());
}

#[test]
fn completed_chunk_cannot_be_reset_or_reclaimed() {
    let mut conn = helpers::test_db();
    let tracker = TrackerConfig::default();
    status::register(&conn, &chunk("c1", 9)).unwrap();
    let claim = status::claim(&mut conn, "c1", Utc::now(), &tracker).unwrap();
    status::complete(&conn, "c1", &claim.token, "e1", Utc::now()).unwrap();

    assert!(matches!(
        status::reset(&conn, "c1", Utc::now()),
        Err(AnalysisError::InvalidTransition { .. })
    ));
    assert!(matches!(
        status::claim(&mut conn, "c1", Utc::now(), &tracker),
        Err(AnalysisError::AlreadyClaimed(_))
    ));
    assert!(matches!(
        status::complete(&conn, "c1", &claim.token, "e2", Utc::now()),
        Err(AnalysisError::InvalidTransition { .. })
    ));
}
