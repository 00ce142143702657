mod helpers;

use dayweave::db;
use dayweave::error::AnalysisError;
use dayweave::journal::events;
use dayweave::journal::types::{EventFields, MergePatch, Scores, TimeRange};
use helpers::{at, day};
use std::collections::BTreeSet;

fn fields() -> EventFields {
    EventFields {
        time_range: TimeRange::at(at(9, 0)),
        location: "office".into(),
        activity_type: "work".into(),
        people_involved: BTreeSet::from(["sam".to_string()]),
        scores: Scores {
            mood_score: Some(6),
            ..Scores::default()
        },
        one_sentence_summary: "Sat down at the desk.".into(),
        event_title: "work at office".into(),
    }
}

fn joined(end: (u32, u32), who: &str) -> MergePatch {
    MergePatch {
        end: at(end.0, end.1),
        people_involved: BTreeSet::from([who.to_string()]),
        scores: Scores::default(),
        one_sentence_summary: None,
        event_title: None,
    }
}

#[test]
fn merges_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");

    let id = {
        let conn = db::open_database(&path).unwrap();
        let event = events::insert(&conn, "ana", day(), &fields()).unwrap();
        let event = events::merge(&conn, &event.id, 0, &joined((9, 15), "priya")).unwrap();
        events::merge(&conn, &event.id, 1, &joined((9, 45), "jo")).unwrap();
        event.id
    };

    let conn = db::open_database(&path).unwrap();
    let stored = events::get(&conn, &id).unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.time_range.start, at(9, 0));
    assert_eq!(stored.time_range.end, at(9, 45));
    assert_eq!(
        stored.people_involved,
        BTreeSet::from(["jo".to_string(), "priya".to_string(), "sam".to_string()])
    );
    assert_eq!(stored.scores.mood_score, Some(6));
    assert_eq!(stored.one_sentence_summary, "Sat down at the desk.");
}

#[test]
fn losing_writer_sees_the_winners_version() {
    let conn = helpers::test_db();
    let event = events::insert(&conn, "ana", day(), &fields()).unwrap();

    events::merge(&conn, &event.id, 0, &joined((9, 10), "priya")).unwrap();
    let err = events::merge(&conn, &event.id, 0, &joined((9, 20), "jo")).unwrap_err();
    match err {
        AnalysisError::VersionConflict { expected, found, .. } => {
            assert_eq!((expected, found), (0, 1));
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }

    let stored = events::get(&conn, &event.id).unwrap().unwrap();
    assert!(!stored.people_involved.contains("jo"));
    assert_eq!(stored.time_range.end, at(9, 10));
}

#[test]
fn rejects_inverted_time_range() {
    let conn = helpers::test_db();
    let mut bad = fields();
    bad.time_range.end = at(8, 0);
    assert!(matches!(
        events::insert(&conn, "ana", day(), &bad),
        Err(AnalysisError::InvalidInput(_))
    ));
    assert_eq!(helpers::count(&conn, "events"), 0);
}

#[test]
fn every_write_is_audited() {
    let conn = helpers::test_db();
    let event = events::insert(&conn, "ana", day(), &fields()).unwrap();
    events::merge(&conn, &event.id, 0, &joined((9, 10), "priya")).unwrap();

    let ops: Vec<String> = conn
        .prepare("SELECT operation FROM activity_log WHERE subject_id = ?1 ORDER BY id")
        .unwrap()
        .query_map([&event.id], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(ops, ["create", "merge"]);
}
