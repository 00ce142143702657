mod helpers;

use chrono::Duration;
use dayweave::journal::events;
use dayweave::journal::reflection::{self, aggregate};
use dayweave::journal::types::{Event, EventFields, Scores, TimeRange};
use helpers::{at, day};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn event(n: usize, start_min: i64, span_min: i64, mood: Option<u8>) -> Event {
    let start = at(6, 0) + Duration::minutes(start_min);
    Event {
        id: format!("e{n:03}"),
        username: "ana".into(),
        day: day(),
        time_range: TimeRange {
            start,
            end: start + Duration::minutes(span_min),
        },
        location: "office".into(),
        activity_type: "work".into(),
        people_involved: BTreeSet::new(),
        scores: Scores {
            mood_score: mood,
            stress_level: mood.map(|m| 10 - m),
            energy_level: None,
        },
        one_sentence_summary: String::new(),
        event_title: format!("event {n}"),
        version: 0,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

fn day_of_events() -> impl Strategy<Value = Vec<Event>> {
    proptest::collection::vec((0i64..600, 0i64..120, proptest::option::of(0u8..=10)), 0..12)
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(n, (start, span, mood))| event(n, start, span, mood))
                .collect()
        })
}

proptest! {
    #[test]
    fn reflection_does_not_depend_on_event_order(
        (events, shuffled) in day_of_events().prop_flat_map(|events| {
            let shuffled = Just(events.clone()).prop_shuffle();
            (Just(events), shuffled)
        })
    ) {
        prop_assert_eq!(aggregate("ana", day(), &events), aggregate("ana", day(), &shuffled));
    }

    #[test]
    fn weighted_means_stay_on_the_scale(events in day_of_events()) {
        let r = aggregate("ana", day(), &events);
        prop_assert_eq!(r.event_count as usize, events.len());
        prop_assert_eq!(r.highlights.len(), events.len());
        for metric in [r.mood_score, r.stress_level, r.energy_level].into_iter().flatten() {
            prop_assert!((0.0..=10.0).contains(&metric));
        }
        prop_assert!(r.energy_level.is_none());
    }
}

#[test]
fn longer_events_weigh_more() {
    let events = [event(0, 0, 90, Some(9)), event(1, 90, 10, Some(1))];
    let r = aggregate("ana", day(), &events);
    // (9 * 90 + 1 * 10) / 100
    assert_eq!(r.mood_score, Some(8.2));
    assert_eq!(r.total_minutes, 100);
    assert_eq!(r.last_updated, Some(at(7, 40)));
}

#[test]
fn stored_reflection_matches_recomputation() {
    let conn = helpers::test_db();
    for (h, mood) in [(9, 4), (11, 8)] {
        events::insert(
            &conn,
            "ana",
            day(),
            &EventFields {
                time_range: TimeRange {
                    start: at(h, 0),
                    end: at(h, 30),
                },
                location: "office".into(),
                activity_type: "work".into(),
                people_involved: BTreeSet::new(),
                scores: Scores {
                    mood_score: Some(mood),
                    ..Scores::default()
                },
                one_sentence_summary: String::new(),
                event_title: "work at office".into(),
            },
        )
        .unwrap();
    }

    let computed = reflection::recompute(&conn, "ana", day()).unwrap();
    let again = reflection::recompute(&conn, "ana", day()).unwrap();
    assert_eq!(computed, again);

    let stored = reflection::get(&conn, "ana", day()).unwrap().unwrap();
    assert_eq!(stored, computed);
    assert_eq!(stored.mood_score, Some(6.0));
    assert_eq!(
        stored.highlights,
        vec!["09:00 work at office".to_string(), "11:00 work at office".to_string()]
    );
}
