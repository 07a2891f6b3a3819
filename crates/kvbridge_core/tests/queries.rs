//! Queries, cursors and iteration order.

use futures::StreamExt;
use kvbridge_core::{Direction, Key, QueryBuilder, TransactionMode};
use kvbridge_engine::MemoryConfig;
use kvbridge_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::{json, Value};

fn ids(records: &[Value]) -> Vec<u64> {
    records.iter().filter_map(|r| r["id"].as_u64()).collect()
}

fn names(records: &[Value]) -> Vec<&str> {
    records.iter().filter_map(|r| r["name"].as_str()).collect()
}

fn seeded_notes(count: u32) -> TestDatabase {
    let db = TestDatabase::memory(notes_config());
    db.run(db.open_store("items", move |items| items.insert(sample_notes(count))))
        .unwrap();
    db
}

fn seeded_people() -> TestDatabase {
    let db = TestDatabase::memory(people_config());
    db.run(db.open_store("people", |people| people.insert(sample_people())))
        .unwrap();
    db
}

#[test]
fn between_excluding_lower_bound() {
    let db = seeded_notes(10);
    let query = db.query().between(5, 10, true, false).build().unwrap();
    let records = db
        .run(db.open_store("items", move |items| items.each(Some(&query))))
        .unwrap();
    assert_eq!(ids(&records), vec![6, 7, 8, 9, 10]);
}

#[test]
fn unbounded_each_scans_ascending() {
    let db = seeded_notes(4);
    let records = db.run(db.open_store("items", |items| items.each(None))).unwrap();
    assert_eq!(ids(&records), vec![1, 2, 3, 4]);
}

#[test]
fn descending_primary_key_scan() {
    let db = seeded_notes(5);
    let query = db.query().lte(3).descending(false).build().unwrap();
    let records = db
        .run(db.open_store("items", move |items| items.each(Some(&query))))
        .unwrap();
    assert_eq!(ids(&records), vec![3, 2, 1]);
}

#[test]
fn no_matches_resolves_empty() {
    let db = seeded_notes(3);
    let query = db.query().gt(100).build().unwrap();
    let records = db
        .run(db.open_store("items", move |items| items.each(Some(&query))))
        .unwrap();
    assert!(records.is_empty());
}

#[test]
fn notifications_arrive_in_cursor_order() {
    let db = seeded_notes(3);
    let txn = db
        .run(db.begin(&["items"], TransactionMode::ReadOnly))
        .unwrap();
    let items = txn.store("items").unwrap();
    let (result, notifications) = items.each(None).into_parts();

    let records = db.run(result).unwrap();
    let notified: Vec<Value> = db.run(notifications.collect());
    assert_eq!(notified, records);
    assert_eq!(ids(&notified), vec![1, 2, 3]);
}

#[test]
fn index_iteration_with_duplicates() {
    let db = seeded_people();
    let by_age = |direction: Direction| {
        let mut builder = QueryBuilder::new();
        builder.use_index("age");
        match direction {
            Direction::Ascending => builder.ascending(false),
            Direction::AscendingUnique => builder.ascending(true),
            Direction::Descending => builder.descending(false),
            Direction::DescendingUnique => builder.descending(true),
        };
        builder.build().unwrap()
    };

    let run = |direction: Direction| {
        let query = by_age(direction);
        db.run(db.open_store("people", move |people| people.each(Some(&query))))
            .unwrap()
    };

    assert_eq!(
        names(&run(Direction::Ascending)),
        vec!["Ada", "Edsger", "Alan", "Grace"]
    );
    assert_eq!(
        names(&run(Direction::AscendingUnique)),
        vec!["Ada", "Alan", "Grace"]
    );
    assert_eq!(
        names(&run(Direction::Descending)),
        vec!["Grace", "Alan", "Edsger", "Ada"]
    );
    assert_eq!(
        names(&run(Direction::DescendingUnique)),
        vec!["Grace", "Alan", "Ada"]
    );
}

#[test]
fn each_by_names_the_index() {
    let db = seeded_people();
    let query = db.query().eq("code").build().unwrap();
    let records = db
        .run(db.open_store("people", move |people| people.each_by("tags", Some(&query))))
        .unwrap();
    assert_eq!(names(&records), vec!["Ada", "Grace"]);
}

#[test]
fn find_by_index() {
    let db = seeded_people();
    let alan = db.run(db.open_store("people", |people| {
        people.find_by("email", "alan@example.com")
    }));
    assert_eq!(alan.unwrap().unwrap()["name"], json!("Alan"));

    let nobody = db.run(db.open_store("people", |people| {
        people.find_by("email", "nobody@example.com")
    }));
    assert_eq!(nobody, Ok(None));
}

#[test]
fn count_by_query() {
    let db = seeded_people();
    let query = db.query().use_index("age").between(36, 41, false, true).build().unwrap();
    let count = db.run(db.open_store("people", move |people| people.count_by(&query)));
    assert_eq!(count, Ok(2));
}

#[test]
fn unknown_index_rejects() {
    let db = seeded_people();
    let result = db.run(db.open_store("people", |people| people.each_by("height", None)));
    assert!(result.is_err());
}

#[test]
fn cursor_fallback_matches_bulk_fetch() {
    let bulk = seeded_notes(6);
    let fallback = TestDatabase::with_engine(notes_config(), MemoryConfig::default().bulk_fetch(false));
    fallback
        .run(fallback.open_store("items", |items| items.insert(sample_notes(6))))
        .unwrap();

    for db in [&bulk, &fallback] {
        let keys = db.run(db.open_store("items", |items| items.get_all_keys()));
        assert_eq!(keys, Ok((1..=6).map(Key::from).collect::<Vec<_>>()));
        let records = db.run(db.open_store("items", |items| items.get_all()));
        assert_eq!(records, Ok(sample_notes(6)));
    }
}

#[test]
fn builder_reuse_does_not_change_built_queries() {
    let db = seeded_notes(10);
    let mut builder = db.query();
    let low = builder.lt(3).build().unwrap();
    let high = builder.gt(8).build().unwrap();

    let (low, high) = db
        .run(db.open_store("items", move |items| {
            futures::future::try_join(items.each(Some(&low)), items.each(Some(&high)))
        }))
        .unwrap();
    assert_eq!(ids(&low), vec![1, 2]);
    assert_eq!(ids(&high), vec![9, 10]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn between_selects_exactly_the_bounded_ids(
        (low, high, exclude_low, exclude_high) in bounds_strategy()
    ) {
        // Scale the generated bounds onto ids 1..=20.
        let (low, high) = (low % 21, high % 21);
        let (low, high) = (low.min(high), low.max(high));
        prop_assume!(low != high || !(exclude_low || exclude_high));
        let db = seeded_notes(20);
        let query = db.query().between(low, high, exclude_low, exclude_high).build().unwrap();
        let records = db
            .run(db.open_store("items", move |items| items.each(Some(&query))))
            .unwrap();

        let expected: Vec<u64> = (1..=20u64)
            .filter(|id| {
                let (low, high) = (u64::from(low), u64::from(high));
                (if exclude_low { *id > low } else { *id >= low })
                    && (if exclude_high { *id < high } else { *id <= high })
            })
            .collect();
        prop_assert_eq!(ids(&records), expected);
    }

    #[test]
    fn descending_is_reverse_of_ascending(direction in direction_strategy()) {
        let db = seeded_notes(8);
        let mut builder = db.query();
        match direction {
            Direction::Ascending | Direction::AscendingUnique => builder.ascending(false),
            Direction::Descending | Direction::DescendingUnique => builder.descending(false),
        };
        let query = builder.build().unwrap();
        let records = db
            .run(db.open_store("items", move |items| items.each(Some(&query))))
            .unwrap();

        let mut expected: Vec<u64> = (1..=8).collect();
        if matches!(direction, Direction::Descending | Direction::DescendingUnique) {
            expected.reverse();
        }
        prop_assert_eq!(ids(&records), expected);
    }
}
