//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, records and queries.

use kvbridge_core::Direction;
use kvbridge_engine::Key;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Strategy for generating valid keys: integers, strings, or short arrays of
/// both.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let leaf = prop_oneof![
        (-10_000i64..10_000).prop_map(Key::from),
        "[a-z]{0,8}".prop_map(Key::from),
    ];
    leaf.prop_recursive(2, 8, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::from)
    })
}

/// Strategy for generating valid store names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating a set of distinct integer ids.
pub fn id_set_strategy(max_len: usize) -> impl Strategy<Value = BTreeSet<u32>> {
    prop::collection::btree_set(1u32..1_000, 0..max_len)
}

/// Strategy for generating `notes` records with distinct ids.
pub fn notes_strategy(max_len: usize) -> impl Strategy<Value = Vec<Value>> {
    id_set_strategy(max_len).prop_flat_map(|ids| {
        let len = ids.len();
        (Just(ids), prop::collection::vec("[a-z ]{0,12}", len)).prop_map(|(ids, texts)| {
            ids.into_iter()
                .zip(texts)
                .map(|(id, text)| json!({"id": id, "text": text}))
                .collect()
        })
    })
}

/// Strategy for generating query directions.
pub fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Ascending),
        Just(Direction::AscendingUnique),
        Just(Direction::Descending),
        Just(Direction::DescendingUnique),
    ]
}

/// Strategy for generating `(low, high, exclude_low, exclude_high)` bounds
/// with `low <= high`.
pub fn bounds_strategy() -> impl Strategy<Value = (u32, u32, bool, bool)> {
    (0u32..1_000, 0u32..1_000, any::<bool>(), any::<bool>()).prop_map(|(a, b, lo, hi)| {
        (a.min(b), a.max(b), lo, hi)
    })
}
