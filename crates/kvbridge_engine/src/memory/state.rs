//! Stored data of the in-memory engine.
//!
//! Everything here is plain data plus the rules for reading and writing it.
//! Scheduling, events and transactions live in the sibling modules.

use crate::error::{NativeError, NativeResult};
use crate::key::{Key, KeyPath};
use crate::native::{IndexParams, StoreParams};
use crate::range::{CursorDirection, KeyRange};
use serde_json::Value;
use std::collections::BTreeMap;

/// A (key, primary key) pair. For stores both halves are the record key.
pub(crate) type Entry = (Key, Key);

#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<String, StoreState>,
}

impl DatabaseState {
    pub(crate) fn store(&self, name: &str) -> NativeResult<&StoreState> {
        self.stores.get(name).ok_or_else(|| missing_store(name))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> NativeResult<&mut StoreState> {
        self.stores.get_mut(name).ok_or_else(|| missing_store(name))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    pub(crate) key_path: KeyPath,
    pub(crate) unique: bool,
    pub(crate) multi_entry: bool,
}

impl IndexState {
    pub(crate) fn new(key_path: KeyPath, params: IndexParams) -> Self {
        Self {
            key_path,
            unique: params.unique,
            multi_entry: params.multi_entry,
        }
    }

    /// Index keys a record contributes. Records without a valid key at the
    /// path are left out of the index.
    pub(crate) fn keys_for(&self, record: &Value) -> Vec<Key> {
        match self.key_path.extract(record) {
            Some(Key::Array(items)) if self.multi_entry => {
                let mut keys = items;
                keys.sort();
                keys.dedup();
                keys
            }
            Some(key) => vec![key],
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    pub(crate) next_key: u64,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexState>,
}

impl StoreState {
    pub(crate) fn new(params: StoreParams) -> Self {
        Self {
            key_path: params.key_path,
            auto_increment: params.auto_increment,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn index(&self, name: &str) -> NativeResult<&IndexState> {
        self.indexes.get(name).ok_or_else(|| {
            NativeError::not_found(format!("The index '{name}' was not found."))
        })
    }

    /// Checks that a write could produce a key, before any request exists.
    pub(crate) fn check_insertable(&self, value: &Value, key: Option<&Key>) -> NativeResult<()> {
        match (&self.key_path, key) {
            (Some(_), Some(_)) => Err(NativeError::data(
                "The object store uses in-line keys and the key parameter was provided.",
            )),
            (Some(path), None) => {
                if path.extract(value).is_some() {
                    Ok(())
                } else if self.auto_increment && value.is_object() {
                    Ok(())
                } else {
                    Err(NativeError::data(
                        "Evaluating the object store's key path did not yield a value.",
                    ))
                }
            }
            (None, None) if !self.auto_increment => Err(NativeError::data(
                "The object store uses out-of-line keys and has no key generator and the key parameter was not provided.",
            )),
            (None, _) => Ok(()),
        }
    }

    /// Adds (or with `overwrite`, replaces) a record and returns its key.
    pub(crate) fn write(&mut self, mut value: Value, key: Option<Key>, overwrite: bool) -> NativeResult<Key> {
        self.check_insertable(&value, key.as_ref())?;

        let inline = self.key_path.as_ref().and_then(|path| path.extract(&value));
        let key = match key.or(inline) {
            Some(key) => key,
            None => {
                let generated = Key::from(self.next_key);
                if let Some(path) = &self.key_path {
                    if !path.inject(&mut value, &generated) {
                        return Err(NativeError::data("The generated key could not be injected."));
                    }
                }
                generated
            }
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(NativeError::constraint("Key already exists in the object store."));
        }
        self.check_unique(&key, &value)?;

        if self.auto_increment {
            if let Some(n) = key.as_number() {
                if n >= self.next_key as f64 {
                    self.next_key = (n.floor() as u64).saturating_add(1);
                }
            }
        }

        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn check_unique(&self, key: &Key, value: &Value) -> NativeResult<()> {
        for (name, index) in self.indexes.iter().filter(|(_, index)| index.unique) {
            let wanted = index.keys_for(value);
            let clash = self
                .records
                .iter()
                .filter(|(primary, _)| *primary != key)
                .any(|(_, other)| index.keys_for(other).iter().any(|k| wanted.contains(k)));
            if clash {
                return Err(NativeError::constraint(format!(
                    "Unable to add key to index '{name}': at least one key does not satisfy the uniqueness requirements."
                )));
            }
        }
        Ok(())
    }

    /// All entries of `index`, ordered by index key then primary key.
    pub(crate) fn index_entries(&self, index: &IndexState) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .records
            .iter()
            .flat_map(|(primary, record)| {
                index
                    .keys_for(record)
                    .into_iter()
                    .map(move |key| (key, primary.clone()))
            })
            .collect();
        entries.sort();
        entries
    }

    /// Entries of the store itself, or of one of its indexes, inside `range`.
    pub(crate) fn entries(&self, index: Option<&str>, range: Option<&KeyRange>) -> NativeResult<Vec<Entry>> {
        let all = match index {
            Some(name) => self.index_entries(self.index(name)?),
            None => self
                .records
                .keys()
                .map(|key| (key.clone(), key.clone()))
                .collect(),
        };
        Ok(match range {
            Some(range) => all.into_iter().filter(|(key, _)| range.contains(key)).collect(),
            None => all,
        })
    }
}

fn missing_store(name: &str) -> NativeError {
    NativeError::not_found(format!("The object store '{name}' was not found."))
}

/// Where a read operation looks: a store, or an index of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Source {
    Store(String),
    Index { store: String, index: String },
}

impl Source {
    pub(crate) fn store_name(&self) -> &str {
        match self {
            Self::Store(store) | Self::Index { store, .. } => store,
        }
    }

    pub(crate) fn index_name(&self) -> Option<&str> {
        match self {
            Self::Store(_) => None,
            Self::Index { index, .. } => Some(index),
        }
    }

    pub(crate) fn entries(&self, db: &DatabaseState, range: Option<&KeyRange>) -> NativeResult<Vec<Entry>> {
        db.store(self.store_name())?.entries(self.index_name(), range)
    }
}

/// Finds the entry a cursor moves to from `position`.
///
/// `entries` must be sorted. With no position the cursor is opening and
/// lands on the first entry in its direction.
pub(crate) fn next_position(
    entries: &[Entry],
    position: Option<&Entry>,
    direction: CursorDirection,
) -> Option<Entry> {
    let found = match (direction, position) {
        (CursorDirection::Next, None) | (CursorDirection::NextUnique, None) => entries.first(),
        (CursorDirection::Next, Some(pos)) => entries.iter().find(|entry| *entry > pos),
        (CursorDirection::NextUnique, Some(pos)) => entries.iter().find(|(key, _)| key > &pos.0),
        (CursorDirection::Prev, None) => entries.last(),
        (CursorDirection::Prev, Some(pos)) => entries.iter().rev().find(|entry| *entry < pos),
        (CursorDirection::PrevUnique, pos) => {
            let below = entries
                .iter()
                .rev()
                .find(|(key, _)| pos.map_or(true, |pos| key < &pos.0))?;
            // Lowest primary key among the entries sharing that key.
            entries.iter().find(|(key, _)| key == &below.0)
        }
    };
    found.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notes_store() -> StoreState {
        StoreState::new(StoreParams::key_path("id").auto_increment())
    }

    #[test]
    fn generated_keys_are_injected() {
        let mut store = notes_store();
        let first = store.write(json!({"text": "a"}), None, false).unwrap();
        let second = store.write(json!({"text": "b"}), None, false).unwrap();

        assert_eq!(first, Key::from(1));
        assert_eq!(second, Key::from(2));
        assert_eq!(store.records[&Key::from(2)], json!({"text": "b", "id": 2}));
    }

    #[test]
    fn explicit_keys_advance_generator() {
        let mut store = notes_store();
        store.write(json!({"id": 10}), None, false).unwrap();
        let next = store.write(json!({}), None, false).unwrap();
        assert_eq!(next, Key::from(11));
    }

    #[test]
    fn add_rejects_existing_key() {
        let mut store = notes_store();
        store.write(json!({"id": 1}), None, false).unwrap();
        let err = store.write(json!({"id": 1}), None, false).unwrap_err();
        assert_eq!(err.name, "ConstraintError");
        assert_eq!(err.message.as_deref(), Some("Key already exists in the object store."));

        assert!(store.write(json!({"id": 1, "v": 2}), None, true).is_ok());
        assert_eq!(store.records[&Key::from(1)], json!({"id": 1, "v": 2}));
    }

    #[test]
    fn key_rules() {
        let inline = StoreState::new(StoreParams::key_path("id"));
        assert!(inline.check_insertable(&json!({"id": 1}), Some(&Key::from(1))).is_err());
        assert!(inline.check_insertable(&json!({"text": "x"}), None).is_err());

        let generated = notes_store();
        assert!(generated.check_insertable(&json!("scalar"), None).is_err());

        let out_of_line = StoreState::new(StoreParams::default());
        assert!(out_of_line.check_insertable(&json!(1), None).is_err());
        assert!(out_of_line.check_insertable(&json!(1), Some(&Key::from("k"))).is_ok());
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut store = StoreState::new(StoreParams::key_path("id"));
        store
            .indexes
            .insert("email".into(), IndexState::new("email".into(), IndexParams::unique()));

        store.write(json!({"id": 1, "email": "a@x"}), None, false).unwrap();
        let err = store.write(json!({"id": 2, "email": "a@x"}), None, false).unwrap_err();
        assert_eq!(err.name, "ConstraintError");
        // Rewriting the same record keeps its own index key.
        assert!(store.write(json!({"id": 1, "email": "a@x"}), None, true).is_ok());
    }

    #[test]
    fn multi_entry_index_entries() {
        let mut store = StoreState::new(StoreParams::key_path("id"));
        let tags = IndexState::new("tags".into(), IndexParams::multi_entry());
        store.indexes.insert("tags".into(), tags.clone());
        store.write(json!({"id": 1, "tags": ["b", "a", "a"]}), None, false).unwrap();
        store.write(json!({"id": 2, "tags": ["a"]}), None, false).unwrap();

        let entries = store.index_entries(&tags);
        assert_eq!(
            entries,
            vec![
                (Key::from("a"), Key::from(1)),
                (Key::from("a"), Key::from(2)),
                (Key::from("b"), Key::from(1)),
            ]
        );
    }

    fn sample_entries() -> Vec<Entry> {
        vec![
            (Key::from(1), Key::from(10)),
            (Key::from(1), Key::from(11)),
            (Key::from(2), Key::from(12)),
            (Key::from(3), Key::from(13)),
            (Key::from(3), Key::from(14)),
        ]
    }

    fn walk(direction: CursorDirection) -> Vec<Key> {
        let entries = sample_entries();
        let mut seen = Vec::new();
        let mut position = None;
        while let Some(entry) = next_position(&entries, position.as_ref(), direction) {
            seen.push(entry.1.clone());
            position = Some(entry);
        }
        seen
    }

    #[test]
    fn cursor_walks_every_direction() {
        let keys = |ns: &[i32]| ns.iter().map(|n| Key::from(*n)).collect::<Vec<_>>();
        assert_eq!(walk(CursorDirection::Next), keys(&[10, 11, 12, 13, 14]));
        assert_eq!(walk(CursorDirection::NextUnique), keys(&[10, 12, 13]));
        assert_eq!(walk(CursorDirection::Prev), keys(&[14, 13, 12, 11, 10]));
        assert_eq!(walk(CursorDirection::PrevUnique), keys(&[13, 12, 10]));
    }

    #[test]
    fn entries_respect_range() {
        let mut store = StoreState::new(StoreParams::default());
        for n in 1..=5 {
            store.write(json!(n), Some(Key::from(n)), false).unwrap();
        }
        let range = KeyRange::bound(Key::from(2), Key::from(4), false, true).unwrap();
        let entries = store.entries(None, Some(&range)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(store.entries(Some("missing"), None).is_err());
    }
}
