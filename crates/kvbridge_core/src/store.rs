//! Store handles.

use crate::bridge::{resolve_with, CoreFuture};
use crate::cursor::{drain, PrimaryKeys, Progressive, Values};
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::transaction::Transaction;
use futures::future::{self, try_join_all};
use futures::FutureExt;
use kvbridge_engine::{
    CursorDirection, Key, KeyPath, NativeResult, NativeStore, Outcome, Request, Value,
};
use std::fmt;
use std::rc::Rc;

/// One record or a batch of records.
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    /// A single record.
    One(Value),
    /// A batch, written in order.
    Many(Vec<Value>),
}

impl Records {
    fn into_vec(self) -> Vec<Value> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

impl From<Value> for Records {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<Vec<Value>> for Records {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

impl<const N: usize> From<[Value; N]> for Records {
    fn from(values: [Value; N]) -> Self {
        Self::Many(values.into())
    }
}

fn expect_key(outcome: Outcome) -> CoreResult<Key> {
    match outcome {
        Outcome::Key(key) => Ok(key),
        other => Err(CoreError::invalid_key(format!(
            "expected a key, got {other:?}"
        ))),
    }
}

fn expect_done(_: Outcome) -> CoreResult<()> {
    Ok(())
}

fn expect_count(outcome: Outcome) -> CoreResult<u64> {
    match outcome {
        Outcome::Count(count) => Ok(count),
        other => Err(CoreError::request(format!("expected a count, got {other:?}"))),
    }
}

fn expect_keys(outcome: Outcome) -> CoreResult<Vec<Key>> {
    match outcome {
        Outcome::Keys(keys) => Ok(keys),
        other => Err(CoreError::request(format!("expected keys, got {other:?}"))),
    }
}

fn expect_values(outcome: Outcome) -> CoreResult<Vec<Value>> {
    match outcome {
        Outcome::Values(values) => Ok(values),
        other => Err(CoreError::request(format!("expected records, got {other:?}"))),
    }
}

fn expect_record(outcome: Outcome) -> CoreResult<Option<Value>> {
    match outcome {
        Outcome::Value(value) => Ok(Some(value)),
        Outcome::Undefined => Ok(None),
        other => Err(CoreError::request(format!("expected a record, got {other:?}"))),
    }
}

/// Issues `request` and maps its outcome, or fails right away if the engine
/// refused to create it.
fn issue<T: 'static>(
    request: NativeResult<Request>,
    map: impl FnOnce(Outcome) -> CoreResult<T> + 'static,
) -> CoreFuture<T> {
    match request {
        Ok(request) => resolve_with(&request, map),
        Err(error) => future::err(error.into()).boxed_local(),
    }
}

/// Operations on one store, inside one transaction.
///
/// A handle never outlives its transaction's usefulness: once the
/// transaction has settled, every operation fails.
pub struct ObjectStore {
    transaction: Transaction,
    name: String,
    native: Rc<dyn NativeStore>,
}

impl ObjectStore {
    pub(crate) fn new(transaction: Transaction, name: &str, native: Rc<dyn NativeStore>) -> Self {
        Self {
            transaction,
            name: name.to_string(),
            native,
        }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning transaction.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Key path, if records carry their key.
    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.native.key_path()
    }

    /// Whether the store generates keys.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.native.auto_increment()
    }

    /// Names of the store's indexes.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.native.index_names()
    }

    fn write_all(&self, records: Records, overwrite: bool) -> CoreFuture<Vec<Key>> {
        let records = records.into_vec();
        if records.is_empty() {
            return future::ok(Vec::new()).boxed_local();
        }

        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            let request = if overwrite {
                self.native.put(record, None)
            } else {
                self.native.add(record, None)
            };
            match request {
                Ok(request) => pending.push(resolve_with(&request, expect_key)),
                Err(error) => {
                    if !pending.is_empty() {
                        // Keep the batch all-or-nothing.
                        let _ = self.transaction.abort();
                    }
                    return future::err(error.into()).boxed_local();
                }
            }
        }
        try_join_all(pending).boxed_local()
    }

    /// Adds one or more records; fails on the first key collision.
    ///
    /// All adds are issued at once. A failure aborts the transaction, so
    /// none of the batch is kept.
    pub fn insert(&self, records: impl Into<Records>) -> CoreFuture<Vec<Key>> {
        self.write_all(records.into(), false)
    }

    /// Adds or replaces one or more records.
    pub fn upsert(&self, records: impl Into<Records>) -> CoreFuture<Vec<Key>> {
        self.write_all(records.into(), true)
    }

    /// Adds a record under an explicit key (out-of-line stores).
    pub fn insert_with_key(&self, record: Value, key: impl Into<Key>) -> CoreFuture<Key> {
        issue(self.native.add(record, Some(key.into())), expect_key)
    }

    /// Adds or replaces a record under an explicit key (out-of-line stores).
    pub fn upsert_with_key(&self, record: Value, key: impl Into<Key>) -> CoreFuture<Key> {
        issue(self.native.put(record, Some(key.into())), expect_key)
    }

    /// Deletes the record with `key`. Deleting an absent key succeeds.
    pub fn delete(&self, key: impl Into<Key>) -> CoreFuture<()> {
        issue(self.native.delete(key.into()), expect_done)
    }

    /// Deletes every record.
    pub fn clear(&self) -> CoreFuture<()> {
        issue(self.native.clear(), expect_done)
    }

    /// Counts every record.
    pub fn count(&self) -> CoreFuture<u64> {
        issue(self.native.count(None), expect_count)
    }

    /// Counts the records a query would visit.
    pub fn count_by(&self, query: &Query) -> CoreFuture<u64> {
        let range = query.range.clone();
        match &query.index {
            Some(index) => match self.native.index(index) {
                Ok(index) => issue(index.count(range), expect_count),
                Err(error) => future::err(error.into()).boxed_local(),
            },
            None => issue(self.native.count(range), expect_count),
        }
    }

    /// Fetches the record with `key`.
    ///
    /// Unlike the engine, a missing record is an error: `NotFound` naming
    /// the store and the key.
    pub fn find(&self, key: impl Into<Key>) -> CoreFuture<Value> {
        let key = key.into();
        let store = self.name.clone();
        let missing = key.clone();
        issue(self.native.get(key), move |outcome| {
            expect_record(outcome)?.ok_or_else(|| CoreError::not_found(store, missing))
        })
    }

    /// Fetches the first record whose `index` key equals `key`, if any.
    pub fn find_by(&self, index: &str, key: impl Into<Key>) -> CoreFuture<Option<Value>> {
        match self.native.index(index) {
            Ok(index) => issue(index.get(key.into()), expect_record),
            Err(error) => future::err(error.into()).boxed_local(),
        }
    }

    /// Every primary key, ascending.
    pub fn get_all_keys(&self) -> CoreFuture<Vec<Key>> {
        match self.native.get_all_keys(None) {
            Some(request) => issue(request, expect_keys),
            None => match self.native.open_key_cursor(None, CursorDirection::Next) {
                Ok(request) => drain(&request, PrimaryKeys).boxed_local(),
                Err(error) => future::err(error.into()).boxed_local(),
            },
        }
    }

    /// Every record, in primary key order.
    pub fn get_all(&self) -> CoreFuture<Vec<Value>> {
        match self.native.get_all(None) {
            Some(request) => issue(request, expect_values),
            None => match self.native.open_cursor(None, CursorDirection::Next) {
                Ok(request) => drain(&request, Values).boxed_local(),
                Err(error) => future::err(error.into()).boxed_local(),
            },
        }
    }

    fn iterate(&self, index: Option<&str>, query: &Query) -> Progressive<Value> {
        let range = query.range.clone();
        let direction = query.direction.cursor_direction();
        let request = match index {
            Some(name) => self
                .native
                .index(name)
                .and_then(|index| index.open_cursor(range, direction)),
            None => self.native.open_cursor(range, direction),
        };
        match request {
            Ok(request) => drain(&request, Values),
            Err(error) => Progressive::settled(Err(error.into())),
        }
    }

    /// Iterates the records a query selects, reading through the query's
    /// index if it names one. `None` scans the whole store ascending.
    pub fn each(&self, query: Option<&Query>) -> Progressive<Value> {
        let query = query.cloned().unwrap_or_default();
        self.iterate(query.index.as_deref(), &query)
    }

    /// Iterates the records a query selects, read through `index`.
    pub fn each_by(&self, index: &str, query: Option<&Query>) -> Progressive<Value> {
        let query = query.cloned().unwrap_or_default();
        self.iterate(Some(index), &query)
    }

    /// Aborts the owning transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has already finished.
    pub fn abort(&self) -> CoreResult<()> {
        self.transaction.abort()
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.name)
            .field("transaction", &self.transaction.id())
            .finish()
    }
}
