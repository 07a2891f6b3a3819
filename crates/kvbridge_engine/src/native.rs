//! The native engine contract.
//!
//! These traits describe the callback-driven engine the bridge sits on top
//! of. They follow the shape of IndexedDB: a factory opens and deletes
//! databases, a database hands out transactions scoped to named stores, and
//! every data operation returns a [`Request`] that later fires `success` or
//! `error`.
//!
//! # Invariants
//!
//! - Operations return immediately; results arrive through events.
//! - Errors returned synchronously (`Err` from a method) mean no request was
//!   created and no event will fire.
//! - A request error aborts the owning transaction unless the engine
//!   documents otherwise.
//! - A cursor request fires `success` once per position and a final time
//!   with `Outcome::Cursor(None)`.
//!
//! # Implementors
//!
//! - [`crate::MemoryFactory`] - in-memory reference engine

use crate::error::NativeResult;
use crate::key::{Key, KeyPath};
use crate::range::{CursorDirection, KeyRange};
use crate::request::{Request, TransactionEvents};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Reads only; may run concurrently with other read-only transactions.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
    /// Schema changes; only created by the engine during an upgrade.
    VersionChange,
}

impl TransactionMode {
    /// Returns true if the mode permits writes.
    #[must_use]
    pub fn can_write(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Returns the engine's string name for the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::ReadWrite => "readwrite",
            Self::VersionChange => "versionchange",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreParams {
    /// Where records carry their key; `None` for out-of-line keys.
    pub key_path: Option<KeyPath>,
    /// Whether the store generates keys.
    pub auto_increment: bool,
}

impl StoreParams {
    /// A store whose records carry their key at `key_path`.
    pub fn key_path(path: impl Into<KeyPath>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_increment: false,
        }
    }

    /// Enables the key generator.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Parameters for creating an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParams {
    /// Reject writes that would give two records the same index key.
    pub unique: bool,
    /// Index each element of an array key separately.
    pub multi_entry: bool,
}

impl IndexParams {
    /// A unique index.
    #[must_use]
    pub fn unique() -> Self {
        Self {
            unique: true,
            multi_entry: false,
        }
    }

    /// A multi-entry index.
    #[must_use]
    pub fn multi_entry() -> Self {
        Self {
            unique: false,
            multi_entry: true,
        }
    }
}

/// Opens and deletes databases.
pub trait NativeFactory {
    /// Starts opening `name` at `version`.
    ///
    /// The request fires `upgradeneeded` first when the stored version is
    /// lower, then `success` with [`crate::Outcome::Database`]; or `blocked`
    /// while other connections prevent the upgrade; or `error`.
    fn open(&self, name: &str, version: u64) -> NativeResult<Request>;

    /// Starts deleting `name`. Fires `success` once deleted.
    fn delete_database(&self, name: &str) -> NativeResult<Request>;
}

/// An open connection.
pub trait NativeDatabase {
    /// Database name.
    fn name(&self) -> String;

    /// Version the connection was opened at.
    fn version(&self) -> u64;

    /// Names of all stores, sorted.
    fn store_names(&self) -> Vec<String>;

    /// Starts a transaction over `stores`.
    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> NativeResult<Rc<dyn NativeTransaction>>;

    /// Creates a store. Only valid during an upgrade.
    fn create_store(&self, name: &str, params: StoreParams) -> NativeResult<Rc<dyn NativeStore>>;

    /// Deletes a store. Only valid during an upgrade.
    fn delete_store(&self, name: &str) -> NativeResult<()>;

    /// Closes the connection once its transactions finish.
    fn close(&self);
}

/// A transaction.
pub trait NativeTransaction {
    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Names of the stores in scope.
    fn store_names(&self) -> Vec<String>;

    /// Returns a store in scope.
    fn store(&self, name: &str) -> NativeResult<Rc<dyn NativeStore>>;

    /// Aborts the transaction, rolling back its writes.
    fn abort(&self) -> NativeResult<()>;

    /// The transaction's events.
    fn events(&self) -> &TransactionEvents;
}

/// Read operations shared by stores and indexes.
pub trait NativeSource {
    /// Counts records whose key lies in `range`.
    fn count(&self, range: Option<KeyRange>) -> NativeResult<Request>;

    /// Fetches the first record with `key`; `Outcome::Undefined` if none.
    fn get(&self, key: Key) -> NativeResult<Request>;

    /// Fetches all records in `range`; `None` if the engine lacks bulk reads.
    fn get_all(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>>;

    /// Fetches all primary keys in `range`; `None` if the engine lacks bulk
    /// reads.
    fn get_all_keys(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>>;

    /// Opens a cursor over records.
    fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> NativeResult<Request>;

    /// Opens a cursor that exposes keys only.
    fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> NativeResult<Request>;
}

/// A store as seen from one transaction.
pub trait NativeStore: NativeSource {
    /// Store name.
    fn name(&self) -> String;

    /// Key path, if records carry their key.
    fn key_path(&self) -> Option<KeyPath>;

    /// Whether the store generates keys.
    fn auto_increment(&self) -> bool;

    /// Names of the store's indexes, sorted.
    fn index_names(&self) -> Vec<String>;

    /// Adds a record; fails with `ConstraintError` if the key exists.
    fn add(&self, value: Value, key: Option<Key>) -> NativeResult<Request>;

    /// Adds or replaces a record.
    fn put(&self, value: Value, key: Option<Key>) -> NativeResult<Request>;

    /// Deletes the record with `key`, if any.
    fn delete(&self, key: Key) -> NativeResult<Request>;

    /// Deletes every record.
    fn clear(&self) -> NativeResult<Request>;

    /// Returns an index of this store.
    fn index(&self, name: &str) -> NativeResult<Rc<dyn NativeIndex>>;

    /// Creates an index. Only valid during an upgrade.
    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParams,
    ) -> NativeResult<Rc<dyn NativeIndex>>;

    /// Deletes an index. Only valid during an upgrade.
    fn delete_index(&self, name: &str) -> NativeResult<()>;
}

/// An index as seen from one transaction.
pub trait NativeIndex: NativeSource {
    /// Index name.
    fn name(&self) -> String;

    /// Key path the index reads from each record.
    fn key_path(&self) -> KeyPath;

    /// Whether the index is unique.
    fn unique(&self) -> bool;

    /// Whether the index is multi-entry.
    fn multi_entry(&self) -> bool;
}

/// A cursor positioned on one record.
pub trait NativeCursor {
    /// Key at the current position (the index key for index cursors).
    fn key(&self) -> Key;

    /// Primary key of the current record.
    fn primary_key(&self) -> Key;

    /// The current record; `None` for key cursors.
    fn value(&self) -> Option<Value>;

    /// Advances to the next position. The cursor's request fires `success`
    /// again when it gets there.
    fn continue_(&self) -> NativeResult<()>;
}

impl fmt::Debug for dyn NativeDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDatabase")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

impl fmt::Debug for dyn NativeTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTransaction")
            .field("mode", &self.mode())
            .field("stores", &self.store_names())
            .finish()
    }
}

impl fmt::Debug for dyn NativeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeStore")
            .field("name", &self.name())
            .field("key_path", &self.key_path())
            .field("auto_increment", &self.auto_increment())
            .finish()
    }
}

impl fmt::Debug for dyn NativeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeIndex")
            .field("name", &self.name())
            .field("key_path", &self.key_path())
            .field("unique", &self.unique())
            .finish()
    }
}

impl fmt::Debug for dyn NativeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCursor")
            .field("key", &self.key())
            .field("primary_key", &self.primary_key())
            .finish()
    }
}
