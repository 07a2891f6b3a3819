//! Stores, indexes and cursors of the in-memory engine.

use super::state::{Entry, IndexState, Source, StoreState};
use super::transaction::{Operation, TxnInner};
use crate::error::{NativeError, NativeResult};
use crate::key::{Key, KeyPath};
use crate::native::{IndexParams, NativeCursor, NativeIndex, NativeSource, NativeStore, TransactionMode};
use crate::range::{CursorDirection, KeyRange};
use crate::request::Request;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Read operations of a store or index, bound to one transaction.
struct SourceHandle {
    txn: Rc<TxnInner>,
    source: Source,
}

impl SourceHandle {
    fn count(&self, range: Option<KeyRange>) -> NativeResult<Request> {
        self.txn.enqueue(Operation::Count {
            source: self.source.clone(),
            range,
        })
    }

    fn get(&self, key: Key) -> NativeResult<Request> {
        self.txn.enqueue(Operation::Get {
            source: self.source.clone(),
            key,
        })
    }

    fn get_all(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        self.txn.engine.config.bulk_fetch.then(|| {
            self.txn.enqueue(Operation::GetAll {
                source: self.source.clone(),
                range,
            })
        })
    }

    fn get_all_keys(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        self.txn.engine.config.bulk_fetch.then(|| {
            self.txn.enqueue(Operation::GetAllKeys {
                source: self.source.clone(),
                range,
            })
        })
    }

    fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
        key_only: bool,
    ) -> NativeResult<Request> {
        let request = Request::new();
        let cursor = Rc::new_cyclic(|this| MemoryCursor {
            this: this.clone(),
            txn: Rc::clone(&self.txn),
            request: request.clone(),
            source: self.source.clone(),
            range,
            direction,
            key_only,
            position: RefCell::new(None),
            current: RefCell::new(None),
            got_value: Cell::new(false),
        });
        self.txn.enqueue_with(request.clone(), Operation::Iterate { cursor })?;
        Ok(request)
    }
}

/// An in-memory store as seen from one transaction.
pub struct MemoryStore {
    handle: SourceHandle,
    name: String,
}

impl MemoryStore {
    pub(crate) fn new(txn: &Rc<TxnInner>, name: &str) -> Self {
        Self {
            handle: SourceHandle {
                txn: Rc::clone(txn),
                source: Source::Store(name.to_string()),
            },
            name: name.to_string(),
        }
    }

    fn txn(&self) -> &Rc<TxnInner> {
        &self.handle.txn
    }

    fn with_state<R>(&self, read: impl FnOnce(&StoreState) -> R) -> Option<R> {
        let storage = self.txn().engine.storage.read();
        storage
            .get(self.txn().db_name())
            .and_then(|db| db.stores.get(&self.name))
            .map(read)
    }

    fn with_state_mut<R>(&self, write: impl FnOnce(&mut StoreState) -> NativeResult<R>) -> NativeResult<R> {
        let mut storage = self.txn().engine.storage.write();
        let store = storage
            .get_mut(self.txn().db_name())
            .ok_or_else(|| NativeError::invalid_state("The database no longer exists."))?
            .store_mut(&self.name)?;
        write(store)
    }

    fn write(&self, value: Value, key: Option<Key>, overwrite: bool) -> NativeResult<Request> {
        let txn = self.txn();
        if txn.is_finished() {
            return Err(NativeError::transaction_inactive("The transaction has finished."));
        }
        if !txn.mode.can_write() {
            return Err(NativeError::read_only("The transaction is read-only."));
        }
        self.with_state(|store| store.check_insertable(&value, key.as_ref()))
            .unwrap_or_else(|| Err(NativeError::invalid_state("The object store has been deleted.")))?;
        txn.enqueue(Operation::Write {
            store: self.name.clone(),
            value,
            key,
            overwrite,
        })
    }

    fn require_upgrade(&self) -> NativeResult<()> {
        let txn = self.txn();
        if txn.mode != TransactionMode::VersionChange || txn.is_finished() {
            return Err(NativeError::invalid_state(
                "A version change transaction is not running.",
            ));
        }
        Ok(())
    }
}

impl NativeSource for MemoryStore {
    fn count(&self, range: Option<KeyRange>) -> NativeResult<Request> {
        self.handle.count(range)
    }

    fn get(&self, key: Key) -> NativeResult<Request> {
        self.handle.get(key)
    }

    fn get_all(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        self.handle.get_all(range)
    }

    fn get_all_keys(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        self.handle.get_all_keys(range)
    }

    fn open_cursor(&self, range: Option<KeyRange>, direction: CursorDirection) -> NativeResult<Request> {
        self.handle.open_cursor(range, direction, false)
    }

    fn open_key_cursor(&self, range: Option<KeyRange>, direction: CursorDirection) -> NativeResult<Request> {
        self.handle.open_cursor(range, direction, true)
    }
}

impl NativeStore for MemoryStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.with_state(|store| store.key_path.clone()).flatten()
    }

    fn auto_increment(&self) -> bool {
        self.with_state(|store| store.auto_increment).unwrap_or(false)
    }

    fn index_names(&self) -> Vec<String> {
        self.with_state(|store| store.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn add(&self, value: Value, key: Option<Key>) -> NativeResult<Request> {
        self.write(value, key, false)
    }

    fn put(&self, value: Value, key: Option<Key>) -> NativeResult<Request> {
        self.write(value, key, true)
    }

    fn delete(&self, key: Key) -> NativeResult<Request> {
        self.txn().enqueue(Operation::Delete {
            store: self.name.clone(),
            key,
        })
    }

    fn clear(&self) -> NativeResult<Request> {
        self.txn().enqueue(Operation::Clear {
            store: self.name.clone(),
        })
    }

    fn index(&self, name: &str) -> NativeResult<Rc<dyn NativeIndex>> {
        if self.txn().is_finished() {
            return Err(NativeError::invalid_state("The transaction has finished."));
        }
        let exists = self
            .with_state(|store| store.indexes.contains_key(name))
            .unwrap_or(false);
        if !exists {
            return Err(NativeError::not_found(format!(
                "The index '{name}' was not found."
            )));
        }
        Ok(Rc::new(MemoryIndex::new(self.txn(), &self.name, name)))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParams,
    ) -> NativeResult<Rc<dyn NativeIndex>> {
        self.require_upgrade()?;
        self.with_state_mut(|store| {
            if store.indexes.contains_key(name) {
                return Err(NativeError::constraint(format!(
                    "An index named '{name}' already exists."
                )));
            }
            let index = IndexState::new(key_path, params);
            if index.unique && has_duplicate_keys(&store.index_entries(&index)) {
                return Err(NativeError::constraint(format!(
                    "Existing records violate the uniqueness of index '{name}'."
                )));
            }
            store.indexes.insert(name.to_string(), index);
            Ok(())
        })?;
        tracing::debug!(store = %self.name, index = name, "index created");
        Ok(Rc::new(MemoryIndex::new(self.txn(), &self.name, name)))
    }

    fn delete_index(&self, name: &str) -> NativeResult<()> {
        self.require_upgrade()?;
        self.with_state_mut(|store| {
            store.indexes.remove(name).map(|_| ()).ok_or_else(|| {
                NativeError::not_found(format!("The index '{name}' was not found."))
            })
        })
    }
}

fn has_duplicate_keys(entries: &[Entry]) -> bool {
    entries.windows(2).any(|pair| pair[0].0 == pair[1].0)
}

/// An in-memory index as seen from one transaction.
pub struct MemoryIndex {
    handle: SourceHandle,
    name: String,
}

impl MemoryIndex {
    fn new(txn: &Rc<TxnInner>, store: &str, name: &str) -> Self {
        Self {
            handle: SourceHandle {
                txn: Rc::clone(txn),
                source: Source::Index {
                    store: store.to_string(),
                    index: name.to_string(),
                },
            },
            name: name.to_string(),
        }
    }

    fn with_state<R>(&self, read: impl FnOnce(&IndexState) -> R) -> Option<R> {
        let txn = &self.handle.txn;
        let storage = txn.engine.storage.read();
        storage
            .get(txn.db_name())
            .and_then(|db| db.stores.get(self.handle.source.store_name()))
            .and_then(|store| store.indexes.get(&self.name))
            .map(read)
    }
}

impl NativeSource for MemoryIndex {
    fn count(&self, range: Option<KeyRange>) -> NativeResult<Request> {
        self.handle.count(range)
    }

    fn get(&self, key: Key) -> NativeResult<Request> {
        self.handle.get(key)
    }

    fn get_all(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        self.handle.get_all(range)
    }

    fn get_all_keys(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        self.handle.get_all_keys(range)
    }

    fn open_cursor(&self, range: Option<KeyRange>, direction: CursorDirection) -> NativeResult<Request> {
        self.handle.open_cursor(range, direction, false)
    }

    fn open_key_cursor(&self, range: Option<KeyRange>, direction: CursorDirection) -> NativeResult<Request> {
        self.handle.open_cursor(range, direction, true)
    }
}

impl NativeIndex for MemoryIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> KeyPath {
        self.with_state(|index| index.key_path.clone())
            .unwrap_or_else(|| KeyPath::new(""))
    }

    fn unique(&self) -> bool {
        self.with_state(|index| index.unique).unwrap_or(false)
    }

    fn multi_entry(&self) -> bool {
        self.with_state(|index| index.multi_entry).unwrap_or(false)
    }
}

/// A cursor over a store or index.
///
/// The same request reports every position; `continue_` re-queues the
/// cursor on its transaction.
pub struct MemoryCursor {
    this: Weak<MemoryCursor>,
    txn: Rc<TxnInner>,
    request: Request,
    pub(crate) source: Source,
    pub(crate) range: Option<KeyRange>,
    pub(crate) direction: CursorDirection,
    key_only: bool,
    pub(crate) position: RefCell<Option<Entry>>,
    current: RefCell<Option<Value>>,
    got_value: Cell<bool>,
}

impl MemoryCursor {
    pub(crate) fn land(&self, entry: Entry, value: Option<Value>) {
        *self.position.borrow_mut() = Some(entry);
        *self.current.borrow_mut() = value;
        self.got_value.set(true);
    }

    pub(crate) fn exhaust(&self) {
        self.current.borrow_mut().take();
        self.got_value.set(false);
    }
}

impl NativeCursor for MemoryCursor {
    fn key(&self) -> Key {
        // Cursors are only handed out once positioned.
        self.position
            .borrow()
            .as_ref()
            .map_or(Key::Number(0.0), |(key, _)| key.clone())
    }

    fn primary_key(&self) -> Key {
        self.position
            .borrow()
            .as_ref()
            .map_or(Key::Number(0.0), |(_, primary)| primary.clone())
    }

    fn value(&self) -> Option<Value> {
        if self.key_only {
            None
        } else {
            self.current.borrow().clone()
        }
    }

    fn continue_(&self) -> NativeResult<()> {
        if !self.got_value.get() {
            return Err(NativeError::invalid_state(
                "The cursor is being iterated or has iterated past its end.",
            ));
        }
        let cursor = self
            .this
            .upgrade()
            .ok_or_else(|| NativeError::invalid_state("The cursor has been released."))?;
        self.got_value.set(false);
        self.request.reset();
        self.txn
            .enqueue_with(self.request.clone(), Operation::Iterate { cursor })
    }
}
