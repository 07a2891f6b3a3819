//! Transactions of the in-memory engine.
//!
//! A transaction queues its requests and executes them one per scheduled
//! step. It waits while an earlier live transaction with an overlapping
//! scope could conflict with it, and commits automatically at the first
//! step that finds its queue empty. Writes are undone from a snapshot on
//! abort.

use super::connection::ConnInner;
use super::state::{next_position, DatabaseState, Source, StoreState};
use super::store::{MemoryCursor, MemoryStore};
use super::Engine;
use crate::error::{NativeError, NativeResult};
use crate::key::Key;
use crate::native::{NativeCursor, NativeStore, NativeTransaction, TransactionMode};
use crate::range::KeyRange;
use crate::request::{Outcome, Request, TransactionEvents};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnState {
    Waiting,
    Running,
    Finished,
}

/// Work queued on a transaction.
pub(crate) enum Operation {
    Write {
        store: String,
        value: Value,
        key: Option<Key>,
        overwrite: bool,
    },
    Delete {
        store: String,
        key: Key,
    },
    Clear {
        store: String,
    },
    Count {
        source: Source,
        range: Option<KeyRange>,
    },
    Get {
        source: Source,
        key: Key,
    },
    GetAll {
        source: Source,
        range: Option<KeyRange>,
    },
    GetAllKeys {
        source: Source,
        range: Option<KeyRange>,
    },
    Iterate {
        cursor: Rc<MemoryCursor>,
    },
}

impl Operation {
    fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Delete { .. } | Self::Clear { .. })
    }

    fn execute(&self, db: &mut DatabaseState) -> NativeResult<Outcome> {
        match self {
            Self::Write {
                store,
                value,
                key,
                overwrite,
            } => db
                .store_mut(store)?
                .write(value.clone(), key.clone(), *overwrite)
                .map(Outcome::Key),
            Self::Delete { store, key } => {
                db.store_mut(store)?.records.remove(key);
                Ok(Outcome::Undefined)
            }
            Self::Clear { store } => {
                db.store_mut(store)?.records.clear();
                Ok(Outcome::Undefined)
            }
            Self::Count { source, range } => {
                let entries = source.entries(db, range.as_ref())?;
                Ok(Outcome::Count(entries.len() as u64))
            }
            Self::Get { source, key } => {
                let store = db.store(source.store_name())?;
                let range = KeyRange::only(key.clone());
                let entries = store.entries(source.index_name(), Some(&range))?;
                Ok(entries
                    .first()
                    .and_then(|(_, primary)| store.records.get(primary))
                    .map_or(Outcome::Undefined, |value| Outcome::Value(value.clone())))
            }
            Self::GetAll { source, range } => {
                let store = db.store(source.store_name())?;
                let values = store
                    .entries(source.index_name(), range.as_ref())?
                    .iter()
                    .filter_map(|(_, primary)| store.records.get(primary).cloned())
                    .collect();
                Ok(Outcome::Values(values))
            }
            Self::GetAllKeys { source, range } => {
                let keys = source
                    .entries(db, range.as_ref())?
                    .into_iter()
                    .map(|(_, primary)| primary)
                    .collect();
                Ok(Outcome::Keys(keys))
            }
            Self::Iterate { cursor } => {
                let store = db.store(cursor.source.store_name())?;
                let entries = store.entries(cursor.source.index_name(), cursor.range.as_ref())?;
                let position = cursor.position.borrow().clone();
                match next_position(&entries, position.as_ref(), cursor.direction) {
                    Some(entry) => {
                        let value = store.records.get(&entry.1).cloned();
                        cursor.land(entry, value);
                        let handle: Rc<dyn NativeCursor> = Rc::clone(cursor) as Rc<dyn NativeCursor>;
                        Ok(Outcome::Cursor(Some(handle)))
                    }
                    None => {
                        cursor.exhaust();
                        Ok(Outcome::Cursor(None))
                    }
                }
            }
        }
    }
}

/// State needed to undo a transaction's writes.
pub(crate) enum Snapshot {
    /// Stores in scope, as they were when the transaction started.
    Stores(Vec<(String, StoreState)>),
    /// The whole database before an upgrade; `None` if it did not exist.
    Database(Option<DatabaseState>),
}

type FinishHook = Box<dyn FnOnce(bool)>;

pub(crate) struct TxnInner {
    pub(crate) id: u64,
    pub(crate) engine: Rc<Engine>,
    pub(crate) connection: Rc<ConnInner>,
    pub(crate) scope: Vec<String>,
    pub(crate) mode: TransactionMode,
    state: Cell<TxnState>,
    queue: RefCell<VecDeque<(Request, Operation)>>,
    snapshot: RefCell<Option<Snapshot>>,
    events: TransactionEvents,
    on_finish: RefCell<Option<FinishHook>>,
}

impl TxnInner {
    /// Creates a transaction, registers it as live and schedules its first
    /// step.
    pub(crate) fn create(
        engine: &Rc<Engine>,
        connection: &Rc<ConnInner>,
        scope: Vec<String>,
        mode: TransactionMode,
        snapshot: Option<Snapshot>,
    ) -> Rc<Self> {
        let txn = Rc::new(Self {
            id: engine.next_txn_id(),
            engine: Rc::clone(engine),
            connection: Rc::clone(connection),
            scope,
            mode,
            state: Cell::new(TxnState::Waiting),
            queue: RefCell::new(VecDeque::new()),
            snapshot: RefCell::new(snapshot),
            events: TransactionEvents::new(),
            on_finish: RefCell::new(None),
        });
        engine.live.borrow_mut().push(Rc::clone(&txn));
        tracing::trace!(id = txn.id, mode = %mode, scope = ?txn.scope, "transaction created");
        txn.schedule_step();
        txn
    }

    pub(crate) fn state(&self) -> TxnState {
        self.state.get()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.get() == TxnState::Finished
    }

    pub(crate) fn db_name(&self) -> &str {
        &self.connection.name
    }

    /// Runs `hook` with `true` on commit or `false` on abort.
    pub(crate) fn set_on_finish(&self, hook: impl FnOnce(bool) + 'static) {
        *self.on_finish.borrow_mut() = Some(Box::new(hook));
    }

    /// Returns true if this transaction may touch `store`.
    pub(crate) fn covers(&self, store: &str) -> bool {
        self.mode == TransactionMode::VersionChange || self.scope.iter().any(|s| s == store)
    }

    pub(crate) fn overlaps(&self, other: &Self) -> bool {
        if self.db_name() != other.db_name() {
            return false;
        }
        if self.mode == TransactionMode::VersionChange || other.mode == TransactionMode::VersionChange {
            return true;
        }
        self.scope.iter().any(|s| other.scope.contains(s))
    }

    /// Queues `operation` and returns the request that will report it.
    pub(crate) fn enqueue(self: &Rc<Self>, operation: Operation) -> NativeResult<Request> {
        let request = Request::new();
        self.enqueue_with(request.clone(), operation)?;
        Ok(request)
    }

    pub(crate) fn enqueue_with(self: &Rc<Self>, request: Request, operation: Operation) -> NativeResult<()> {
        if self.is_finished() {
            return Err(NativeError::transaction_inactive(
                "The transaction has finished.",
            ));
        }
        if operation.is_write() && !self.mode.can_write() {
            return Err(NativeError::read_only("The transaction is read-only."));
        }
        self.queue.borrow_mut().push_back((request, operation));
        self.schedule_step();
        Ok(())
    }

    pub(crate) fn schedule_step(self: &Rc<Self>) {
        let txn = Rc::clone(self);
        self.engine.event_loop.schedule(move || txn.step());
    }

    fn step(self: &Rc<Self>) {
        match self.state.get() {
            TxnState::Finished => return,
            TxnState::Waiting => {
                if self.engine.is_blocked(self) {
                    return;
                }
                self.start();
            }
            TxnState::Running => {}
        }

        let next = self.queue.borrow_mut().pop_front();
        let Some((request, operation)) = next else {
            self.commit();
            return;
        };

        let result = {
            let mut storage = self.engine.storage.write();
            match storage.get_mut(self.db_name()) {
                Some(db) => operation.execute(db),
                None => Err(NativeError::invalid_state("The database no longer exists.")),
            }
        };

        match result {
            Ok(outcome) => {
                request.succeed(outcome);
                self.schedule_step();
            }
            Err(error) => {
                tracing::debug!(id = self.id, error = %error, "request failed");
                request.fail(error.clone());
                self.abort_with(error, true);
            }
        }
    }

    fn start(&self) {
        self.state.set(TxnState::Running);
        if self.mode == TransactionMode::ReadWrite && self.snapshot.borrow().is_none() {
            let storage = self.engine.storage.read();
            let stores = storage
                .get(self.db_name())
                .map(|db| {
                    self.scope
                        .iter()
                        .filter_map(|name| db.stores.get(name).map(|s| (name.clone(), s.clone())))
                        .collect()
                })
                .unwrap_or_default();
            *self.snapshot.borrow_mut() = Some(Snapshot::Stores(stores));
        }
    }

    fn commit(self: &Rc<Self>) {
        self.state.set(TxnState::Finished);
        self.snapshot.borrow_mut().take();
        tracing::trace!(id = self.id, "transaction committed");
        self.events.fire_complete();
        self.engine.retire(self);
        self.finish(true);
    }

    fn finish(&self, committed: bool) {
        let hook = self.on_finish.borrow_mut().take();
        if let Some(hook) = hook {
            hook(committed);
        }
    }

    /// Aborts the transaction.
    ///
    /// State is rolled back immediately; the events are delivered from a
    /// scheduled task. `errored` marks aborts caused by a failed request,
    /// which fire `error` before `abort`.
    pub(crate) fn abort_with(self: &Rc<Self>, error: NativeError, errored: bool) {
        if self.is_finished() {
            return;
        }
        self.state.set(TxnState::Finished);
        self.rollback();
        tracing::trace!(id = self.id, errored, "transaction aborted");

        let pending: Vec<Request> = self.queue.borrow_mut().drain(..).map(|(r, _)| r).collect();
        self.engine.live.borrow_mut().retain(|t| !Rc::ptr_eq(t, self));

        let txn = Rc::clone(self);
        self.engine.event_loop.schedule(move || {
            for request in pending {
                request.fail(NativeError::abort("The transaction was aborted."));
            }
            if errored {
                txn.events.fire_error(error.clone());
            }
            txn.events.fire_abort(error);
            txn.engine.wake_waiting();
            txn.finish(false);
        });
    }

    fn rollback(&self) {
        let snapshot = self.snapshot.borrow_mut().take();
        let mut storage = self.engine.storage.write();
        match snapshot {
            Some(Snapshot::Stores(stores)) => {
                if let Some(db) = storage.get_mut(self.db_name()) {
                    for (name, state) in stores {
                        db.stores.insert(name, state);
                    }
                }
            }
            Some(Snapshot::Database(previous)) => {
                let old_version = previous.as_ref().map_or(0, |db| db.version);
                match previous {
                    Some(db) => {
                        storage.insert(self.db_name().to_string(), db);
                    }
                    None => {
                        storage.remove(self.db_name());
                    }
                }
                self.connection.version.set(old_version);
            }
            None => {}
        }
    }
}

/// Handle to an in-memory transaction.
#[derive(Clone)]
pub struct MemoryTransaction {
    pub(crate) inner: Rc<TxnInner>,
}

impl NativeTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    fn store_names(&self) -> Vec<String> {
        if self.inner.mode == TransactionMode::VersionChange {
            self.inner.connection.current_store_names()
        } else {
            self.inner.scope.clone()
        }
    }

    fn store(&self, name: &str) -> NativeResult<Rc<dyn NativeStore>> {
        if self.inner.is_finished() {
            return Err(NativeError::invalid_state("The transaction has finished."));
        }
        if !self.inner.covers(name) || !self.inner.connection.has_store(name) {
            return Err(NativeError::not_found(format!(
                "The object store '{name}' is not in this transaction's scope."
            )));
        }
        Ok(Rc::new(MemoryStore::new(&self.inner, name)))
    }

    fn abort(&self) -> NativeResult<()> {
        if self.inner.is_finished() {
            return Err(NativeError::invalid_state("The transaction has finished."));
        }
        self.inner
            .abort_with(NativeError::abort("The transaction was aborted."), false);
        Ok(())
    }

    fn events(&self) -> &TransactionEvents {
        &self.inner.events
    }
}
