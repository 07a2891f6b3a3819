//! Units of work.
//!
//! A [`Transaction`] owns one native transaction over a fixed set of stores
//! and a fixed mode. Its completion future settles exactly once, with the
//! first terminal event the engine fires:
//!
//! - `complete` resolves with [`Committed`]
//! - `abort` rejects with [`CoreError::TransactionAborted`]
//! - `error` rejects with [`CoreError::TransactionFailed`]
//!
//! Every store handle opened from a transaction shares its fate.

use crate::bridge::Deferred;
use crate::error::{describe, CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::store::ObjectStore;
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use kvbridge_engine::{NativeDatabase, NativeTransaction, TransactionMode};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Shared completion future of a transaction.
pub type Completion = Shared<LocalBoxFuture<'static, CoreResult<Committed>>>;

/// Token a committed transaction resolves with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Committed;

impl fmt::Display for Committed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transaction Completed")
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not settled yet.
    Pending,
    /// Committed.
    Completed,
    /// Aborted.
    Aborted,
    /// Failed with an error.
    Failed,
}

impl TransactionState {
    /// Returns true once settled.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

struct Inner {
    id: u64,
    mode: TransactionMode,
    store_names: Vec<String>,
    native: Rc<dyn NativeTransaction>,
    state: Rc<Cell<TransactionState>>,
    completion: Completion,
}

/// A unit of work over one or more stores.
///
/// Cloning yields another handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<Inner>,
}

/// State the event handlers share. Holding the transaction itself would keep
/// it alive through its own native event slots.
struct Settlement {
    id: u64,
    state: Rc<Cell<TransactionState>>,
    deferred: Deferred<Committed>,
    ledger: Ledger,
}

impl Settlement {
    fn settle(&self, state: TransactionState, result: CoreResult<Committed>) -> bool {
        if self.state.get().is_terminal() {
            return false;
        }
        self.state.set(state);
        self.ledger.settle(self.id);
        self.deferred.settle(result);
        true
    }
}

impl Transaction {
    /// Begins a transaction over `store_names`.
    ///
    /// # Errors
    ///
    /// Returns `MissingStores` if any name is not in the database's schema;
    /// no native transaction is created in that case. Errors raised by the
    /// engine when creating the transaction are returned as request errors.
    pub fn begin(
        database: &Rc<dyn NativeDatabase>,
        store_names: &[String],
        mode: TransactionMode,
        ledger: &Ledger,
    ) -> CoreResult<Self> {
        let existing = database.store_names();
        let missing: Vec<String> = store_names
            .iter()
            .filter(|name| !existing.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::MissingStores { names: missing });
        }

        let native = database.transaction(store_names, mode)?;
        let id = ledger.next_id();
        let (deferred, future) = Deferred::new();
        let completion = future.shared();
        let state = Rc::new(Cell::new(TransactionState::Pending));
        ledger.register(id, completion.clone());

        let settlement = Rc::new(Settlement {
            id,
            state: Rc::clone(&state),
            deferred,
            ledger: ledger.clone(),
        });
        Self::attach(native.as_ref(), &settlement, store_names);
        tracing::debug!(id, mode = %mode, stores = ?store_names, "transaction started");

        Ok(Self {
            inner: Rc::new(Inner {
                id,
                mode,
                store_names: store_names.to_vec(),
                native,
                state,
                completion,
            }),
        })
    }

    fn attach(native: &dyn NativeTransaction, settlement: &Rc<Settlement>, stores: &[String]) {
        let events = native.events();

        let on_complete = Rc::clone(settlement);
        let names = stores.to_vec();
        events.on_complete(move |()| {
            if on_complete.settle(TransactionState::Completed, Ok(Committed)) {
                tracing::debug!(id = on_complete.id, stores = ?names, "transaction completed");
            }
        });

        let on_error = Rc::clone(settlement);
        let names = stores.to_vec();
        events.on_error(move |error| {
            let message = describe(&error);
            if on_error.settle(TransactionState::Failed, Err(CoreError::failed(message.as_str()))) {
                tracing::warn!(id = on_error.id, stores = ?names, error = %message, "transaction failed");
            }
        });

        let on_abort = Rc::clone(settlement);
        let names = stores.to_vec();
        events.on_abort(move |error| {
            if on_abort.settle(TransactionState::Aborted, Err(CoreError::aborted(describe(&error)))) {
                tracing::debug!(id = on_abort.id, stores = ?names, "transaction aborted");
            }
        });
    }

    /// Monotonically increasing id, unique per ledger.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// Stores in scope.
    #[must_use]
    pub fn store_names(&self) -> &[String] {
        &self.inner.store_names
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.state.get()
    }

    /// Future that settles when the transaction does. Can be awaited any
    /// number of times.
    #[must_use]
    pub fn completion(&self) -> Completion {
        self.inner.completion.clone()
    }

    /// Opens a handle on one of the transaction's stores.
    ///
    /// # Errors
    ///
    /// Returns `MissingStores` if `name` is not in scope.
    pub fn store(&self, name: &str) -> CoreResult<ObjectStore> {
        if !self.inner.store_names.iter().any(|s| s == name) {
            return Err(CoreError::MissingStores {
                names: vec![name.to_string()],
            });
        }
        let native = self.inner.native.store(name)?;
        Ok(ObjectStore::new(self.clone(), name, native))
    }

    /// Aborts the transaction. Requests that have not settled reject, and so
    /// does the completion future.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has already finished.
    pub fn abort(&self) -> CoreResult<()> {
        self.inner.native.abort()?;
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("stores", &self.inner.store_names)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvbridge_engine::{
        EventLoop, MemoryFactory, NativeFactory, Outcome, StoreParams,
    };
    use serde_json::json;
    use std::cell::RefCell;

    fn open(event_loop: &EventLoop) -> Rc<dyn NativeDatabase> {
        let factory = MemoryFactory::new(event_loop.clone());
        let request = factory.open("app", 1).unwrap();
        request.on_upgrade_needed(|event| {
            event
                .database
                .create_store("items", StoreParams::key_path("id"))
                .unwrap();
        });
        let slot = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        request.on_success(move |outcome| {
            if let Outcome::Database(db) = outcome {
                *sink.borrow_mut() = Some(db);
            }
        });
        event_loop.run_until_idle();
        let db = slot.borrow_mut().take().unwrap();
        db
    }

    #[test]
    fn missing_store_creates_no_transaction() {
        let event_loop = EventLoop::new();
        let db = open(&event_loop);
        let ledger = Ledger::new();

        let err = Transaction::begin(
            &db,
            &["items".to_string(), "ghosts".to_string()],
            TransactionMode::ReadOnly,
            &ledger,
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::MissingStores {
                names: vec!["ghosts".to_string()]
            }
        );
        assert!(ledger.is_empty());
        assert_eq!(event_loop.pending(), 0);
    }

    #[test]
    fn commit_resolves_and_leaves_ledger() {
        let event_loop = EventLoop::new();
        let db = open(&event_loop);
        let ledger = Ledger::new();

        let txn = Transaction::begin(&db, &["items".to_string()], TransactionMode::ReadWrite, &ledger)
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(txn.state(), TransactionState::Pending);

        let result = event_loop.block_on(txn.completion()).unwrap();
        assert_eq!(result, Ok(Committed));
        assert_eq!(Committed.to_string(), "Transaction Completed");
        assert_eq!(txn.state(), TransactionState::Completed);
        assert!(ledger.is_empty());
    }

    #[test]
    fn abort_rejects_completion() {
        let event_loop = EventLoop::new();
        let db = open(&event_loop);
        let ledger = Ledger::new();

        let txn = Transaction::begin(&db, &["items".to_string()], TransactionMode::ReadWrite, &ledger)
            .unwrap();
        txn.abort().unwrap();
        let result = event_loop.block_on(txn.completion()).unwrap();
        assert!(result.unwrap_err().is_aborted());
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(ledger.is_empty());
        assert!(txn.abort().is_err());
    }

    #[test]
    fn request_error_fails_transaction() {
        let event_loop = EventLoop::new();
        let db = open(&event_loop);
        let ledger = Ledger::new();

        let txn = Transaction::begin(&db, &["items".to_string()], TransactionMode::ReadWrite, &ledger)
            .unwrap();
        let store = txn.store("items").unwrap();
        let _first = store.insert(json!({"id": 1}));
        let _second = store.insert(json!({"id": 1}));

        let result = event_loop.block_on(txn.completion()).unwrap();
        assert!(matches!(result, Err(CoreError::TransactionFailed { .. })));
        assert_eq!(txn.state(), TransactionState::Failed);
    }

    #[test]
    fn store_outside_scope_is_missing() {
        let event_loop = EventLoop::new();
        let db = open(&event_loop);
        let txn = Transaction::begin(&db, &["items".to_string()], TransactionMode::ReadOnly, &Ledger::new())
            .unwrap();
        assert!(matches!(
            txn.store("other"),
            Err(CoreError::MissingStores { .. })
        ));
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.mode(), TransactionMode::ReadOnly);
    }
}
