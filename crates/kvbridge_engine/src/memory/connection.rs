//! Connections of the in-memory engine.

use super::state::StoreState;
use super::store::MemoryStore;
use super::transaction::{MemoryTransaction, TxnInner};
use super::Engine;
use crate::error::{NativeError, NativeResult};
use crate::native::{NativeDatabase, NativeStore, NativeTransaction, StoreParams, TransactionMode};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub(crate) struct ConnInner {
    pub(crate) engine: Rc<Engine>,
    pub(crate) name: String,
    pub(crate) version: Cell<u64>,
    closed: Cell<bool>,
    upgrade: RefCell<Weak<TxnInner>>,
}

impl ConnInner {
    /// Opens a connection and registers it with the engine.
    pub(crate) fn connect(engine: &Rc<Engine>, name: &str, version: u64) -> Rc<Self> {
        let conn = Rc::new(Self {
            engine: Rc::clone(engine),
            name: name.to_string(),
            version: Cell::new(version),
            closed: Cell::new(false),
            upgrade: RefCell::new(Weak::new()),
        });
        engine.connections.borrow_mut().push(Rc::downgrade(&conn));
        conn
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn set_upgrade(&self, txn: &Rc<TxnInner>) {
        *self.upgrade.borrow_mut() = Rc::downgrade(txn);
    }

    /// The version-change transaction, while it is still running.
    fn running_upgrade(&self) -> Option<Rc<TxnInner>> {
        self.upgrade.borrow().upgrade().filter(|txn| !txn.is_finished())
    }

    pub(crate) fn current_store_names(&self) -> Vec<String> {
        let storage = self.engine.storage.read();
        storage
            .get(&self.name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_store(&self, name: &str) -> bool {
        let storage = self.engine.storage.read();
        storage
            .get(&self.name)
            .is_some_and(|db| db.stores.contains_key(name))
    }

    pub(crate) fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        tracing::trace!(database = %self.name, "connection closed");
        let engine = Rc::clone(&self.engine);
        self.engine.event_loop.schedule(move || engine.retry_waiting());
    }
}

/// Handle to an in-memory connection.
#[derive(Clone)]
pub struct MemoryDatabase {
    pub(crate) inner: Rc<ConnInner>,
}

impl MemoryDatabase {
    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl NativeDatabase for MemoryDatabase {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn version(&self) -> u64 {
        self.inner.version.get()
    }

    fn store_names(&self) -> Vec<String> {
        self.inner.current_store_names()
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> NativeResult<Rc<dyn NativeTransaction>> {
        if self.inner.is_closed() {
            return Err(NativeError::invalid_state(
                "The database connection is closing.",
            ));
        }
        if self.inner.running_upgrade().is_some() {
            return Err(NativeError::invalid_state(
                "A version change transaction is running.",
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(NativeError::invalid_access(
                "Version change transactions are created by the engine.",
            ));
        }
        if stores.is_empty() {
            return Err(NativeError::invalid_access(
                "The scope of the transaction is empty.",
            ));
        }

        let mut scope = stores.to_vec();
        scope.sort();
        scope.dedup();
        if let Some(missing) = scope.iter().find(|name| !self.inner.has_store(name)) {
            return Err(NativeError::not_found(format!(
                "One of the specified object stores was not found: '{missing}'."
            )));
        }

        let txn = TxnInner::create(&self.inner.engine, &self.inner, scope, mode, None);
        Ok(Rc::new(MemoryTransaction { inner: txn }))
    }

    fn create_store(&self, name: &str, params: StoreParams) -> NativeResult<Rc<dyn NativeStore>> {
        let txn = self.inner.running_upgrade().ok_or_else(|| {
            NativeError::invalid_state("A version change transaction is not running.")
        })?;
        {
            let mut storage = self.inner.engine.storage.write();
            let db = storage.entry(self.inner.name.clone()).or_default();
            if db.stores.contains_key(name) {
                return Err(NativeError::constraint(format!(
                    "An object store named '{name}' already exists."
                )));
            }
            db.stores.insert(name.to_string(), StoreState::new(params));
        }
        tracing::debug!(database = %self.inner.name, store = name, "store created");
        Ok(Rc::new(MemoryStore::new(&txn, name)))
    }

    fn delete_store(&self, name: &str) -> NativeResult<()> {
        if self.inner.running_upgrade().is_none() {
            return Err(NativeError::invalid_state(
                "A version change transaction is not running.",
            ));
        }
        let mut storage = self.inner.engine.storage.write();
        let removed = storage
            .get_mut(&self.inner.name)
            .and_then(|db| db.stores.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(NativeError::not_found(format!(
                "The object store '{name}' was not found."
            ))),
        }
    }

    fn close(&self) {
        self.inner.close();
    }
}
