//! In-memory reference engine.
//!
//! [`MemoryFactory`] implements the native contract entirely in memory and
//! delivers every event through an [`EventLoop`]. It is the engine used by
//! tests and by hosts that do not need persistence.
//!
//! # Example
//!
//! ```rust
//! use kvbridge_engine::{EventLoop, MemoryFactory, NativeFactory, Outcome};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let event_loop = EventLoop::new();
//! let factory = MemoryFactory::new(event_loop.clone());
//!
//! let request = factory.open("notes", 1).unwrap();
//! let opened = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&opened);
//! request.on_success(move |outcome| flag.set(matches!(outcome, Outcome::Database(_))));
//!
//! event_loop.run_until_idle();
//! assert!(opened.get());
//! assert_eq!(factory.version_of("notes"), Some(1));
//! ```

mod connection;
mod state;
mod store;
mod transaction;

pub use connection::MemoryDatabase;
pub use store::{MemoryCursor, MemoryIndex, MemoryStore};
pub use transaction::MemoryTransaction;

use crate::error::{NativeError, NativeResult};
use crate::event_loop::EventLoop;
use crate::native::{NativeFactory, TransactionMode};
use crate::request::{Outcome, Request, UpgradeNeeded, VersionChange};
use connection::ConnInner;
use parking_lot::RwLock;
use state::DatabaseState;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use transaction::{Snapshot, TxnInner, TxnState};

/// Behaviour switches for the in-memory engine.
#[derive(Debug, Clone)]
#[must_use]
pub struct MemoryConfig {
    /// Whether stores and indexes offer `get_all`/`get_all_keys`.
    ///
    /// When disabled, those calls return `None` and callers must fall back
    /// to cursors, like on engines without bulk reads.
    pub bulk_fetch: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { bulk_fetch: true }
    }
}

impl MemoryConfig {
    /// Enables or disables bulk reads.
    pub fn bulk_fetch(mut self, enabled: bool) -> Self {
        self.bulk_fetch = enabled;
        self
    }
}

/// An open or delete request waiting for other connections to close.
enum Waiting {
    Open {
        name: String,
        version: u64,
        request: Request,
    },
    Delete {
        name: String,
        request: Request,
    },
}

pub(crate) struct Engine {
    pub(crate) event_loop: EventLoop,
    pub(crate) config: MemoryConfig,
    pub(crate) storage: RwLock<BTreeMap<String, DatabaseState>>,
    pub(crate) connections: RefCell<Vec<Weak<ConnInner>>>,
    pub(crate) live: RefCell<Vec<Rc<TxnInner>>>,
    waiting: RefCell<Vec<Waiting>>,
    txn_ids: Cell<u64>,
}

impl Engine {
    pub(crate) fn next_txn_id(&self) -> u64 {
        let id = self.txn_ids.get() + 1;
        self.txn_ids.set(id);
        id
    }

    fn stored_version(&self, name: &str) -> u64 {
        self.storage.read().get(name).map_or(0, |db| db.version)
    }

    fn has_open_connections(&self, name: &str) -> bool {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|conn| conn.strong_count() > 0);
        connections
            .iter()
            .filter_map(Weak::upgrade)
            .any(|conn| conn.name == name && !conn.is_closed())
    }

    /// Returns true if an earlier live transaction conflicts with `txn`.
    pub(crate) fn is_blocked(&self, txn: &Rc<TxnInner>) -> bool {
        let live = self.live.borrow();
        live.iter()
            .take_while(|other| !Rc::ptr_eq(other, txn))
            .filter(|other| !other.is_finished() && other.overlaps(txn))
            .any(|other| other.mode.can_write() || txn.mode.can_write())
    }

    /// Drops a finished transaction and lets blocked ones try again.
    pub(crate) fn retire(&self, txn: &Rc<TxnInner>) {
        self.live.borrow_mut().retain(|t| !Rc::ptr_eq(t, txn));
        self.wake_waiting();
    }

    pub(crate) fn wake_waiting(&self) {
        let waiting: Vec<Rc<TxnInner>> = self
            .live
            .borrow()
            .iter()
            .filter(|txn| txn.state() == TxnState::Waiting)
            .cloned()
            .collect();
        for txn in waiting {
            txn.schedule_step();
        }
    }

    fn open(self: &Rc<Self>, name: String, version: u64, request: Request, first_attempt: bool) {
        let stored = self.stored_version(&name);
        if version < stored {
            request.fail(NativeError::version(format!(
                "The requested version ({version}) is less than the existing version ({stored})."
            )));
            return;
        }
        if version == stored {
            let conn = ConnInner::connect(self, &name, version);
            request.succeed(Outcome::Database(Rc::new(MemoryDatabase { inner: conn })));
            return;
        }
        if self.has_open_connections(&name) {
            if first_attempt {
                request.block(VersionChange {
                    old_version: stored,
                    new_version: version,
                });
            }
            self.waiting
                .borrow_mut()
                .push(Waiting::Open { name, version, request });
            return;
        }
        self.upgrade(&name, stored, version, request);
    }

    fn upgrade(self: &Rc<Self>, name: &str, old_version: u64, new_version: u64, request: Request) {
        tracing::debug!(database = name, old_version, new_version, "upgrade started");
        let previous = {
            let mut storage = self.storage.write();
            let previous = storage.get(name).cloned();
            storage.entry(name.to_string()).or_default().version = new_version;
            previous
        };

        let conn = ConnInner::connect(self, name, new_version);
        let txn = TxnInner::create(
            self,
            &conn,
            Vec::new(),
            TransactionMode::VersionChange,
            Some(Snapshot::Database(previous)),
        );
        conn.set_upgrade(&txn);

        let database = Rc::new(MemoryDatabase {
            inner: Rc::clone(&conn),
        });
        let on_open = request.clone();
        let opened = Rc::clone(&database);
        txn.set_on_finish(move |committed| {
            if committed {
                on_open.succeed(Outcome::Database(opened));
            } else {
                opened.inner.close();
                on_open.fail(NativeError::abort("The upgrade transaction was aborted."));
            }
        });

        request.upgrade_needed(UpgradeNeeded {
            change: VersionChange {
                old_version,
                new_version,
            },
            database,
            transaction: Rc::new(MemoryTransaction { inner: txn }),
        });
    }

    fn delete(self: &Rc<Self>, name: String, request: Request, first_attempt: bool) {
        if self.has_open_connections(&name) {
            if first_attempt {
                request.block(VersionChange {
                    old_version: self.stored_version(&name),
                    new_version: 0,
                });
            }
            self.waiting.borrow_mut().push(Waiting::Delete { name, request });
            return;
        }
        self.storage.write().remove(&name);
        tracing::debug!(database = %name, "database deleted");
        request.succeed(Outcome::Undefined);
    }

    pub(crate) fn retry_waiting(self: &Rc<Self>) {
        let waiting = std::mem::take(&mut *self.waiting.borrow_mut());
        for entry in waiting {
            match entry {
                Waiting::Open {
                    name,
                    version,
                    request,
                } => self.open(name, version, request, false),
                Waiting::Delete { name, request } => self.delete(name, request, false),
            }
        }
    }
}

/// Factory for in-memory databases.
///
/// Clones share the same databases.
#[derive(Clone)]
pub struct MemoryFactory {
    engine: Rc<Engine>,
}

impl MemoryFactory {
    /// Creates an empty engine that delivers events through `event_loop`.
    #[must_use]
    pub fn new(event_loop: EventLoop) -> Self {
        Self::with_config(event_loop, MemoryConfig::default())
    }

    /// Creates an empty engine with explicit configuration.
    #[must_use]
    pub fn with_config(event_loop: EventLoop, config: MemoryConfig) -> Self {
        Self {
            engine: Rc::new(Engine {
                event_loop,
                config,
                storage: RwLock::new(BTreeMap::new()),
                connections: RefCell::new(Vec::new()),
                live: RefCell::new(Vec::new()),
                waiting: RefCell::new(Vec::new()),
                txn_ids: Cell::new(0),
            }),
        }
    }

    /// The loop events are delivered through.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.engine.event_loop
    }

    /// Names of all databases, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.engine.storage.read().keys().cloned().collect()
    }

    /// Stored version of `name`, or `None` if it does not exist.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.engine.storage.read().get(name).map(|db| db.version)
    }

    /// Number of records in a store, or `None` if it does not exist.
    #[must_use]
    pub fn record_count(&self, database: &str, store: &str) -> Option<usize> {
        self.engine
            .storage
            .read()
            .get(database)
            .and_then(|db| db.stores.get(store))
            .map(|store| store.records.len())
    }

    /// Number of connections that are open and not closing.
    #[must_use]
    pub fn open_connections(&self, database: &str) -> usize {
        self.engine
            .connections
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|conn| conn.name == database && !conn.is_closed())
            .count()
    }
}

impl std::fmt::Debug for MemoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFactory")
            .field("databases", &self.database_names())
            .finish_non_exhaustive()
    }
}

impl NativeFactory for MemoryFactory {
    fn open(&self, name: &str, version: u64) -> NativeResult<Request> {
        if version == 0 {
            return Err(NativeError::type_error("The version provided must not be 0."));
        }
        let request = Request::new();
        let engine = Rc::clone(&self.engine);
        let name = name.to_string();
        let pending = request.clone();
        self.engine
            .event_loop
            .schedule(move || engine.open(name, version, pending, true));
        Ok(request)
    }

    fn delete_database(&self, name: &str) -> NativeResult<Request> {
        let request = Request::new();
        let engine = Rc::clone(&self.engine);
        let name = name.to_string();
        let pending = request.clone();
        self.engine
            .event_loop
            .schedule(move || engine.delete(name, pending, true));
        Ok(request)
    }
}

#[cfg(test)]
mod tests;
