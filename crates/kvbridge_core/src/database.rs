//! The public entry point.

use crate::bridge::CoreFuture;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::CoreResult;
use crate::ledger::{Ledger, TransactionOutcome};
use crate::query::QueryBuilder;
use crate::store::ObjectStore;
use crate::transaction::Transaction;
use futures::future::{try_join, LocalBoxFuture};
use futures::FutureExt;
use kvbridge_engine::{NativeDatabase, NativeFactory, TransactionMode};
use serde::Serialize;
use std::future::Future;
use std::rc::Rc;

/// Schema of one store, as reported by [`Database::database_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    /// Store name.
    pub name: String,
    /// Key path, if records carry their key.
    pub key_path: Option<String>,
    /// Whether the store generates keys.
    pub auto_increment: bool,
    /// Index names.
    pub indexes: Vec<String>,
}

/// Name, version and schema of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Stored version.
    pub version: u64,
    /// Stores, sorted by name.
    pub stores: Vec<StoreInfo>,
}

/// A database, opened on first use.
///
/// Every operation runs inside its own transaction over the stores it
/// names. Results resolve only after that transaction has committed, so a
/// resolved value is durable as far as the engine is concerned.
///
/// # Example
///
/// ```rust
/// use kvbridge_core::{Config, Database};
/// use kvbridge_engine::{EventLoop, MemoryFactory, StoreParams};
/// use serde_json::json;
/// use std::rc::Rc;
///
/// let event_loop = EventLoop::new();
/// let factory = Rc::new(MemoryFactory::new(event_loop.clone()));
/// let config = Config::new("notes").upgrade(1, |ctx| {
///     ctx.create_store("items", StoreParams::key_path("id"))?;
///     Ok(())
/// });
/// let db = Database::new(factory, config);
///
/// let count = db.open_store("items", |items| async move {
///     items.insert(json!({"id": 1, "text": "a"})).await?;
///     items.count().await
/// });
/// assert_eq!(event_loop.block_on(count).unwrap(), Ok(1));
/// ```
#[derive(Clone)]
pub struct Database {
    connection: ConnectionManager,
    ledger: Ledger,
}

impl Database {
    /// Creates a facade over `factory`. Nothing is opened yet.
    #[must_use]
    pub fn new(factory: Rc<dyn NativeFactory>, config: Config) -> Self {
        Self {
            connection: ConnectionManager::new(factory, config),
            ledger: Ledger::new(),
        }
    }

    /// The connection manager.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Transactions in flight.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Opens the database now rather than on first use.
    pub fn open(&self) -> CoreFuture<Rc<dyn NativeDatabase>> {
        self.connection.open()
    }

    /// Begins a transaction over `store_names`.
    pub fn begin(&self, store_names: &[&str], mode: TransactionMode) -> CoreFuture<Transaction> {
        let names = owned(store_names);
        let opened = self.connection.open();
        let ledger = self.ledger.clone();
        async move {
            let database = opened.await?;
            Transaction::begin(&database, &names, mode, &ledger)
        }
        .boxed_local()
    }

    /// Runs `f` against one store in a read-write transaction.
    ///
    /// Resolves with `f`'s value once the transaction has committed.
    pub fn open_store<F, Fut, T>(&self, name: &str, f: F) -> CoreFuture<T>
    where
        F: FnOnce(ObjectStore) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        self.open_store_with_mode(name, TransactionMode::ReadWrite, f)
    }

    /// Runs `f` against one store in a transaction of the given mode.
    pub fn open_store_with_mode<F, Fut, T>(
        &self,
        name: &str,
        mode: TransactionMode,
        f: F,
    ) -> CoreFuture<T>
    where
        F: FnOnce(ObjectStore) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        self.run(Some(vec![name.to_string()]), mode, move |mut stores| {
            // `run` hands back exactly one handle per requested name.
            let store = stores.remove(0);
            f(store)
        })
    }

    /// Runs `f` against several stores in one read-write transaction.
    ///
    /// Handles are passed in the order the names were given.
    pub fn open_stores<F, Fut, T>(&self, names: &[&str], f: F) -> CoreFuture<T>
    where
        F: FnOnce(Vec<ObjectStore>) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        self.open_stores_with_mode(names, TransactionMode::ReadWrite, f)
    }

    /// Runs `f` against several stores in one transaction of the given mode.
    pub fn open_stores_with_mode<F, Fut, T>(
        &self,
        names: &[&str],
        mode: TransactionMode,
        f: F,
    ) -> CoreFuture<T>
    where
        F: FnOnce(Vec<ObjectStore>) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        self.run(Some(owned(names)), mode, f)
    }

    /// Runs `f` against every store in one read-write transaction.
    ///
    /// With an empty schema `f` gets no handles and no transaction is begun.
    pub fn open_all_stores<F, Fut, T>(&self, f: F) -> CoreFuture<T>
    where
        F: FnOnce(Vec<ObjectStore>) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        self.open_all_stores_with_mode(TransactionMode::ReadWrite, f)
    }

    /// Runs `f` against every store in one transaction of the given mode.
    pub fn open_all_stores_with_mode<F, Fut, T>(&self, mode: TransactionMode, f: F) -> CoreFuture<T>
    where
        F: FnOnce(Vec<ObjectStore>) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        self.run(None, mode, f)
    }

    /// `None` names every store in the schema.
    fn run<F, Fut, T>(&self, names: Option<Vec<String>>, mode: TransactionMode, f: F) -> CoreFuture<T>
    where
        F: FnOnce(Vec<ObjectStore>) -> Fut + 'static,
        Fut: Future<Output = CoreResult<T>> + 'static,
        T: 'static,
    {
        let opened = self.connection.open();
        let ledger = self.ledger.clone();
        async move {
            let database = opened.await?;
            let names = names.unwrap_or_else(|| database.store_names());
            if names.is_empty() {
                return f(Vec::new()).await;
            }

            let transaction = Transaction::begin(&database, &names, mode, &ledger)?;
            let stores = names
                .iter()
                .map(|name| transaction.store(name))
                .collect::<CoreResult<Vec<_>>>()?;
            let (value, _) = try_join(f(stores), transaction.completion()).await?;
            Ok(value)
        }
        .boxed_local()
    }

    /// Waits for every transaction in flight now to settle.
    ///
    /// Never fails; each transaction's outcome is reported in creation
    /// order.
    pub fn flush(&self) -> LocalBoxFuture<'static, Vec<TransactionOutcome>> {
        self.ledger.flush()
    }

    /// Reports the database name, version and schema.
    pub fn database_info(&self) -> CoreFuture<DatabaseInfo> {
        let opened = self.connection.open();
        let ledger = self.ledger.clone();
        async move {
            let database = opened.await?;
            let names = database.store_names();
            let mut info = DatabaseInfo {
                name: database.name(),
                version: database.version(),
                stores: Vec::with_capacity(names.len()),
            };
            if names.is_empty() {
                return Ok(info);
            }

            let transaction = Transaction::begin(&database, &names, TransactionMode::ReadOnly, &ledger)?;
            for name in &names {
                let store = transaction.store(name)?;
                info.stores.push(StoreInfo {
                    name: name.clone(),
                    key_path: store.key_path().map(|path| path.as_str().to_string()),
                    auto_increment: store.auto_increment(),
                    indexes: store.index_names(),
                });
            }
            transaction.completion().await?;
            Ok(info)
        }
        .boxed_local()
    }

    /// Closes the connection. The next operation reopens it.
    pub fn close_database(&self) -> CoreFuture<()> {
        self.connection.close()
    }

    /// Closes the connection and deletes the database.
    pub fn delete_database(&self) -> CoreFuture<()> {
        self.connection.delete_database()
    }

    /// Closes the connection and targets another database (or version).
    pub fn switch_database(&self, config: Config) -> CoreFuture<()> {
        self.connection.switch_database(config)
    }

    /// A fresh query builder.
    #[must_use]
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &self.connection)
            .field("ledger", &self.ledger)
            .finish()
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}
