//! # kvbridge Core
//!
//! Future-based access to callback-driven transactional key-value engines.
//!
//! This crate provides:
//! - A bridge from event-firing native requests to futures
//! - A memoized connection with ordered upgrade migrations
//! - Transactions whose completion is a shared future
//! - Store handles for CRUD, index lookups and cursor iteration
//! - A ledger of in-flight work for `flush`
//!
//! Everything is single-threaded: handles are `Rc`-based and the futures
//! are `!Send`. Operations issue their native requests as soon as they are
//! called, so a batch of calls is in flight together.
//!
//! ## Example
//!
//! ```rust
//! use kvbridge_core::{Config, Database};
//! use kvbridge_engine::{EventLoop, MemoryFactory, StoreParams};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let event_loop = EventLoop::new();
//! let db = Database::new(
//!     Rc::new(MemoryFactory::new(event_loop.clone())),
//!     Config::new("notes").upgrade(1, |ctx| {
//!         ctx.create_store("items", StoreParams::key_path("id"))?;
//!         Ok(())
//!     }),
//! );
//!
//! let keys = db.open_store("items", |items| async move {
//!     items.insert(vec![json!({"id": 1}), json!({"id": 2})]).await?;
//!     items.get_all_keys().await
//! });
//! let keys = event_loop.block_on(keys).unwrap().unwrap();
//! assert_eq!(keys.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod query;
pub mod store;
pub mod transaction;

pub use bridge::{CoreFuture, Deferred, OPERATION_PENDING};
pub use config::Config;
pub use connection::ConnectionManager;
pub use cursor::Progressive;
pub use database::{Database, DatabaseInfo, StoreInfo};
pub use error::{CoreError, CoreResult};
pub use ledger::{Ledger, TransactionOutcome};
pub use migration::{Migration, MigrationVersion, UpgradeContext, UpgradeRegistry};
pub use query::{Direction, Query, QueryBuilder};
pub use store::{ObjectStore, Records};
pub use transaction::{Committed, Completion, Transaction, TransactionState};

pub use kvbridge_engine::{Key, KeyPath, TransactionMode};
