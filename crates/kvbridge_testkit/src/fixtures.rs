//! Test fixtures and database helpers.
//!
//! Provides the schemas the tests share and a harness that owns the memory
//! engine, its event loop and a [`Database`] facade.

use kvbridge_core::{Config, Database};
use kvbridge_engine::{EventLoop, IndexParams, KeyPath, MemoryConfig, MemoryFactory, StoreParams};
use serde_json::{json, Value};
use std::future::Future;
use std::rc::Rc;

/// Database name used by [`notes_config`].
pub const NOTES_DB: &str = "notes";

/// Database name used by [`people_config`].
pub const PEOPLE_DB: &str = "people";

/// `notes` at version 1: one store, `items`, keyed by `id`.
pub fn notes_config() -> Config {
    Config::new(NOTES_DB).upgrade(1, |ctx| {
        ctx.create_store("items", StoreParams::key_path("id"))?;
        Ok(())
    })
}

/// `people` at version 1: store `people` keyed by `id`, with indexes
/// `age`, `email` (unique) and `tags` (multi-entry), plus an out-of-line
/// store `settings`.
pub fn people_config() -> Config {
    Config::new(PEOPLE_DB).upgrade(1, |ctx| {
        let people = ctx.create_store("people", StoreParams::key_path("id").auto_increment())?;
        people.create_index("age", KeyPath::new("age"), IndexParams::default())?;
        people.create_index("email", KeyPath::new("email"), IndexParams::unique())?;
        people.create_index("tags", KeyPath::new("tags"), IndexParams::multi_entry())?;
        ctx.create_store("settings", StoreParams::default())?;
        Ok(())
    })
}

/// A database over a fresh memory engine.
pub struct TestDatabase {
    /// The event loop the engine delivers events through.
    pub event_loop: EventLoop,
    /// The engine, for inspecting stored state directly.
    pub factory: MemoryFactory,
    /// The facade under test.
    pub db: Database,
}

impl TestDatabase {
    /// Creates a harness with the default engine configuration.
    pub fn memory(config: Config) -> Self {
        Self::with_engine(config, MemoryConfig::default())
    }

    /// Creates a harness with an explicit engine configuration.
    pub fn with_engine(config: Config, engine: MemoryConfig) -> Self {
        let event_loop = EventLoop::new();
        let factory = MemoryFactory::with_config(event_loop.clone(), engine);
        let db = Database::new(Rc::new(factory.clone()), config);
        Self {
            event_loop,
            factory,
            db,
        }
    }

    /// A second facade over the same engine, e.g. to reopen at a higher
    /// version.
    pub fn facade(&self, config: Config) -> Database {
        Database::new(Rc::new(self.factory.clone()), config)
    }

    /// Drives `future` to completion on the harness's event loop.
    ///
    /// # Panics
    ///
    /// Panics if the future can never complete.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.event_loop
            .block_on(future)
            .expect("event loop stalled before the future completed")
    }

    /// Runs every queued engine event.
    pub fn settle(&self) -> usize {
        self.event_loop.run_until_idle()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Sample records for the `people` schema.
pub fn sample_people() -> Vec<Value> {
    vec![
        json!({"name": "Ada", "age": 36, "email": "ada@example.com", "tags": ["math", "code"]}),
        json!({"name": "Grace", "age": 45, "email": "grace@example.com", "tags": ["code", "navy"]}),
        json!({"name": "Alan", "age": 41, "email": "alan@example.com", "tags": ["math"]}),
        json!({"name": "Edsger", "age": 36, "email": "edsger@example.com", "tags": []}),
    ]
}

/// Notes `{id, text}` with ids `1..=count`.
pub fn sample_notes(count: u32) -> Vec<Value> {
    (1..=count)
        .map(|id| json!({"id": id, "text": format!("note {id}")}))
        .collect()
}
