//! Schema upgrades.
//!
//! Migrations are keyed by the database version they upgrade *to*. When an
//! open moves the database from `old` to `new`, every migration registered
//! for a version in `(old, new]` runs once, in ascending order, inside the
//! engine's version-change transaction.
//!
//! ## Usage
//!
//! ```ignore
//! use kvbridge_core::{Config, UpgradeContext};
//! use kvbridge_engine::StoreParams;
//!
//! let config = Config::new("notes").upgrade(1, |ctx: &UpgradeContext| {
//!     ctx.create_store("items", StoreParams::key_path("id"))?;
//!     Ok(())
//! });
//! ```
//!
//! A migration that returns an error aborts the version-change
//! transaction: the schema and the stored version stay as they were.

use crate::error::{CoreError, CoreResult};
use kvbridge_engine::{
    NativeDatabase, NativeStore, NativeTransaction, StoreParams, UpgradeNeeded, VersionChange,
};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::rc::Rc;

/// Version number a migration upgrades to.
pub type MigrationVersion = u64;

/// What a migration gets to work with.
pub struct UpgradeContext {
    change: VersionChange,
    database: Rc<dyn NativeDatabase>,
    transaction: Rc<dyn NativeTransaction>,
}

impl UpgradeContext {
    pub(crate) fn new(event: &UpgradeNeeded) -> Self {
        Self {
            change: event.change,
            database: Rc::clone(&event.database),
            transaction: Rc::clone(&event.transaction),
        }
    }

    /// Version the database had before this open (0 if it did not exist).
    #[must_use]
    pub fn old_version(&self) -> u64 {
        self.change.old_version
    }

    /// Version being opened.
    #[must_use]
    pub fn new_version(&self) -> u64 {
        self.change.new_version
    }

    /// The connection being upgraded.
    #[must_use]
    pub fn database(&self) -> &Rc<dyn NativeDatabase> {
        &self.database
    }

    /// The version-change transaction. Writes made through it are part of
    /// the upgrade.
    #[must_use]
    pub fn transaction(&self) -> &Rc<dyn NativeTransaction> {
        &self.transaction
    }

    /// Current store names, including stores created by earlier migrations.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.database.store_names()
    }

    /// Creates a store.
    ///
    /// # Errors
    ///
    /// Fails if the store already exists or the key options are invalid.
    pub fn create_store(&self, name: &str, params: StoreParams) -> CoreResult<Rc<dyn NativeStore>> {
        Ok(self.database.create_store(name, params)?)
    }

    /// Opens an existing store inside the upgrade, e.g. to add an index or
    /// rewrite records.
    ///
    /// # Errors
    ///
    /// Fails if the store does not exist.
    pub fn store(&self, name: &str) -> CoreResult<Rc<dyn NativeStore>> {
        Ok(self.transaction.store(name)?)
    }

    /// Deletes a store and its records.
    ///
    /// # Errors
    ///
    /// Fails if the store does not exist.
    pub fn delete_store(&self, name: &str) -> CoreResult<()> {
        Ok(self.database.delete_store(name)?)
    }
}

impl fmt::Debug for UpgradeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeContext")
            .field("old_version", &self.change.old_version)
            .field("new_version", &self.change.new_version)
            .finish()
    }
}

/// A schema upgrade step.
pub trait Migration {
    /// Applies the step.
    fn up(&self, ctx: &UpgradeContext) -> CoreResult<()>;
}

impl<F> Migration for F
where
    F: Fn(&UpgradeContext) -> CoreResult<()>,
{
    fn up(&self, ctx: &UpgradeContext) -> CoreResult<()> {
        self(ctx)
    }
}

/// Registered migrations, keyed by target version.
///
/// Clones share the registered migrations.
#[derive(Clone, Default)]
pub struct UpgradeRegistry {
    migrations: BTreeMap<MigrationVersion, Rc<dyn Migration>>,
}

impl UpgradeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `migration` for `version`, replacing any earlier one.
    pub fn register(&mut self, version: MigrationVersion, migration: Rc<dyn Migration>) {
        if self.migrations.insert(version, migration).is_some() {
            tracing::debug!(version, "replaced upgrade migration");
        }
    }

    /// Highest registered version.
    #[must_use]
    pub fn latest(&self) -> Option<MigrationVersion> {
        self.migrations.keys().next_back().copied()
    }

    /// Registered versions, ascending.
    #[must_use]
    pub fn versions(&self) -> Vec<MigrationVersion> {
        self.migrations.keys().copied().collect()
    }

    /// Number of registered migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Versions that an upgrade from `old` to `new` runs, ascending.
    #[must_use]
    pub fn pending(&self, old: MigrationVersion, new: MigrationVersion) -> Vec<MigrationVersion> {
        if new <= old {
            return Vec::new();
        }
        self.migrations
            .range((Bound::Excluded(old), Bound::Included(new)))
            .map(|(version, _)| *version)
            .collect()
    }

    /// Runs the migrations an upgrade needs, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `MigrationFailed` naming the version that failed.
    pub fn run(&self, ctx: &UpgradeContext) -> CoreResult<Vec<MigrationVersion>> {
        let old = ctx.old_version();
        let new = ctx.new_version();
        if new <= old {
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        for (version, migration) in self
            .migrations
            .range((Bound::Excluded(old), Bound::Included(new)))
        {
            tracing::debug!("Running upgrade : {} from {}", version, old);
            migration
                .up(ctx)
                .map_err(|e| CoreError::MigrationFailed {
                    version: *version,
                    message: e.to_string(),
                })?;
            applied.push(*version);
        }
        Ok(applied)
    }
}

impl fmt::Debug for UpgradeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeRegistry")
            .field("versions", &self.versions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recording(log: &Rc<RefCell<Vec<u64>>>, version: u64) -> Rc<dyn Migration> {
        let log = Rc::clone(log);
        Rc::new(move |_: &UpgradeContext| -> CoreResult<()> {
            log.borrow_mut().push(version);
            Ok(())
        })
    }

    #[test]
    fn pending_is_half_open_range() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = UpgradeRegistry::new();
        for version in [1, 2, 3, 5] {
            registry.register(version, recording(&log, version));
        }

        assert_eq!(registry.pending(1, 3), vec![2, 3]);
        assert_eq!(registry.pending(0, 5), vec![1, 2, 3, 5]);
        assert_eq!(registry.pending(3, 4), Vec::<u64>::new());
        assert_eq!(registry.pending(5, 5), Vec::<u64>::new());
        assert_eq!(registry.pending(5, 1), Vec::<u64>::new());
        assert_eq!(registry.latest(), Some(5));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn register_replaces_same_version() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = UpgradeRegistry::new();
        registry.register(2, recording(&log, 20));
        registry.register(2, recording(&log, 21));
        assert_eq!(registry.versions(), vec![2]);
    }

    #[test]
    fn empty_registry() {
        let registry = UpgradeRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.latest(), None);
    }
}
