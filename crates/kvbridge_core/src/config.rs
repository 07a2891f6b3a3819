//! Database configuration.

use crate::error::CoreResult;
use crate::migration::{Migration, MigrationVersion, UpgradeContext, UpgradeRegistry};
use std::rc::Rc;

/// Which database to open, at which version, and how to upgrade it.
#[derive(Debug, Clone)]
pub struct Config {
    name: String,
    version: MigrationVersion,
    migrations: UpgradeRegistry,
}

impl Config {
    /// Configuration for database `name` at version 1 with no migrations.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            migrations: UpgradeRegistry::new(),
        }
    }

    /// Sets the version to open.
    ///
    /// Registering a migration afterwards still raises the version to that
    /// migration's.
    #[must_use]
    pub fn at_version(mut self, version: MigrationVersion) -> Self {
        self.version = version;
        self
    }

    /// Registers a migration to `version` and raises the target version to
    /// at least `version`.
    #[must_use]
    pub fn upgrade<F>(self, version: MigrationVersion, migration: F) -> Self
    where
        F: Fn(&UpgradeContext) -> CoreResult<()> + 'static,
    {
        self.upgrade_with(version, Rc::new(migration))
    }

    /// Like [`upgrade`](Self::upgrade), for migrations that are not closures.
    #[must_use]
    pub fn upgrade_with(mut self, version: MigrationVersion, migration: Rc<dyn Migration>) -> Self {
        self.migrations.register(version, migration);
        self.version = self.version.max(version);
        self
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version that will be opened.
    #[must_use]
    pub fn version(&self) -> MigrationVersion {
        self.version
    }

    /// Registered migrations.
    #[must_use]
    pub fn migrations(&self) -> &UpgradeRegistry {
        &self.migrations
    }
}
