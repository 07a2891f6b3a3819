//! Schema descriptions passed in from JavaScript.
//!
//! ```javascript
//! [
//!   { version: 1, createStores: [{ name: "items", keyPath: "id" }] },
//!   { version: 2, createIndexes: [{ store: "items", name: "tag", keyPath: "tag" }] },
//! ]
//! ```

use kvbridge_core::{Config, CoreResult, UpgradeContext};
use kvbridge_engine::{IndexParams, KeyPath, StoreParams};
use serde::Deserialize;

/// One store to create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSchema {
    /// Store name.
    pub name: String,
    /// Key path; absent for out-of-line keys.
    #[serde(default)]
    pub key_path: Option<String>,
    /// Whether the store generates keys.
    #[serde(default)]
    pub auto_increment: bool,
}

/// One index to create on an existing or newly created store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Store the index belongs to.
    pub store: String,
    /// Index name.
    pub name: String,
    /// Key path read from each record.
    pub key_path: String,
    /// Reject duplicate index keys.
    #[serde(default)]
    pub unique: bool,
    /// Index each array element separately.
    #[serde(default)]
    pub multi_entry: bool,
}

/// The schema changes made when upgrading to `version`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStep {
    /// Version this step upgrades to.
    pub version: u64,
    /// Stores to create.
    #[serde(default)]
    pub create_stores: Vec<StoreSchema>,
    /// Indexes to create, after the stores.
    #[serde(default)]
    pub create_indexes: Vec<IndexSchema>,
    /// Stores to delete, before anything is created.
    #[serde(default)]
    pub delete_stores: Vec<String>,
}

impl UpgradeStep {
    fn apply(&self, ctx: &UpgradeContext) -> CoreResult<()> {
        for name in &self.delete_stores {
            ctx.delete_store(name)?;
        }
        for store in &self.create_stores {
            let params = StoreParams {
                key_path: store.key_path.clone().map(KeyPath::new),
                auto_increment: store.auto_increment,
            };
            ctx.create_store(&store.name, params)?;
        }
        for index in &self.create_indexes {
            let params = IndexParams {
                unique: index.unique,
                multi_entry: index.multi_entry,
            };
            ctx.store(&index.store)?.create_index(
                &index.name,
                KeyPath::new(index.key_path.clone()),
                params,
            )?;
        }
        Ok(())
    }
}

/// Builds a [`Config`] whose migrations replay `steps`.
pub fn config_from_steps(name: &str, steps: Vec<UpgradeStep>) -> Config {
    steps.into_iter().fold(Config::new(name), |config, step| {
        let version = step.version;
        config.upgrade(version, move |ctx| step.apply(ctx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_deserialize_from_camel_case() {
        let steps: Vec<UpgradeStep> = serde_json::from_value(serde_json::json!([
            { "version": 1, "createStores": [{ "name": "items", "keyPath": "id", "autoIncrement": true }] },
            { "version": 3, "createIndexes": [{ "store": "items", "name": "tag", "keyPath": "tag", "unique": true }] },
        ]))
        .unwrap();
        assert_eq!(steps[0].create_stores[0].key_path.as_deref(), Some("id"));
        assert!(steps[0].create_stores[0].auto_increment);
        assert!(steps[1].create_indexes[0].unique);
        assert!(!steps[1].create_indexes[0].multi_entry);

        let config = config_from_steps("notes", steps);
        assert_eq!(config.version(), 3);
        assert_eq!(config.migrations().versions(), vec![1, 3]);
    }
}
