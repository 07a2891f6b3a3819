//! Database WASM bindings.
//!
//! The JavaScript-facing API: a `Database` whose methods return promises.
//! Each call runs in its own transaction, like the single-store operations
//! of the Rust facade.

use crate::backend::BrowserFactory;
use crate::convert::{key_to_js, record_to_js};
use crate::error::{WasmError, WasmResult};
use crate::schema::{config_from_steps, UpgradeStep};
use futures::StreamExt;
use js_sys::{Function, Promise};
use kvbridge_core::{
    CoreError, CoreResult, Database as CoreDatabase, Direction, Key, Query, QueryBuilder,
    Records, TransactionMode,
};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

/// A query as written in JavaScript.
///
/// ```javascript
/// { index: "age", between: [30, 40, false, true], direction: "descending" }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsQuery {
    index: Option<String>,
    eq: Option<Value>,
    lt: Option<Value>,
    lte: Option<Value>,
    gt: Option<Value>,
    gte: Option<Value>,
    between: Option<(Value, Value, bool, bool)>,
    direction: Option<Direction>,
}

fn key(value: &Value) -> WasmResult<Key> {
    Key::from_value(value)
        .ok_or_else(|| WasmError::InvalidInput(format!("{} is not a valid key", value)))
}

fn js_key(value: JsValue) -> WasmResult<Key> {
    let value: Value = serde_wasm_bindgen::from_value(value)?;
    key(&value)
}

/// A JS array is a batch; anything else is a single record.
fn js_records(value: JsValue) -> WasmResult<Records> {
    Ok(match serde_wasm_bindgen::from_value(value)? {
        Value::Array(records) => Records::Many(records),
        record => Records::One(record),
    })
}

impl JsQuery {
    fn build(&self) -> WasmResult<Query> {
        let mut builder = QueryBuilder::new();
        if let Some(index) = &self.index {
            builder.use_index(index.as_str());
        }
        if let Some(value) = &self.eq {
            builder.eq(key(value)?);
        }
        if let Some(value) = &self.lt {
            builder.lt(key(value)?);
        }
        if let Some(value) = &self.lte {
            builder.lte(key(value)?);
        }
        if let Some(value) = &self.gt {
            builder.gt(key(value)?);
        }
        if let Some(value) = &self.gte {
            builder.gte(key(value)?);
        }
        if let Some((low, high, exclude_low, exclude_high)) = &self.between {
            builder.between(key(low)?, key(high)?, *exclude_low, *exclude_high);
        }
        match self.direction {
            Some(Direction::AscendingUnique) => builder.ascending(true),
            Some(Direction::Descending) => builder.descending(false),
            Some(Direction::DescendingUnique) => builder.descending(true),
            Some(Direction::Ascending) | None => builder.ascending(false),
        };
        Ok(builder.build()?)
    }
}

/// Settles a promise with the JSON form of the future's output.
fn promise<F>(future: F) -> Promise
where
    F: Future<Output = CoreResult<Value>> + 'static,
{
    future_to_promise(async move {
        let value = future.await.map_err(WasmError::from)?;
        record_to_js(&value).map_err(|e| WasmError::Conversion(e.to_string()).into())
    })
}

fn keys_value(keys: Vec<Key>) -> Value {
    Value::Array(keys.iter().map(Key::to_value).collect())
}

/// A kvbridge database backed by IndexedDB.
///
/// ## Example
///
/// ```javascript
/// const db = new Database("notes", [
///     { version: 1, createStores: [{ name: "items", keyPath: "id" }] },
/// ]);
///
/// await db.insert("items", [{ id: 1, text: "a" }, { id: 2, text: "b" }]);
/// const note = await db.find("items", 1);
/// const recent = await db.each("items", { gte: 2, direction: "descending" });
/// await db.close();
/// ```
#[wasm_bindgen]
pub struct Database {
    inner: CoreDatabase,
}

#[wasm_bindgen]
impl Database {
    /// Creates a database handle. Nothing is opened until the first call.
    ///
    /// # Arguments
    ///
    /// * `name` - The IndexedDB database name
    /// * `upgrades` - Upgrade steps, one per version
    #[wasm_bindgen(constructor)]
    pub fn new(name: &str, upgrades: JsValue) -> Result<Database, JsValue> {
        let steps: Vec<UpgradeStep> = if upgrades.is_undefined() || upgrades.is_null() {
            Vec::new()
        } else {
            serde_wasm_bindgen::from_value(upgrades).map_err(WasmError::from)?
        };
        let factory = BrowserFactory::from_global()?;
        Ok(Database {
            inner: CoreDatabase::new(Rc::new(factory), config_from_steps(name, steps)),
        })
    }

    /// Whether IndexedDB is reachable from this global.
    #[wasm_bindgen(js_name = isAvailable)]
    pub fn is_available() -> bool {
        BrowserFactory::is_available()
    }

    /// Adds one record or an array of records. Resolves with the keys.
    pub fn insert(&self, store: &str, records: JsValue) -> Result<Promise, JsValue> {
        let records = js_records(records)?;
        Ok(promise(self.inner.open_store(store, move |items| async move {
            items.insert(records).await.map(keys_value)
        })))
    }

    /// Adds or replaces one record or an array of records.
    pub fn upsert(&self, store: &str, records: JsValue) -> Result<Promise, JsValue> {
        let records = js_records(records)?;
        Ok(promise(self.inner.open_store(store, move |items| async move {
            items.upsert(records).await.map(keys_value)
        })))
    }

    /// Fetches a record; rejects if the key is absent.
    pub fn find(&self, store: &str, key: JsValue) -> Result<Promise, JsValue> {
        let key = js_key(key)?;
        Ok(promise(self.inner.open_store(store, move |items| items.find(key))))
    }

    /// Fetches the first record whose `index` key equals `key`, or `null`.
    #[wasm_bindgen(js_name = findBy)]
    pub fn find_by(&self, store: &str, index: String, key: JsValue) -> Result<Promise, JsValue> {
        let key = js_key(key)?;
        Ok(promise(self.inner.open_store(store, move |items| async move {
            Ok(items.find_by(&index, key).await?.unwrap_or(Value::Null))
        })))
    }

    /// Every record, in key order.
    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, store: &str) -> Promise {
        promise(self.inner.open_store_with_mode(store, TransactionMode::ReadOnly, |items| async move {
            items.get_all().await.map(Value::Array)
        }))
    }

    /// Every primary key, in order.
    #[wasm_bindgen(js_name = getAllKeys)]
    pub fn get_all_keys(&self, store: &str) -> Promise {
        promise(self.inner.open_store_with_mode(store, TransactionMode::ReadOnly, |items| async move {
            items.get_all_keys().await.map(keys_value)
        }))
    }

    /// Number of records, optionally restricted by a query.
    pub fn count(&self, store: &str, query: JsValue) -> Result<Promise, JsValue> {
        let query = parse_query(query)?;
        Ok(promise(self.inner.open_store_with_mode(
            store,
            TransactionMode::ReadOnly,
            move |items| async move {
                let count = match &query {
                    Some(query) => items.count_by(query).await?,
                    None => items.count().await?,
                };
                Ok(Value::from(count))
            },
        )))
    }

    /// Records matching `query`, in query order.
    ///
    /// `onItem`, when given, is called with each record as the cursor
    /// reaches it, before the promise resolves.
    pub fn each(&self, store: &str, query: JsValue, on_item: Option<Function>) -> Result<Promise, JsValue> {
        let query = parse_query(query)?;
        Ok(promise(self.inner.open_store_with_mode(
            store,
            TransactionMode::ReadOnly,
            move |items| async move {
                let (result, mut notifications) = items.each(query.as_ref()).into_parts();
                let notify = async move {
                    while let Some(record) = notifications.next().await {
                        let Some(callback) = &on_item else { continue };
                        let Ok(record) = record_to_js(&record) else { continue };
                        if let Err(e) = callback.call1(&JsValue::NULL, &record) {
                            tracing::warn!("onItem threw: {:?}", e);
                        }
                    }
                };
                let (records, ()) = futures::join!(result, notify);
                records.map(Value::Array)
            },
        )))
    }

    /// Deletes the record with `key`, if any.
    pub fn delete(&self, store: &str, key: JsValue) -> Result<Promise, JsValue> {
        let key = js_key(key)?;
        Ok(promise(self.inner.open_store(store, move |items| async move {
            items.delete(key).await.map(|()| Value::Null)
        })))
    }

    /// Deletes every record in the store.
    pub fn clear(&self, store: &str) -> Promise {
        promise(self.inner.open_store(store, |items| async move {
            items.clear().await.map(|()| Value::Null)
        }))
    }

    /// Name, version and stores of the database.
    pub fn info(&self) -> Promise {
        let info = self.inner.database_info();
        promise(async move {
            let info = info.await?;
            serde_json::to_value(&info).map_err(|e| CoreError::request(e.to_string()))
        })
    }

    /// Resolves once every transaction started so far has settled.
    pub fn flush(&self) -> Promise {
        let flush = self.inner.flush();
        promise(async move {
            let settled = flush.await.len();
            Ok(Value::from(settled))
        })
    }

    /// Closes the connection. The next call reopens it.
    pub fn close(&self) -> Promise {
        let close = self.inner.close_database();
        promise(async move { close.await.map(|()| Value::Null) })
    }

    /// Closes the connection and deletes the database.
    #[wasm_bindgen(js_name = deleteDatabase)]
    pub fn delete_database(&self) -> Promise {
        let delete = self.inner.delete_database();
        promise(async move { delete.await.map(|()| Value::Null) })
    }
}

fn parse_query(query: JsValue) -> WasmResult<Option<Query>> {
    if query.is_undefined() || query.is_null() {
        return Ok(None);
    }
    let query: JsQuery = serde_wasm_bindgen::from_value(query)?;
    query.build().map(Some)
}

/// Converts a key for JavaScript callers.
#[wasm_bindgen(js_name = normalizeKey)]
pub fn normalize_key(key: JsValue) -> Result<JsValue, JsValue> {
    Ok(key_to_js(&js_key(key)?))
}
