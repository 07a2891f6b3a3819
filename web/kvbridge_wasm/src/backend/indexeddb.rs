//! IndexedDB implementation of the engine contract.
//!
//! Every `IDBRequest` is mirrored by an engine [`Request`]: the browser's
//! `success`, `error`, `blocked` and `upgradeneeded` events are translated
//! and re-fired at it. Records cross the boundary as JSON-compatible JS
//! objects, keys as numbers, strings and arrays.
//!
//! ## How It Works
//!
//! - Handlers are owned by a [`Listeners`] set per request or transaction
//! - The set is released after the terminal event (`success` without a
//!   cursor, a null cursor, `error`, `complete`, `abort`)
//! - Request errors are not cancelled, so IndexedDB aborts the transaction
//!   exactly as the contract expects

use super::listeners::Listeners;
use crate::convert::{
    direction_to_js, key_from_js, key_path_from_js, key_to_js, mode_from_js, mode_to_js,
    range_to_js, record_from_js, record_to_js, string_array, string_list,
};
use crate::error::{dom_exception, native_error, WasmError, WasmResult};
use js_sys::Array;
use kvbridge_engine::{
    CursorDirection, IndexParams, Key, KeyPath, KeyRange, NativeCursor, NativeDatabase,
    NativeError, NativeFactory, NativeIndex, NativeResult, NativeSource, NativeStore,
    NativeTransaction, Outcome, Request, StoreParams, TransactionEvents, TransactionMode,
    UpgradeNeeded, VersionChange, WeakRequest,
};
use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbCursor, IdbCursorDirection, IdbCursorWithValue, IdbDatabase, IdbFactory, IdbIndex,
    IdbIndexParameters, IdbObjectStore, IdbObjectStoreParameters, IdbOpenDbRequest, IdbRequest,
    IdbTransaction, IdbVersionChangeEvent,
};

fn js_err(value: JsValue) -> NativeError {
    native_error(&value)
}

/// What a successful request's `result` holds.
#[derive(Debug, Clone, Copy)]
enum Reading {
    Undefined,
    Key,
    Record,
    Keys,
    Records,
    Count,
    Cursor { with_value: bool },
}

fn read_outcome(reading: Reading, result: JsValue, request: &Request) -> NativeResult<Outcome> {
    match reading {
        Reading::Undefined => Ok(Outcome::Undefined),
        Reading::Key => key_from_js(&result).map(Outcome::Key),
        Reading::Record if result.is_undefined() => Ok(Outcome::Undefined),
        Reading::Record => record_from_js(result).map(Outcome::Value),
        Reading::Keys => Array::from(&result)
            .iter()
            .map(|key| key_from_js(&key))
            .collect::<NativeResult<Vec<_>>>()
            .map(Outcome::Keys),
        Reading::Records => Array::from(&result)
            .iter()
            .map(record_from_js)
            .collect::<NativeResult<Vec<_>>>()
            .map(Outcome::Values),
        Reading::Count => result
            .as_f64()
            .map(|n| Outcome::Count(n as u64))
            .ok_or_else(|| NativeError::type_error("count did not return a number")),
        Reading::Cursor { .. } if result.is_null() => Ok(Outcome::Cursor(None)),
        Reading::Cursor { with_value } => {
            let cursor = BrowserCursor::new(&result, with_value, request)?;
            Ok(Outcome::Cursor(Some(Rc::new(cursor))))
        }
    }
}

fn request_error(raw: &IdbRequest) -> NativeError {
    match raw.error() {
        Ok(Some(exception)) => dom_exception(&exception),
        Ok(None) => NativeError::named("UnknownError"),
        Err(e) => js_err(e),
    }
}

/// Mirrors a data request.
fn adapt(raw: Result<IdbRequest, JsValue>, reading: Reading) -> NativeResult<Request> {
    let raw = raw.map_err(js_err)?;
    let request = Request::new();
    let listeners = Listeners::new();

    let on_success = {
        let (raw, request, owner) = (raw.clone(), request.clone(), Rc::clone(&listeners));
        listeners.attach(move |_| {
            let result = raw.result().unwrap_or(JsValue::UNDEFINED);
            let last = !matches!(reading, Reading::Cursor { .. }) || result.is_null();
            match read_outcome(reading, result, &request) {
                Ok(outcome) => {
                    request.succeed(outcome);
                    if last {
                        owner.release();
                    }
                }
                Err(error) => {
                    request.fail(error);
                    owner.release();
                }
            }
        })
    };
    let on_error = {
        let (raw, request, owner) = (raw.clone(), request.clone(), Rc::clone(&listeners));
        listeners.attach(move |_| {
            request.fail(request_error(&raw));
            owner.release();
        })
    };
    raw.set_onsuccess(Some(&on_success));
    raw.set_onerror(Some(&on_error));
    Ok(request)
}

fn version_change(event: &web_sys::Event) -> VersionChange {
    match event.dyn_ref::<IdbVersionChangeEvent>() {
        Some(event) => VersionChange {
            old_version: event.old_version() as u64,
            new_version: event.new_version().unwrap_or(0.0) as u64,
        },
        None => VersionChange {
            old_version: 0,
            new_version: 0,
        },
    }
}

/// Mirrors an open or delete request.
fn adapt_open(raw: Result<IdbOpenDbRequest, JsValue>, deleting: bool) -> NativeResult<Request> {
    let raw = raw.map_err(js_err)?;
    let request = Request::new();
    let listeners = Listeners::new();

    let on_success = {
        let (raw, request, owner) = (raw.clone(), request.clone(), Rc::clone(&listeners));
        listeners.attach(move |_| {
            owner.release();
            if deleting {
                request.succeed(Outcome::Undefined);
                return;
            }
            match raw.result().map(|result| result.dyn_into::<IdbDatabase>()) {
                Ok(Ok(database)) => {
                    request.succeed(Outcome::Database(Rc::new(BrowserDatabase::new(database))))
                }
                _ => request.fail(NativeError::type_error("open did not produce a database")),
            }
        })
    };
    let on_error = {
        let (raw, request, owner) = (raw.clone(), request.clone(), Rc::clone(&listeners));
        listeners.attach(move |_| {
            request.fail(request_error(&raw));
            owner.release();
        })
    };
    let on_blocked = {
        let request = request.clone();
        listeners.attach(move |event| request.block(version_change(&event)))
    };
    let on_upgrade_needed = {
        let (raw, request) = (raw.clone(), request.clone());
        listeners.attach(move |event| {
            let database = raw.result().ok().and_then(|r| r.dyn_into::<IdbDatabase>().ok());
            let (Some(database), Some(transaction)) = (database, raw.transaction()) else {
                tracing::warn!("upgradeneeded fired without a database or transaction");
                return;
            };
            request.upgrade_needed(UpgradeNeeded {
                change: version_change(&event),
                database: Rc::new(BrowserDatabase::new(database)),
                transaction: Rc::new(BrowserTransaction::new(
                    transaction,
                    TransactionMode::VersionChange,
                )),
            });
        })
    };
    raw.set_onsuccess(Some(&on_success));
    raw.set_onerror(Some(&on_error));
    raw.set_onblocked(Some(&on_blocked));
    if !deleting {
        raw.set_onupgradeneeded(Some(&on_upgrade_needed));
    }
    Ok(request)
}

/// The browser's `indexedDB` factory.
#[derive(Debug, Clone)]
pub struct BrowserFactory {
    raw: IdbFactory,
}

impl BrowserFactory {
    /// Wraps an existing factory.
    pub fn new(raw: IdbFactory) -> Self {
        Self { raw }
    }

    /// Looks up `indexedDB` on the current global, window or worker.
    pub fn from_global() -> WasmResult<Self> {
        let global = js_sys::global();
        let factory = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
            window.indexed_db()?
        } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
            worker.indexed_db()?
        } else {
            None
        };
        factory
            .map(Self::new)
            .ok_or_else(|| WasmError::NotSupported("IndexedDB not available".into()))
    }

    /// Checks whether IndexedDB can be used from the current global.
    pub fn is_available() -> bool {
        Self::from_global().is_ok()
    }
}

impl NativeFactory for BrowserFactory {
    fn open(&self, name: &str, version: u64) -> NativeResult<Request> {
        tracing::debug!(name, version, "opening IndexedDB database");
        adapt_open(self.raw.open_with_f64(name, version as f64), false)
    }

    fn delete_database(&self, name: &str) -> NativeResult<Request> {
        tracing::debug!(name, "deleting IndexedDB database");
        adapt_open(self.raw.delete_database(name), true)
    }
}

/// An `IDBDatabase` connection.
#[derive(Debug, Clone)]
pub struct BrowserDatabase {
    raw: IdbDatabase,
}

impl BrowserDatabase {
    fn new(raw: IdbDatabase) -> Self {
        Self { raw }
    }
}

impl NativeDatabase for BrowserDatabase {
    fn name(&self) -> String {
        self.raw.name()
    }

    fn version(&self) -> u64 {
        self.raw.version() as u64
    }

    fn store_names(&self) -> Vec<String> {
        string_list(&self.raw.object_store_names())
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> NativeResult<Rc<dyn NativeTransaction>> {
        let raw = self
            .raw
            .transaction_with_str_sequence_and_mode(&string_array(stores), mode_to_js(mode)?)
            .map_err(js_err)?;
        Ok(Rc::new(BrowserTransaction::new(raw, mode)))
    }

    fn create_store(&self, name: &str, params: StoreParams) -> NativeResult<Rc<dyn NativeStore>> {
        let options = IdbObjectStoreParameters::new();
        options.set_auto_increment(params.auto_increment);
        if let Some(path) = &params.key_path {
            options.set_key_path(&JsValue::from_str(path.as_str()));
        }
        let raw = self
            .raw
            .create_object_store_with_optional_parameters(name, &options)
            .map_err(js_err)?;
        Ok(Rc::new(BrowserStore { raw }))
    }

    fn delete_store(&self, name: &str) -> NativeResult<()> {
        self.raw.delete_object_store(name).map_err(js_err)
    }

    fn close(&self) {
        self.raw.close();
    }
}

/// An `IDBTransaction`.
pub struct BrowserTransaction {
    raw: IdbTransaction,
    mode: TransactionMode,
    events: Rc<TransactionEvents>,
}

impl BrowserTransaction {
    fn new(raw: IdbTransaction, mode: TransactionMode) -> Self {
        let mode = raw.mode().map(mode_from_js).unwrap_or(mode);
        let events = Rc::new(TransactionEvents::new());
        let listeners = Listeners::new();

        let on_complete = {
            let (events, owner) = (Rc::clone(&events), Rc::clone(&listeners));
            listeners.attach(move |_| {
                events.fire_complete();
                owner.release();
            })
        };
        let on_abort = {
            let (raw, events, owner) = (raw.clone(), Rc::clone(&events), Rc::clone(&listeners));
            listeners.attach(move |_| {
                let error = raw
                    .error()
                    .map(|e| dom_exception(&e))
                    .unwrap_or_else(|| NativeError::abort("The transaction was aborted."));
                events.fire_abort(error);
                owner.release();
            })
        };
        let on_error = {
            let events = Rc::clone(&events);
            listeners.attach(move |event| {
                // Request errors bubble here with the request as the target.
                let error = event
                    .target()
                    .and_then(|target| target.dyn_into::<IdbRequest>().ok())
                    .map(|request| request_error(&request))
                    .unwrap_or_else(|| NativeError::named("UnknownError"));
                events.fire_error(error);
            })
        };
        raw.set_oncomplete(Some(&on_complete));
        raw.set_onabort(Some(&on_abort));
        raw.set_onerror(Some(&on_error));

        Self { raw, mode, events }
    }
}

impl NativeTransaction for BrowserTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn store_names(&self) -> Vec<String> {
        string_list(&self.raw.object_store_names())
    }

    fn store(&self, name: &str) -> NativeResult<Rc<dyn NativeStore>> {
        let raw = self.raw.object_store(name).map_err(js_err)?;
        Ok(Rc::new(BrowserStore { raw }))
    }

    fn abort(&self) -> NativeResult<()> {
        self.raw.abort().map_err(js_err)
    }

    fn events(&self) -> &TransactionEvents {
        &self.events
    }
}

/// The read calls `IDBObjectStore` and `IDBIndex` share.
trait RawSource {
    fn count_in(&self, query: &JsValue) -> Result<IdbRequest, JsValue>;
    fn get_one(&self, key: &JsValue) -> Result<IdbRequest, JsValue>;
    fn get_all_in(&self, query: &JsValue) -> Result<IdbRequest, JsValue>;
    fn get_all_keys_in(&self, query: &JsValue) -> Result<IdbRequest, JsValue>;
    fn cursor(&self, query: &JsValue, direction: IdbCursorDirection) -> Result<IdbRequest, JsValue>;
    fn key_cursor(&self, query: &JsValue, direction: IdbCursorDirection)
        -> Result<IdbRequest, JsValue>;
}

macro_rules! raw_source {
    ($ty:ty) => {
        impl RawSource for $ty {
            fn count_in(&self, query: &JsValue) -> Result<IdbRequest, JsValue> {
                self.count_with_key(query)
            }

            fn get_one(&self, key: &JsValue) -> Result<IdbRequest, JsValue> {
                self.get(key)
            }

            fn get_all_in(&self, query: &JsValue) -> Result<IdbRequest, JsValue> {
                self.get_all_with_key(query)
            }

            fn get_all_keys_in(&self, query: &JsValue) -> Result<IdbRequest, JsValue> {
                self.get_all_keys_with_key(query)
            }

            fn cursor(
                &self,
                query: &JsValue,
                direction: IdbCursorDirection,
            ) -> Result<IdbRequest, JsValue> {
                self.open_cursor_with_range_and_direction(query, direction)
            }

            fn key_cursor(
                &self,
                query: &JsValue,
                direction: IdbCursorDirection,
            ) -> Result<IdbRequest, JsValue> {
                self.open_key_cursor_with_range_and_direction(query, direction)
            }
        }
    };
}

raw_source!(IdbObjectStore);
raw_source!(IdbIndex);

fn count(source: &impl RawSource, range: Option<KeyRange>) -> NativeResult<Request> {
    adapt(source.count_in(&range_to_js(range.as_ref())?), Reading::Count)
}

fn get(source: &impl RawSource, key: Key) -> NativeResult<Request> {
    adapt(source.get_one(&key_to_js(&key)), Reading::Record)
}

fn get_all(source: &impl RawSource, range: Option<KeyRange>) -> NativeResult<Request> {
    adapt(source.get_all_in(&range_to_js(range.as_ref())?), Reading::Records)
}

fn get_all_keys(source: &impl RawSource, range: Option<KeyRange>) -> NativeResult<Request> {
    adapt(source.get_all_keys_in(&range_to_js(range.as_ref())?), Reading::Keys)
}

fn open_cursor(
    source: &impl RawSource,
    range: Option<KeyRange>,
    direction: CursorDirection,
    with_value: bool,
) -> NativeResult<Request> {
    let query = range_to_js(range.as_ref())?;
    let direction = direction_to_js(direction);
    let raw = if with_value {
        source.cursor(&query, direction)
    } else {
        source.key_cursor(&query, direction)
    };
    adapt(raw, Reading::Cursor { with_value })
}

/// An `IDBObjectStore` within one transaction.
#[derive(Debug, Clone)]
pub struct BrowserStore {
    raw: IdbObjectStore,
}

impl NativeSource for BrowserStore {
    fn count(&self, range: Option<KeyRange>) -> NativeResult<Request> {
        count(&self.raw, range)
    }

    fn get(&self, key: Key) -> NativeResult<Request> {
        get(&self.raw, key)
    }

    fn get_all(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        Some(get_all(&self.raw, range))
    }

    fn get_all_keys(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        Some(get_all_keys(&self.raw, range))
    }

    fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> NativeResult<Request> {
        open_cursor(&self.raw, range, direction, true)
    }

    fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> NativeResult<Request> {
        open_cursor(&self.raw, range, direction, false)
    }
}

impl BrowserStore {
    fn write(&self, value: Value, key: Option<Key>, replace: bool) -> NativeResult<Request> {
        let record = record_to_js(&value)?;
        let raw = match (key, replace) {
            (Some(key), false) => self.raw.add_with_key(&record, &key_to_js(&key)),
            (None, false) => self.raw.add(&record),
            (Some(key), true) => self.raw.put_with_key(&record, &key_to_js(&key)),
            (None, true) => self.raw.put(&record),
        };
        adapt(raw, Reading::Key)
    }
}

impl NativeStore for BrowserStore {
    fn name(&self) -> String {
        self.raw.name()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.raw.key_path().ok().and_then(|path| key_path_from_js(&path))
    }

    fn auto_increment(&self) -> bool {
        self.raw.auto_increment()
    }

    fn index_names(&self) -> Vec<String> {
        string_list(&self.raw.index_names())
    }

    fn add(&self, value: Value, key: Option<Key>) -> NativeResult<Request> {
        self.write(value, key, false)
    }

    fn put(&self, value: Value, key: Option<Key>) -> NativeResult<Request> {
        self.write(value, key, true)
    }

    fn delete(&self, key: Key) -> NativeResult<Request> {
        adapt(self.raw.delete(&key_to_js(&key)), Reading::Undefined)
    }

    fn clear(&self) -> NativeResult<Request> {
        adapt(self.raw.clear(), Reading::Undefined)
    }

    fn index(&self, name: &str) -> NativeResult<Rc<dyn NativeIndex>> {
        let raw = self.raw.index(name).map_err(js_err)?;
        Ok(Rc::new(BrowserIndex { raw }))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParams,
    ) -> NativeResult<Rc<dyn NativeIndex>> {
        let options = IdbIndexParameters::new();
        options.set_unique(params.unique);
        options.set_multi_entry(params.multi_entry);
        let raw = self
            .raw
            .create_index_with_str_and_optional_parameters(name, key_path.as_str(), &options)
            .map_err(js_err)?;
        Ok(Rc::new(BrowserIndex { raw }))
    }

    fn delete_index(&self, name: &str) -> NativeResult<()> {
        self.raw.delete_index(name).map_err(js_err)
    }
}

/// An `IDBIndex` within one transaction.
#[derive(Debug, Clone)]
pub struct BrowserIndex {
    raw: IdbIndex,
}

impl NativeSource for BrowserIndex {
    fn count(&self, range: Option<KeyRange>) -> NativeResult<Request> {
        count(&self.raw, range)
    }

    fn get(&self, key: Key) -> NativeResult<Request> {
        get(&self.raw, key)
    }

    fn get_all(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        Some(get_all(&self.raw, range))
    }

    fn get_all_keys(&self, range: Option<KeyRange>) -> Option<NativeResult<Request>> {
        Some(get_all_keys(&self.raw, range))
    }

    fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> NativeResult<Request> {
        open_cursor(&self.raw, range, direction, true)
    }

    fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: CursorDirection,
    ) -> NativeResult<Request> {
        open_cursor(&self.raw, range, direction, false)
    }
}

impl NativeIndex for BrowserIndex {
    fn name(&self) -> String {
        self.raw.name()
    }

    fn key_path(&self) -> KeyPath {
        self.raw
            .key_path()
            .ok()
            .and_then(|path| key_path_from_js(&path))
            .unwrap_or_else(|| KeyPath::new(""))
    }

    fn unique(&self) -> bool {
        self.raw.unique()
    }

    fn multi_entry(&self) -> bool {
        self.raw.multi_entry()
    }
}

/// An `IDBCursor` at one position.
///
/// Key, primary key and value are read when the cursor arrives, since the
/// underlying object moves on with the next `continue()`.
pub struct BrowserCursor {
    raw: IdbCursor,
    key: Key,
    primary_key: Key,
    value: Option<Value>,
    request: WeakRequest,
}

impl BrowserCursor {
    fn new(result: &JsValue, with_value: bool, request: &Request) -> NativeResult<Self> {
        let raw: IdbCursor = result
            .clone()
            .dyn_into()
            .map_err(|_| NativeError::type_error("request result is not a cursor"))?;
        let key = key_from_js(&raw.key().map_err(js_err)?)?;
        let primary_key = key_from_js(&raw.primary_key().map_err(js_err)?)?;
        let value = if with_value {
            let with_value = result
                .dyn_ref::<IdbCursorWithValue>()
                .ok_or_else(|| NativeError::type_error("cursor does not carry values"))?;
            Some(record_from_js(with_value.value().map_err(js_err)?)?)
        } else {
            None
        };
        Ok(Self {
            raw,
            key,
            primary_key,
            value,
            request: request.downgrade(),
        })
    }
}

impl NativeCursor for BrowserCursor {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn primary_key(&self) -> Key {
        self.primary_key.clone()
    }

    fn value(&self) -> Option<Value> {
        self.value.clone()
    }

    fn continue_(&self) -> NativeResult<()> {
        if let Some(request) = self.request.upgrade() {
            request.reset();
        }
        self.raw.continue_().map_err(js_err)
    }
}
