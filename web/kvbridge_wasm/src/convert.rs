//! Conversions between JS values and the engine's key and record types.

use crate::error::native_error;
use js_sys::Array;
use kvbridge_engine::{CursorDirection, Key, KeyPath, KeyRange, NativeError, NativeResult, TransactionMode};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use web_sys::{IdbCursorDirection, IdbKeyRange, IdbTransactionMode};

/// Serializes a record into a plain JS object.
pub(crate) fn record_to_js(value: &Value) -> NativeResult<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    value
        .serialize(&serializer)
        .map_err(|e| NativeError::data(format!("record cannot be stored: {}", e)))
}

/// Reads a record back out of a JS value.
pub(crate) fn record_from_js(value: JsValue) -> NativeResult<Value> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| NativeError::data(format!("record cannot be read: {}", e)))
}

pub(crate) fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

/// Reads a key. Dates and binary keys have no counterpart and are rejected.
pub(crate) fn key_from_js(value: &JsValue) -> NativeResult<Key> {
    if let Some(n) = value.as_f64() {
        return Key::number(n).ok_or_else(|| NativeError::data("NaN is not a valid key"));
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if Array::is_array(value) {
        let items: Array = value.clone().into();
        return items
            .iter()
            .map(|item| key_from_js(&item))
            .collect::<NativeResult<Vec<_>>>()
            .map(Key::Array);
    }
    Err(NativeError::data(format!("unsupported key: {:?}", value)))
}

/// Builds the `IDBKeyRange` for a range; `undefined` selects everything.
pub(crate) fn range_to_js(range: Option<&KeyRange>) -> NativeResult<JsValue> {
    let Some(range) = range else {
        return Ok(JsValue::UNDEFINED);
    };
    let built = match (range.lower(), range.upper()) {
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &key_to_js(lower),
            &key_to_js(upper),
            range.lower_open(),
            range.upper_open(),
        ),
        (Some(lower), None) => IdbKeyRange::lower_bound_with_open(&key_to_js(lower), range.lower_open()),
        (None, Some(upper)) => IdbKeyRange::upper_bound_with_open(&key_to_js(upper), range.upper_open()),
        (None, None) => return Ok(JsValue::UNDEFINED),
    };
    built.map(JsValue::from).map_err(|e| native_error(&e))
}

pub(crate) fn direction_to_js(direction: CursorDirection) -> IdbCursorDirection {
    match direction {
        CursorDirection::Next => IdbCursorDirection::Next,
        CursorDirection::NextUnique => IdbCursorDirection::Nextunique,
        CursorDirection::Prev => IdbCursorDirection::Prev,
        CursorDirection::PrevUnique => IdbCursorDirection::Prevunique,
    }
}

pub(crate) fn mode_to_js(mode: TransactionMode) -> NativeResult<IdbTransactionMode> {
    match mode {
        TransactionMode::ReadOnly => Ok(IdbTransactionMode::Readonly),
        TransactionMode::ReadWrite => Ok(IdbTransactionMode::Readwrite),
        TransactionMode::VersionChange => Err(NativeError::invalid_access(
            "version change transactions are only created by an upgrade",
        )),
    }
}

pub(crate) fn mode_from_js(mode: IdbTransactionMode) -> TransactionMode {
    match mode {
        IdbTransactionMode::Readwrite => TransactionMode::ReadWrite,
        IdbTransactionMode::Versionchange => TransactionMode::VersionChange,
        _ => TransactionMode::ReadOnly,
    }
}

/// Reads a string key path; compound (array) key paths are not supported.
pub(crate) fn key_path_from_js(value: &JsValue) -> Option<KeyPath> {
    value.as_string().map(KeyPath::new)
}

pub(crate) fn string_list(list: &web_sys::DomStringList) -> Vec<String> {
    let mut names: Vec<String> = (0..list.length()).filter_map(|i| list.item(i)).collect();
    names.sort();
    names
}

pub(crate) fn string_array(names: &[String]) -> Array {
    names.iter().map(|name| JsValue::from_str(name)).collect()
}
