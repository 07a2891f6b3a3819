//! Error types for WASM bindings.

use kvbridge_core::CoreError;
use kvbridge_engine::NativeError;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Errors that can occur in the WASM bindings.
#[derive(Debug, Error)]
pub enum WasmError {
    /// The bridge rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// A value could not cross the JS boundary.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JavaScript error occurred.
    #[error("JS error: {0}")]
    JsError(String),

    /// Feature not supported in current environment.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<WasmError> for JsValue {
    fn from(err: WasmError) -> Self {
        js_sys::Error::new(&err.to_string()).into()
    }
}

impl From<JsValue> for WasmError {
    fn from(val: JsValue) -> Self {
        WasmError::JsError(val.as_string().unwrap_or_else(|| format!("{:?}", val)))
    }
}

impl From<serde_wasm_bindgen::Error> for WasmError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        WasmError::Conversion(err.to_string())
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;

/// Converts a thrown JS value or a `DOMException` into a [`NativeError`].
///
/// `DOMException` keeps its name, message and legacy code; plain `Error`
/// objects keep name and message; anything else becomes an `UnknownError`
/// carrying its string form.
pub(crate) fn native_error(value: &JsValue) -> NativeError {
    if let Some(exception) = value.dyn_ref::<web_sys::DomException>() {
        return dom_exception(exception);
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        let name: String = error.name().into();
        let message: String = error.message().into();
        return if message.is_empty() {
            NativeError::named(name)
        } else {
            NativeError::new(name, message)
        };
    }
    match value.as_string() {
        Some(message) => NativeError::new("UnknownError", message),
        None => NativeError::named("UnknownError"),
    }
}

pub(crate) fn dom_exception(exception: &web_sys::DomException) -> NativeError {
    let message = exception.message();
    let mut error = if message.is_empty() {
        NativeError::named(exception.name())
    } else {
        NativeError::new(exception.name(), message)
    };
    // Newer exception kinds report code 0.
    let code = exception.code();
    if code != 0 {
        error = error.with_code(code);
    }
    error
}
