//! Error types raised by native engines.

use std::fmt;
use thiserror::Error;

/// Result type for native engine calls.
pub type NativeResult<T> = Result<T, NativeError>;

/// An error reported by a native engine.
///
/// Engines describe failures the way a `DOMException` does: a short `name`
/// (`"ConstraintError"`, `"AbortError"`, ...), an optional human readable
/// `message` and, for the older exception kinds, a numeric legacy `code`.
/// Any of the three may be the only useful diagnostic, so consumers should
/// look at all of them before giving up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct NativeError {
    /// Exception name.
    pub name: String,
    /// Descriptive message, if the engine provided one.
    pub message: Option<String>,
    /// Legacy numeric code, if the exception kind has one.
    pub code: Option<u16>,
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.name, message),
            None => f.write_str(&self.name),
        }
    }
}

impl NativeError {
    /// Creates an error with a name and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Some(message.into()),
            code: None,
        }
    }

    /// Creates an error that carries only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
            code: None,
        }
    }

    /// Attaches a legacy numeric code.
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// A write collided with an existing key or violated a unique index.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new("ConstraintError", message)
    }

    /// A key or key range was invalid.
    pub fn data(message: impl Into<String>) -> Self {
        Self::new("DataError", message)
    }

    /// A store or index does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message).with_code(8)
    }

    /// The operation was aborted.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::new("AbortError", message).with_code(20)
    }

    /// The object was in the wrong state for the call.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message).with_code(11)
    }

    /// The call was not allowed for this object.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::new("InvalidAccessError", message).with_code(15)
    }

    /// A request was made against a transaction that is no longer active.
    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::new("TransactionInactiveError", message)
    }

    /// A write was attempted in a read-only transaction.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new("ReadOnlyError", message)
    }

    /// An open asked for a version lower than the stored one.
    pub fn version(message: impl Into<String>) -> Self {
        Self::new("VersionError", message)
    }

    /// An argument had the wrong shape.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// Returns true if this is an abort.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        self.name == "AbortError"
    }
}
