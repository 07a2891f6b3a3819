//! Error types for kvbridge core.

use kvbridge_engine::{Key, NativeError};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by kvbridge core operations.
///
/// Native engine errors never cross this boundary as-is; they are reduced to
/// a message first (see [`describe`]). The type is `Clone` so that memoized
/// futures can hand the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Another connection holds the database at a version that prevents the
    /// open (or delete) from proceeding.
    #[error("connection blocked: {message}")]
    ConnectionBlocked {
        /// Normalized diagnostic.
        message: String,
    },

    /// The native open request failed.
    #[error("open failed: {message}")]
    OpenFailed {
        /// Normalized diagnostic.
        message: String,
    },

    /// The native delete request failed.
    #[error("delete failed: {message}")]
    DeleteFailed {
        /// Normalized diagnostic.
        message: String,
    },

    /// One or more requested stores do not exist in the current schema.
    #[error("missing stores: {}", names.join(", "))]
    MissingStores {
        /// The names that were not found.
        names: Vec<String>,
    },

    /// The transaction was aborted.
    #[error("transaction aborted: {message}")]
    TransactionAborted {
        /// Normalized diagnostic.
        message: String,
    },

    /// The transaction failed with an error.
    #[error("transaction failed: {message}")]
    TransactionFailed {
        /// Normalized diagnostic.
        message: String,
    },

    /// A single native request failed.
    #[error("{message}")]
    Request {
        /// Normalized diagnostic.
        message: String,
    },

    /// A value could not be used as a key, or an operation produced no key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// `find` did not match any record.
    #[error("{store}:{key} not found.")]
    NotFound {
        /// Store searched.
        store: String,
        /// Key that was not found.
        key: Key,
    },

    /// An upgrade migration returned an error; the upgrade was rolled back.
    #[error("migration to version {version} failed: {message}")]
    MigrationFailed {
        /// Version whose migration failed.
        version: u64,
        /// The migration's error.
        message: String,
    },

    /// A query could not be built.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a `ConnectionBlocked` error.
    pub fn blocked(message: impl Into<String>) -> Self {
        Self::ConnectionBlocked {
            message: message.into(),
        }
    }

    /// Creates an `OpenFailed` error.
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::OpenFailed {
            message: message.into(),
        }
    }

    /// Creates a `DeleteFailed` error.
    pub fn delete_failed(message: impl Into<String>) -> Self {
        Self::DeleteFailed {
            message: message.into(),
        }
    }

    /// Creates a `TransactionAborted` error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::TransactionAborted {
            message: message.into(),
        }
    }

    /// Creates a `TransactionFailed` error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            message: message.into(),
        }
    }

    /// Creates a `Request` error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(store: impl Into<String>, key: Key) -> Self {
        Self::NotFound {
            store: store.into(),
            key,
        }
    }

    /// Creates an `InvalidQuery` error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Returns true for `TransactionAborted`.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::TransactionAborted { .. })
    }
}

impl From<NativeError> for CoreError {
    /// Errors raised synchronously by engine calls surface as request errors.
    fn from(error: NativeError) -> Self {
        Self::request(describe(&error))
    }
}

/// Reduces a native error to one message.
///
/// Takes the richest diagnostic available: the message, then the exception
/// name, then the legacy numeric code.
#[must_use]
pub fn describe(error: &NativeError) -> String {
    if let Some(message) = error.message.as_deref().filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    if !error.name.is_empty() {
        return error.name.clone();
    }
    match error.code {
        Some(code) => format!("Error code {code}"),
        None => "Unknown error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_store_and_key() {
        let err = CoreError::not_found("items", Key::from(42));
        assert_eq!(err.to_string(), "items:42 not found.");
    }

    #[test]
    fn describe_falls_back_through_fields() {
        assert_eq!(describe(&NativeError::constraint("dup")), "dup");
        assert_eq!(describe(&NativeError::named("QuotaExceededError")), "QuotaExceededError");

        let coded = NativeError {
            name: String::new(),
            message: Some(String::new()),
            code: Some(11),
        };
        assert_eq!(describe(&coded), "Error code 11");

        let bare = NativeError {
            name: String::new(),
            message: None,
            code: None,
        };
        assert_eq!(describe(&bare), "Unknown error");
    }

    #[test]
    fn missing_stores_lists_names() {
        let err = CoreError::MissingStores {
            names: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "missing stores: a, b");
    }
}
