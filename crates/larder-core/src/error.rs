//! Error types and result aliases for Larder.
//!
//! The variants map one-to-one onto the error surface exposed to drivers:
//! callers can match on the kind of failure without parsing messages.

/// The result type used throughout Larder.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Larder operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A basket, document, or storage path was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path that must not exist already does (e.g. a commit destination).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input was provided to an operation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A basket document exists but does not match its schema.
    #[error("schema violation in {path}: {message}")]
    SchemaViolation {
        /// Path of the offending document.
        path: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A cycle was found in the basket lineage graph.
    #[error("parent-child loop found at uuid: {uuid}")]
    LineageCycle {
        /// A uuid on the detected cycle.
        uuid: String,
    },

    /// A mutating operation was attempted on a read-only pantry.
    #[error("pantry is read-only: {0}")]
    ReadOnly(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A relational index backend failed.
    #[error("database error: {message}")]
    Database {
        /// Description of the database failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error wrapping an underlying cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a database error wrapping an underlying cause.
    #[must_use]
    pub fn database(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a schema violation error.
    #[must_use]
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::storage_with_source("io error", err)
        }
    }
}
