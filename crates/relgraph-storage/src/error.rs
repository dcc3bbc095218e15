//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store not found.
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// Store already exists.
    #[error("store already exists: {store_id}")]
    StoreAlreadyExists { store_id: String },

    /// Model not found.
    #[error("authorization model not found: {model_id}")]
    ModelNotFound { model_id: String },

    /// Tuple not found (delete of a tuple that was never written).
    #[error("tuple not found: {object_type}:{object_id}#{relation}@{user}")]
    TupleNotFound {
        object_type: String,
        object_id: String,
        relation: String,
        user: String,
    },

    /// Duplicate tuple (write of a tuple that already exists).
    #[error("duplicate tuple: {object_type}:{object_id}#{relation}@{user}")]
    DuplicateTuple {
        object_type: String,
        object_id: String,
        relation: String,
        user: String,
    },

    /// Malformed, foreign or out-of-range continuation token.
    #[error("invalid continuation token: {reason}")]
    InvalidContinuationToken { reason: String },

    /// Invalid filter error.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Backend query error.
    #[error("query error: {message}")]
    QueryError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Short status name used as the `code` label of datastore metrics.
    pub fn status_name(&self) -> &'static str {
        match self {
            StorageError::StoreNotFound { .. }
            | StorageError::ModelNotFound { .. }
            | StorageError::TupleNotFound { .. } => "NotFound",
            StorageError::StoreAlreadyExists { .. } | StorageError::DuplicateTuple { .. } => {
                "AlreadyExists"
            }
            StorageError::InvalidContinuationToken { .. }
            | StorageError::InvalidFilter { .. }
            | StorageError::InvalidInput { .. } => "InvalidArgument",
            StorageError::SerializationError { .. }
            | StorageError::QueryError { .. }
            | StorageError::InternalError { .. } => "Internal",
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_group_errors() {
        let not_found = StorageError::StoreNotFound {
            store_id: "s".to_string(),
        };
        assert_eq!(not_found.status_name(), "NotFound");

        let dup = StorageError::DuplicateTuple {
            object_type: "doc".to_string(),
            object_id: "1".to_string(),
            relation: "viewer".to_string(),
            user: "user:anne".to_string(),
        };
        assert_eq!(dup.status_name(), "AlreadyExists");
        assert_eq!(dup.to_string(), "duplicate tuple: doc:1#viewer@user:anne");

        let token = StorageError::InvalidContinuationToken {
            reason: "bad".to_string(),
        };
        assert_eq!(token.status_name(), "InvalidArgument");
    }
}
