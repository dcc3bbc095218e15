//! Domain error types.

use thiserror::Error;

/// Domain-level errors for authorization operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Model DSL could not be parsed.
    #[error("model parse error: {message}")]
    ModelParseError { message: String },

    /// Model failed structural validation.
    #[error("model validation error: {message}")]
    ModelValidationError { message: String },

    /// Invalid user format.
    #[error("invalid user format: {value}")]
    InvalidUserFormat { value: String },

    /// Invalid object format.
    #[error("invalid object format: {value}")]
    InvalidObjectFormat { value: String },

    /// Invalid relation format.
    #[error("invalid relation format: {value}")]
    InvalidRelationFormat { value: String },

    /// A tuple does not fit the authorization model.
    #[error("invalid tuple '{tuple}': {reason}")]
    InvalidTuple { tuple: String, reason: String },

    /// A request parameter is out of its accepted range.
    #[error("invalid parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// Type not found in the model.
    #[error("type not found: {type_name}")]
    TypeNotFound { type_name: String },

    /// Relation not found on a type.
    #[error("relation not found: {type_name}#{relation}")]
    RelationNotFound { type_name: String, relation: String },

    /// Store not found.
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// Authorization model not found.
    #[error("authorization model not found in store {store_id}: {model_id}")]
    AuthorizationModelNotFound { store_id: String, model_id: String },

    /// Continuation token is malformed, foreign, or stale.
    #[error("invalid continuation token: {reason}")]
    InvalidContinuationToken { reason: String },

    /// Resolution recursed deeper than allowed.
    #[error("depth limit exceeded: max depth {max_depth} reached")]
    DepthLimitExceeded { max_depth: u32 },

    /// Resolution dispatched more sub-problems than allowed.
    #[error("resolution budget exceeded: more than {limit} dispatches")]
    ResolutionBudgetExceeded { limit: u32 },

    /// Resolution ran longer than the configured time cap.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Conflicting write: duplicate insert or delete of a missing tuple.
    #[error("conditional write failed: {reason}")]
    WriteConflict { reason: String },

    /// Datastore failure not otherwise classified.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Stable status classes callers use for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    ValidationError,
    InvalidContinuationToken,
    ResourceExhausted,
    ConditionalWriteError,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Documented status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NotFound",
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::InvalidContinuationToken => "InvalidContinuationToken",
            ErrorCode::ResourceExhausted => "ResourceExhausted",
            ErrorCode::ConditionalWriteError => "ConditionalWriteError",
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::Internal => "Internal",
        }
    }

    /// Whether retrying the same request can succeed without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ResourceExhausted | ErrorCode::Internal)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainError {
    /// Classifies the error into its stable status.
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::StoreNotFound { .. }
            | DomainError::AuthorizationModelNotFound { .. }
            | DomainError::TypeNotFound { .. }
            | DomainError::RelationNotFound { .. } => ErrorCode::NotFound,
            DomainError::ModelParseError { .. }
            | DomainError::ModelValidationError { .. }
            | DomainError::InvalidUserFormat { .. }
            | DomainError::InvalidObjectFormat { .. }
            | DomainError::InvalidRelationFormat { .. }
            | DomainError::InvalidTuple { .. }
            | DomainError::InvalidParameter { .. } => ErrorCode::ValidationError,
            DomainError::InvalidContinuationToken { .. } => ErrorCode::InvalidContinuationToken,
            DomainError::DepthLimitExceeded { .. }
            | DomainError::ResolutionBudgetExceeded { .. }
            | DomainError::Timeout { .. } => ErrorCode::ResourceExhausted,
            DomainError::WriteConflict { .. } => ErrorCode::ConditionalWriteError,
            DomainError::Cancelled => ErrorCode::Cancelled,
            DomainError::Storage { .. } | DomainError::Internal { .. } => ErrorCode::Internal,
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
