//! DataStore trait definition and the records it traffics in.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Maximum length of a store identifier.
pub const MAX_STORE_ID_LENGTH: usize = 64;

/// Default page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Filter for reading tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    /// Filter by object type.
    pub object_type: Option<String>,
    /// Filter by object ID.
    pub object_id: Option<String>,
    /// Filter by relation.
    pub relation: Option<String>,
    /// Filter by user, in `type:id`, `type:*` or `type:id#relation` form.
    pub user: Option<String>,
}

impl TupleFilter {
    /// Tuples attached to one object relation (forward scan).
    pub fn for_object(object_type: &str, object_id: &str, relation: &str) -> Self {
        Self {
            object_type: Some(object_type.to_string()),
            object_id: Some(object_id.to_string()),
            relation: Some(relation.to_string()),
            user: None,
        }
    }

    /// Tuples of an object type and relation naming a given user (reverse scan).
    pub fn for_user(object_type: &str, relation: &str, user: &str) -> Self {
        Self {
            object_type: Some(object_type.to_string()),
            object_id: None,
            relation: Some(relation.to_string()),
            user: Some(user.to_string()),
        }
    }
}

/// A stored tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredTuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    pub user_id: String,
    pub user_relation: Option<String>,
}

impl StoredTuple {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        user_relation: Option<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation,
        }
    }

    /// The object in `type:id` form.
    pub fn object(&self) -> String {
        format!("{}:{}", self.object_type, self.object_id)
    }

    /// The user in `type:id` or `type:id#relation` form.
    pub fn user(&self) -> String {
        match &self.user_relation {
            Some(rel) => format!("{}:{}#{}", self.user_type, self.user_id, rel),
            None => format!("{}:{}", self.user_type, self.user_id),
        }
    }

    fn sort_key(&self) -> (&str, &str, &str, &str, &str, &str) {
        (
            &self.object_type,
            &self.object_id,
            &self.relation,
            &self.user_type,
            &self.user_id,
            self.user_relation.as_deref().unwrap_or(""),
        )
    }
}

impl std::fmt::Display for StoredTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}@{}", self.object(), self.relation, self.user())
    }
}

/// Orders tuples the way paginated reads return them.
pub fn compare_tuples(a: &StoredTuple, b: &StoredTuple) -> std::cmp::Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// Store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A serialized authorization model version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAuthorizationModel {
    pub id: String,
    pub store_id: String,
    pub schema_version: String,
    /// The model document as JSON.
    pub model_json: String,
    pub created_at: DateTime<Utc>,
}

/// An assertion attached to a model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAssertion {
    pub tuple: StoredTuple,
    pub expectation: bool,
}

/// Kind of tuple mutation recorded in the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TupleOperation {
    Write,
    Delete,
}

/// One entry of the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleChange {
    pub tuple: StoredTuple,
    pub operation: TupleOperation,
    pub timestamp: DateTime<Utc>,
    /// Position in the store's change feed, starting at 1.
    pub sequence: u64,
}

/// Pagination request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationOptions {
    pub page_size: Option<u32>,
    pub continuation_token: Option<String>,
}

impl PaginationOptions {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: Some(page_size),
            continuation_token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    pub(crate) fn effective_page_size(&self) -> StorageResult<usize> {
        match self.page_size {
            Some(0) => Err(StorageError::InvalidInput {
                message: "page_size must be greater than 0".to_string(),
            }),
            Some(size) => Ok(size as usize),
            None => Ok(DEFAULT_PAGE_SIZE as usize),
        }
    }
}

/// One page of results plus the token for the next page, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub continuation_token: Option<String>,
}

/// Encodes a cursor as URL-safe, unpadded base64 of its JSON form.
pub fn encode_token<T: Serialize>(cursor: &T) -> StorageResult<String> {
    let json = serde_json::to_vec(cursor).map_err(|e| StorageError::SerializationError {
        message: e.to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a token produced by [`encode_token`].
pub fn decode_token<T: DeserializeOwned>(token: &str) -> StorageResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| StorageError::InvalidContinuationToken {
            reason: format!("not valid base64: {e}"),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidContinuationToken {
        reason: format!("unrecognized token payload: {e}"),
    })
}

/// Identifies the store and filter a tuple read token was issued for.
pub(crate) fn tuple_scope(store_id: &str, filter: &TupleFilter) -> String {
    let part = |value: &Option<String>| value.as_deref().unwrap_or("").to_string();
    format!(
        "{store_id}|{}|{}|{}|{}",
        part(&filter.object_type),
        part(&filter.object_id),
        part(&filter.relation),
        part(&filter.user)
    )
}

fn foreign_query() -> StorageError {
    StorageError::InvalidContinuationToken {
        reason: "token was issued for a different query".to_string(),
    }
}

/// Position after the last tuple of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TupleCursor {
    #[serde(rename = "k")]
    pub kind: String,
    #[serde(rename = "q")]
    pub scope: String,
    pub last: StoredTuple,
}

impl TupleCursor {
    const KIND: &'static str = "tuples";

    pub(crate) fn after(scope: &str, tuple: &StoredTuple) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            scope: scope.to_string(),
            last: tuple.clone(),
        }
    }

    pub(crate) fn parse(token: &Option<String>, scope: &str) -> StorageResult<Option<Self>> {
        let Some(token) = token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let cursor: Self = decode_token(token)?;
        if cursor.kind != Self::KIND {
            return Err(StorageError::InvalidContinuationToken {
                reason: "token was not issued for a tuple read".to_string(),
            });
        }
        if cursor.scope != scope {
            return Err(foreign_query());
        }
        Ok(Some(cursor))
    }
}

/// Offset into a newest-first listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct OffsetCursor {
    #[serde(rename = "k")]
    pub kind: String,
    /// Store the listing belongs to; empty for the store listing itself.
    #[serde(rename = "q")]
    pub scope: String,
    pub offset: usize,
}

impl OffsetCursor {
    pub(crate) fn new(kind: &str, scope: &str, offset: usize) -> Self {
        Self {
            kind: kind.to_string(),
            scope: scope.to_string(),
            offset,
        }
    }

    /// Parses an offset token, rejecting tokens of another kind or scope, or
    /// beyond `len`.
    pub(crate) fn parse(
        token: &Option<String>,
        kind: &str,
        scope: &str,
        len: usize,
    ) -> StorageResult<usize> {
        let Some(token) = token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(0);
        };
        let cursor: Self = decode_token(token)?;
        if cursor.kind != kind {
            return Err(StorageError::InvalidContinuationToken {
                reason: format!("token was not issued for a {kind} listing"),
            });
        }
        if cursor.scope != scope {
            return Err(foreign_query());
        }
        if cursor.offset > len {
            return Err(StorageError::InvalidContinuationToken {
                reason: format!("offset {} is out of range", cursor.offset),
            });
        }
        Ok(cursor.offset)
    }
}

/// Sequence number of the last change delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ChangeCursor {
    #[serde(rename = "k")]
    pub kind: String,
    #[serde(rename = "q")]
    pub scope: String,
    pub sequence: u64,
    pub object_type: Option<String>,
}

impl ChangeCursor {
    const KIND: &'static str = "changes";

    pub(crate) fn new(store_id: &str, sequence: u64, object_type: Option<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            scope: store_id.to_string(),
            sequence,
            object_type,
        }
    }

    pub(crate) fn parse(
        token: &Option<String>,
        store_id: &str,
        object_type: &Option<String>,
        head: u64,
    ) -> StorageResult<u64> {
        let Some(token) = token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(0);
        };
        let cursor: Self = decode_token(token)?;
        if cursor.kind != Self::KIND {
            return Err(StorageError::InvalidContinuationToken {
                reason: "token was not issued for the change feed".to_string(),
            });
        }
        if cursor.scope != store_id {
            return Err(foreign_query());
        }
        if &cursor.object_type != object_type {
            return Err(StorageError::InvalidContinuationToken {
                reason: "token was issued for a different object type filter".to_string(),
            });
        }
        if cursor.sequence > head {
            return Err(StorageError::InvalidContinuationToken {
                reason: format!("sequence {} is beyond the feed head", cursor.sequence),
            });
        }
        Ok(cursor.sequence)
    }
}

/// Validates a store identifier.
pub fn validate_store_id(store_id: &str) -> StorageResult<()> {
    if store_id.is_empty() {
        return Err(StorageError::InvalidInput {
            message: "store_id cannot be empty".to_string(),
        });
    }
    if store_id.len() > MAX_STORE_ID_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("store_id exceeds maximum length of {MAX_STORE_ID_LENGTH}"),
        });
    }
    Ok(())
}

/// Validates that every component of a tuple is present.
pub fn validate_tuple(tuple: &StoredTuple) -> StorageResult<()> {
    let fields = [
        ("object_type", &tuple.object_type),
        ("object_id", &tuple.object_id),
        ("relation", &tuple.relation),
        ("user_type", &tuple.user_type),
        ("user_id", &tuple.user_id),
    ];
    for (name, value) in fields {
        if value.is_empty() {
            return Err(StorageError::InvalidInput {
                message: format!("tuple {name} cannot be empty"),
            });
        }
    }
    if matches!(tuple.user_relation.as_deref(), Some("")) {
        return Err(StorageError::InvalidInput {
            message: "tuple user_relation cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Splits a user filter into `(type, id, relation)`.
pub fn parse_user_filter(user: &str) -> StorageResult<(String, String, Option<String>)> {
    let (user_type, rest) = user.split_once(':').ok_or_else(|| StorageError::InvalidFilter {
        message: format!("user filter must be 'type:id', got '{user}'"),
    })?;
    let (user_id, relation) = match rest.split_once('#') {
        Some((id, rel)) => (id, Some(rel.to_string())),
        None => (rest, None),
    };
    if user_type.is_empty() || user_id.is_empty() || relation.as_deref() == Some("") {
        return Err(StorageError::InvalidFilter {
            message: format!("user filter has an empty component: '{user}'"),
        });
    }
    Ok((user_type.to_string(), user_id.to_string(), relation))
}

/// Abstract storage interface for authorization data.
///
/// Implementations must be thread-safe (Send + Sync). Paginated reads take
/// opaque continuation tokens; a token that the implementation did not issue
/// for the same kind of read fails with
/// [`StorageError::InvalidContinuationToken`].
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Store operations

    /// Creates a new store.
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store>;

    /// Gets a store by ID.
    async fn get_store(&self, id: &str) -> StorageResult<Store>;

    /// Deletes a store and everything in it.
    async fn delete_store(&self, id: &str) -> StorageResult<()>;

    /// Lists stores, newest first.
    async fn list_stores(&self, pagination: &PaginationOptions)
        -> StorageResult<PaginatedResult<Store>>;

    // Tuple operations

    /// Applies writes and deletes atomically.
    ///
    /// Writing a tuple that exists fails with `DuplicateTuple`; deleting one
    /// that does not fails with `TupleNotFound`. On failure nothing is applied.
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()>;

    /// Point read of a single tuple.
    async fn read_tuple(
        &self,
        store_id: &str,
        tuple: &StoredTuple,
    ) -> StorageResult<Option<StoredTuple>>;

    /// Reads every tuple matching the filter.
    async fn read_tuples(
        &self,
        store_id: &str,
        filter: &TupleFilter,
    ) -> StorageResult<Vec<StoredTuple>>;

    /// Reads one page of tuples matching the filter, in a stable order.
    async fn read_tuples_paginated(
        &self,
        store_id: &str,
        filter: &TupleFilter,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<StoredTuple>>;

    /// Reads the change feed in commit order.
    ///
    /// When nothing newer than the token exists, the same token is returned.
    async fn read_changes(
        &self,
        store_id: &str,
        object_type: Option<&str>,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<TupleChange>>;

    // Model operations

    async fn write_authorization_model(
        &self,
        model: StoredAuthorizationModel,
    ) -> StorageResult<StoredAuthorizationModel>;

    async fn get_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<StoredAuthorizationModel>;

    /// Lists model versions newest first.
    async fn list_authorization_models(
        &self,
        store_id: &str,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<StoredAuthorizationModel>>;

    async fn get_latest_authorization_model(
        &self,
        store_id: &str,
    ) -> StorageResult<StoredAuthorizationModel>;

    // Assertion operations

    /// Replaces the assertions stored for a model.
    async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<StoredAssertion>,
    ) -> StorageResult<()>;

    async fn read_assertions(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<Vec<StoredAssertion>>;
}
