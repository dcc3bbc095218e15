//! ListObjects: an ordered, paged view over one ReverseExpand run.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{DomainError, DomainResult};

use super::graph_resolver::GraphResolver;
use super::traits::{ModelReader, TupleReader};
use super::types::{ListObjectsRequest, ListObjectsResult};

/// Resume point carried by a ListObjects continuation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ObjectCursor {
    /// Last object of the previous page.
    after: String,
    model_id: Option<String>,
    /// Fingerprint of the query the token was minted for.
    query: String,
}

impl ObjectCursor {
    fn encode(&self) -> DomainResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| DomainError::Internal {
            message: format!("failed to encode continuation token: {e}"),
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn decode(token: &str) -> DomainResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| invalid_token(format!("malformed encoding: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| invalid_token(format!("malformed cursor: {e}")))
    }
}

fn invalid_token(reason: impl Into<String>) -> DomainError {
    DomainError::InvalidContinuationToken {
        reason: reason.into(),
    }
}

fn fingerprint(request: &ListObjectsRequest) -> String {
    format!(
        "{}|{}|{}|{}",
        request.store_id, request.object_type, request.relation, request.user
    )
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Lists objects of a type the user has the relation with, one page at
    /// a time, ordered by `type:id`.
    ///
    /// Each page re-runs ReverseExpand and resumes strictly after the
    /// token's cursor. A token is returned while objects remain, and
    /// after every truncated run.
    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, object_type = %request.object_type, relation = %request.relation, user = %request.user)
    )]
    pub async fn list_objects(
        self: &Arc<Self>,
        request: &ListObjectsRequest,
    ) -> DomainResult<ListObjectsResult> {
        let page_size = request
            .page_size
            .unwrap_or(self.config.list_objects_page_size);
        if page_size == 0 {
            return Err(DomainError::InvalidParameter {
                parameter: "page_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let query = fingerprint(request);
        let cursor = request
            .continuation_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .map(ObjectCursor::decode)
            .transpose()?;
        if cursor.as_ref().is_some_and(|c| c.query != query) {
            return Err(invalid_token("token was issued for a different query"));
        }

        let after = cursor.as_ref().map(|c| c.after.clone());
        let mut stream = self.reverse_expand_after(request, after.clone()).await?;
        if let Some(cursor) = &cursor {
            if cursor.model_id.as_deref() != stream.model_id() {
                return Err(invalid_token("token was issued for another model version"));
            }
        }

        let mut objects = BTreeSet::new();
        while let Some(object) = stream.next().await {
            objects.insert(object?);
        }
        let truncated = stream.truncated();
        let model_id = stream.model_id().map(str::to_string);

        let mut remaining = objects
            .into_iter()
            .filter(|object| after.as_ref().map_or(true, |after| object > after));
        let page: Vec<String> = remaining.by_ref().take(page_size as usize).collect();
        let more = remaining.next().is_some();

        // A truncated run may have left objects undiscovered, so it always
        // hands out a token, resuming where the page (or the cursor) ended.
        let continuation_token = if more || truncated {
            let resume = page.last().cloned().or(after).unwrap_or_default();
            Some(
                ObjectCursor {
                    after: resume,
                    model_id,
                    query,
                }
                .encode()?,
            )
        } else {
            None
        };

        debug!(
            count = page.len(),
            truncated,
            has_more = continuation_token.is_some(),
            "list objects page"
        );
        Ok(ListObjectsResult {
            objects: page,
            continuation_token,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_token_is_url_safe() {
        let cursor = ObjectCursor {
            after: "document:a/b+c".to_string(),
            model_id: Some("01HXYZ".to_string()),
            query: "store|document|viewer|user:anne".to_string(),
        };
        let token = cursor.encode().unwrap();
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert_eq!(ObjectCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn test_garbage_cursor_is_rejected() {
        for token in ["!!!", "bm90IGpzb24", "eyJmb28iOjF9"] {
            assert!(
                matches!(
                    ObjectCursor::decode(token),
                    Err(DomainError::InvalidContinuationToken { .. })
                ),
                "token {token:?} should be rejected"
            );
        }
    }
}
