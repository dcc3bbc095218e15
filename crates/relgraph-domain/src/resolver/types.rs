//! Request and result types for the graph resolver.

use serde::{Deserialize, Serialize};

use crate::model::UserRef;

/// How fresh the model lookup must be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyPreference {
    /// Cached "latest model" pointers may be used.
    #[default]
    MinimizeLatency,
    /// Always re-read the latest model pointer from the datastore.
    HigherConsistency,
}

/// Request for a permission check.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// The store ID to check against.
    pub store_id: String,
    /// The object identifier (e.g., "document:readme").
    pub object: String,
    /// The relation to check (e.g., "viewer").
    pub relation: String,
    /// The user (e.g., "user:alice", "user:*" or "group:eng#member").
    pub user: String,
    /// Model version to pin. The latest model is used when absent.
    pub authorization_model_id: Option<String>,
    pub consistency: ConsistencyPreference,
}

impl CheckRequest {
    pub fn new(
        store_id: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
            authorization_model_id: None,
            consistency: ConsistencyPreference::default(),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyPreference) -> Self {
        self.consistency = consistency;
        self
    }
}

/// Result of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// Whether the check is allowed.
    pub allowed: bool,
}

/// Reference to a stored tuple's user side, as the resolver reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredTupleRef {
    pub user_type: String,
    pub user_id: String,
    pub user_relation: Option<String>,
}

impl StoredTupleRef {
    pub fn new(
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        user_relation: Option<String>,
    ) -> Self {
        Self {
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.user_id == "*" && self.user_relation.is_none()
    }

    pub fn to_user_ref(&self) -> UserRef {
        match &self.user_relation {
            Some(relation) => UserRef::userset(&self.user_type, &self.user_id, relation),
            None if self.is_wildcard() => UserRef::wildcard(&self.user_type),
            None => UserRef::object(&self.user_type, &self.user_id),
        }
    }
}

// ============================================================
// Expand API Types
// ============================================================

/// Request for expanding a relation into its userset tree.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub store_id: String,
    pub object: String,
    pub relation: String,
    pub authorization_model_id: Option<String>,
    pub consistency: ConsistencyPreference,
    /// Levels to expand. `1` describes only the relation itself; larger
    /// values also expand every referenced userset into leaf children.
    pub depth: u32,
}

impl ExpandRequest {
    pub fn new(
        store_id: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            object: object.into(),
            relation: relation.into(),
            authorization_model_id: None,
            consistency: ConsistencyPreference::default(),
            depth: 1,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }
}

/// Result of expanding a relation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandResult {
    /// The expansion tree showing how users relate to the object.
    pub tree: UsersetTree,
}

/// A tree structure representing the expansion of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct UsersetTree {
    /// The root node of the expansion tree.
    pub root: ExpandNode,
}

/// A node in the expansion tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandNode {
    /// A leaf node.
    Leaf(ExpandLeaf),
    /// A union of child nodes (any child grants access).
    Union { name: String, nodes: Vec<ExpandNode> },
    /// An intersection of child nodes (all children must grant access).
    Intersection { name: String, nodes: Vec<ExpandNode> },
    /// A difference (exclusion) of nodes (base minus subtract).
    Difference {
        name: String,
        base: Box<ExpandNode>,
        subtract: Box<ExpandNode>,
    },
}

impl ExpandNode {
    /// Returns the name of this node.
    pub fn name(&self) -> &str {
        match self {
            ExpandNode::Leaf(leaf) => &leaf.name,
            ExpandNode::Union { name, .. }
            | ExpandNode::Intersection { name, .. }
            | ExpandNode::Difference { name, .. } => name,
        }
    }
}

/// A leaf node in the expansion tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandLeaf {
    /// Name of this leaf node, `type:id#relation`.
    pub name: String,
    pub value: ExpandLeafValue,
    /// Expansions of the usersets the leaf refers to. Filled only when the
    /// request asked for more than one level.
    pub children: Vec<ExpandNode>,
}

/// The value of a leaf node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandLeafValue {
    /// Users written directly on the relation.
    Users(Vec<String>),
    /// A computed userset reference (`document:1#owner`).
    Computed { userset: String },
    /// A tuple-to-userset reference: the tupleset (`document:1#parent`) and
    /// every computed userset it leads to (`folder:x#viewer`).
    TupleToUserset {
        tupleset: String,
        computed: Vec<String>,
    },
}

// ============================================================
// ListObjects API Types
// ============================================================

/// Request for listing objects a user has a relation with.
#[derive(Debug, Clone)]
pub struct ListObjectsRequest {
    pub store_id: String,
    /// The object type to list (e.g., "document").
    pub object_type: String,
    pub relation: String,
    /// A concrete user or a userset; wildcards are rejected.
    pub user: String,
    pub authorization_model_id: Option<String>,
    pub consistency: ConsistencyPreference,
    /// Objects per page; the resolver's default when absent.
    pub page_size: Option<u32>,
    pub continuation_token: Option<String>,
}

impl ListObjectsRequest {
    pub fn new(
        store_id: impl Into<String>,
        object_type: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            object_type: object_type.into(),
            relation: relation.into(),
            user: user.into(),
            authorization_model_id: None,
            consistency: ConsistencyPreference::default(),
            page_size: None,
            continuation_token: None,
        }
    }

    pub fn with_page(mut self, page_size: u32, continuation_token: Option<String>) -> Self {
        self.page_size = Some(page_size);
        self.continuation_token = continuation_token;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }
}

/// One page of ListObjects results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListObjectsResult {
    /// Objects as `type:id`, ordered.
    pub objects: Vec<String>,
    /// Present when more objects may follow.
    pub continuation_token: Option<String>,
    /// Whether the run stopped early on a result cap, deadline or failure
    /// to verify a candidate.
    pub truncated: bool,
}

// ============================================================
// ListUsers API Types
// ============================================================

/// Request for listing users with a specific relation to an object.
/// This is the inverse of ListObjects.
#[derive(Debug, Clone)]
pub struct ListUsersRequest {
    pub store_id: String,
    /// The object to check permissions for (type:id format).
    pub object: String,
    pub relation: String,
    /// Filter for user types to return.
    pub user_filters: Vec<UserFilter>,
    pub authorization_model_id: Option<String>,
    pub consistency: ConsistencyPreference,
}

impl ListUsersRequest {
    pub fn new(
        store_id: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        user_filters: Vec<UserFilter>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            object: object.into(),
            relation: relation.into(),
            user_filters,
            authorization_model_id: None,
            consistency: ConsistencyPreference::default(),
        }
    }
}

/// Filter for user types in ListUsers requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilter {
    /// The type to filter for (e.g., "user", "group").
    pub type_name: String,
    /// Optional relation for userset filters (e.g., "member" for "group#member").
    pub relation: Option<String>,
}

impl UserFilter {
    /// Creates a new UserFilter for a direct type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
        }
    }

    /// Creates a new UserFilter for a userset type (e.g., group#member).
    pub fn with_relation(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
        }
    }

    /// Objects and wildcards match a plain type filter; usersets match on
    /// their relation.
    pub fn matches(&self, user: &UserRef) -> bool {
        user.user_type() == self.type_name && user.relation() == self.relation.as_deref()
    }
}

/// Result of listing users with relation to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListUsersResult {
    /// Users that have the specified relation to the object.
    pub users: Vec<UserRef>,
    /// Concrete users a returned wildcard does not cover because an
    /// exclusion removes them.
    pub excluded_users: Vec<UserRef>,
    /// Whether the results were truncated due to limits.
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_tuple_ref_shapes() {
        assert_eq!(
            StoredTupleRef::new("user", "anne", None).to_user_ref(),
            UserRef::object("user", "anne")
        );
        assert_eq!(
            StoredTupleRef::new("user", "*", None).to_user_ref(),
            UserRef::wildcard("user")
        );
        assert_eq!(
            StoredTupleRef::new("group", "eng", Some("member".to_string())).to_user_ref(),
            UserRef::userset("group", "eng", "member")
        );
    }

    #[test]
    fn test_user_filter_matches() {
        let users = UserFilter::new("user");
        assert!(users.matches(&UserRef::object("user", "anne")));
        assert!(users.matches(&UserRef::wildcard("user")));
        assert!(!users.matches(&UserRef::userset("user", "anne", "friend")));

        let members = UserFilter::with_relation("group", "member");
        assert!(members.matches(&UserRef::userset("group", "eng", "member")));
        assert!(!members.matches(&UserRef::object("group", "eng")));
    }
}
