//! Core type definitions for the authorization model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Characters that cannot appear inside a type, relation, or identifier name.
const RESERVED_CHARS: &[char] = &[':', '#', '@', '*'];

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || RESERVED_CHARS.contains(&c))
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| c.is_whitespace() || c == '#' || c == '@')
}

/// Validates a type or relation name.
pub fn validate_name(name: &str) -> bool {
    is_valid_name(name)
}

/// An object identifier (e.g., "document:readme").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// The type portion (e.g., "document").
    pub object_type: String,
    /// The ID portion (e.g., "readme").
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parses an object from "type:id" format.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidObjectFormat {
            value: value.to_string(),
        };
        let (object_type, object_id) = value.split_once(':').ok_or_else(invalid)?;
        if !is_valid_name(object_type) || !is_valid_id(object_id) || object_id == "*" {
            return Err(invalid());
        }
        Ok(Self::new(object_type, object_id))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// The user side of a tuple or query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserRef {
    /// A concrete object, `type:id`.
    Object { user_type: String, user_id: String },
    /// Every object of a type, `type:*`.
    Wildcard { user_type: String },
    /// The members of another object's relation, `type:id#relation`.
    Userset {
        user_type: String,
        user_id: String,
        relation: String,
    },
}

impl UserRef {
    pub fn object(user_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        UserRef::Object {
            user_type: user_type.into(),
            user_id: user_id.into(),
        }
    }

    pub fn wildcard(user_type: impl Into<String>) -> Self {
        UserRef::Wildcard {
            user_type: user_type.into(),
        }
    }

    pub fn userset(
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        UserRef::Userset {
            user_type: user_type.into(),
            user_id: user_id.into(),
            relation: relation.into(),
        }
    }

    /// Parses `type:id`, `type:*`, or `type:id#relation`.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidUserFormat {
            value: value.to_string(),
        };
        let (user_type, rest) = value.split_once(':').ok_or_else(invalid)?;
        if !is_valid_name(user_type) {
            return Err(invalid());
        }
        if rest == "*" {
            return Ok(UserRef::wildcard(user_type));
        }
        match rest.split_once('#') {
            Some((user_id, relation)) => {
                if !is_valid_id(user_id) || user_id == "*" || !is_valid_name(relation) {
                    return Err(invalid());
                }
                Ok(UserRef::userset(user_type, user_id, relation))
            }
            None => {
                if !is_valid_id(rest) {
                    return Err(invalid());
                }
                Ok(UserRef::object(user_type, rest))
            }
        }
    }

    pub fn user_type(&self) -> &str {
        match self {
            UserRef::Object { user_type, .. }
            | UserRef::Wildcard { user_type }
            | UserRef::Userset { user_type, .. } => user_type,
        }
    }

    /// The id portion; `*` for wildcards.
    pub fn user_id(&self) -> &str {
        match self {
            UserRef::Object { user_id, .. } | UserRef::Userset { user_id, .. } => user_id,
            UserRef::Wildcard { .. } => "*",
        }
    }

    pub fn relation(&self) -> Option<&str> {
        match self {
            UserRef::Userset { relation, .. } => Some(relation),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, UserRef::Wildcard { .. })
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Object { user_type, user_id } => write!(f, "{user_type}:{user_id}"),
            UserRef::Wildcard { user_type } => write!(f, "{user_type}:*"),
            UserRef::Userset {
                user_type,
                user_id,
                relation,
            } => write!(f, "{user_type}:{user_id}#{relation}"),
        }
    }
}

/// A relationship tuple as callers write it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    pub object: String,
    pub relation: String,
    pub user: String,
}

impl TupleKey {
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
        }
    }

    /// Parses the object and user components.
    pub fn parse(&self) -> DomainResult<(ObjectRef, UserRef)> {
        if !is_valid_name(&self.relation) {
            return Err(DomainError::InvalidRelationFormat {
                value: self.relation.clone(),
            });
        }
        Ok((ObjectRef::parse(&self.object)?, UserRef::parse(&self.user)?))
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// One entry of a relation's directly-assignable types: `user`, `user:*`,
/// or `group#member`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeConstraint {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

impl TypeConstraint {
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: false,
        }
    }

    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: true,
        }
    }

    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
            wildcard: false,
        }
    }

    /// Whether a user of this shape may be written directly on the relation.
    pub fn admits(&self, user: &UserRef) -> bool {
        if self.type_name != user.user_type() {
            return false;
        }
        match user {
            UserRef::Object { .. } => !self.wildcard && self.relation.is_none(),
            UserRef::Wildcard { .. } => self.wildcard,
            UserRef::Userset { relation, .. } => self.relation.as_deref() == Some(relation),
        }
    }
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.relation, self.wildcard) {
            (Some(rel), _) => write!(f, "{}#{}", self.type_name, rel),
            (None, true) => write!(f, "{}:*", self.type_name),
            (None, false) => write!(f, "{}", self.type_name),
        }
    }
}

/// A relation's rewrite expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Userset {
    /// Direct tuples on the relation.
    This,
    /// Another relation on the same object.
    ComputedUserset { relation: String },
    /// `computed_userset from tupleset`: follow the tupleset relation to
    /// related objects, then evaluate `computed_userset` on each.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
    Union { children: Vec<Userset> },
    Intersection { children: Vec<Userset> },
    /// `base but not subtract`.
    Exclusion {
        base: Box<Userset>,
        subtract: Box<Userset>,
    },
}

/// A relation definition within a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    /// Directly assignable user types. Empty means unrestricted.
    #[serde(default)]
    pub type_constraints: Vec<TypeConstraint>,
    pub rewrite: Userset,
}

impl RelationDefinition {
    /// Whether any constraint admits the user; empty constraints admit all.
    pub fn admits(&self, user: &UserRef) -> bool {
        self.type_constraints.is_empty() || self.type_constraints.iter().any(|c| c.admits(user))
    }
}

/// A type definition in the authorization model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub type_name: String,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

/// An authorization model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub schema_version: String,
    pub type_definitions: Vec<TypeDefinition>,
}

impl AuthorizationModel {
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            id: None,
            schema_version: schema_version.into(),
            type_definitions: Vec::new(),
        }
    }

    pub fn with_types(
        schema_version: impl Into<String>,
        type_definitions: Vec<TypeDefinition>,
    ) -> Self {
        Self {
            id: None,
            schema_version: schema_version.into(),
            type_definitions,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}
