//! Validated, indexed view of one authorization model version.

use std::collections::HashMap;

use crate::error::{DomainError, DomainResult};
use crate::validation::validate_model;

use super::graph::RelationGraph;
use super::types::{
    AuthorizationModel, ObjectRef, RelationDefinition, TupleKey, TypeDefinition, UserRef, Userset,
};

/// Immutable lookup structure for a validated model.
///
/// Built once per model version and shared read-only (behind `Arc`) by every
/// query pinned to that version.
///
/// # Example
///
/// ```ignore
/// use relgraph_domain::model::{parse, TypeSystem};
///
/// let model = parse("type user\ntype document\n  relations\n    define viewer: [user]")?;
/// let type_system = TypeSystem::new(model)?;
/// let viewer = type_system.get_relation("document", "viewer")?;
/// ```
#[derive(Debug)]
pub struct TypeSystem {
    model: AuthorizationModel,
    /// Index into `model.type_definitions`, by type name.
    types: HashMap<String, usize>,
    /// Index into the type's relations, by `(type, relation)`.
    relations: HashMap<(String, String), (usize, usize)>,
    graph: RelationGraph,
}

impl TypeSystem {
    /// Validates the model and builds its indexes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ModelValidationError` listing every problem.
    pub fn new(model: AuthorizationModel) -> DomainResult<Self> {
        validate_model(&model)?;

        let mut types = HashMap::new();
        let mut relations = HashMap::new();
        for (type_idx, type_def) in model.type_definitions.iter().enumerate() {
            types.insert(type_def.type_name.clone(), type_idx);
            for (rel_idx, relation_def) in type_def.relations.iter().enumerate() {
                relations.insert(
                    (type_def.type_name.clone(), relation_def.name.clone()),
                    (type_idx, rel_idx),
                );
            }
        }
        let graph = RelationGraph::build(&model);

        Ok(Self {
            model,
            types,
            relations,
            graph,
        })
    }

    /// Model id, once the model has been stored.
    pub fn id(&self) -> Option<&str> {
        self.model.id.as_deref()
    }

    pub fn model(&self) -> &AuthorizationModel {
        &self.model
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    /// # Errors
    ///
    /// Returns `DomainError::TypeNotFound` if the type does not exist.
    pub fn get_type(&self, type_name: &str) -> DomainResult<&TypeDefinition> {
        self.types
            .get(type_name)
            .map(|&idx| &self.model.type_definitions[idx])
            .ok_or_else(|| DomainError::TypeNotFound {
                type_name: type_name.to_string(),
            })
    }

    /// # Errors
    ///
    /// Returns `DomainError::TypeNotFound` if the type does not exist, or
    /// `DomainError::RelationNotFound` if the relation does not exist on it.
    pub fn get_relation(&self, type_name: &str, relation: &str) -> DomainResult<&RelationDefinition> {
        if let Some(&(type_idx, rel_idx)) = self
            .relations
            .get(&(type_name.to_string(), relation.to_string()))
        {
            return Ok(&self.model.type_definitions[type_idx].relations[rel_idx]);
        }
        self.get_type(type_name)?;
        Err(DomainError::RelationNotFound {
            type_name: type_name.to_string(),
            relation: relation.to_string(),
        })
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.relations
            .contains_key(&(type_name.to_string(), relation.to_string()))
    }

    /// Checks that a query's user refers to something the model knows.
    pub fn validate_user(&self, user: &UserRef) -> DomainResult<()> {
        match user.relation() {
            Some(relation) => self.get_relation(user.user_type(), relation).map(|_| ()),
            None => self.get_type(user.user_type()).map(|_| ()),
        }
    }

    /// Validates a tuple about to be written.
    ///
    /// The object type, relation and user type must exist, and the relation
    /// must directly admit users of this shape.
    pub fn validate_tuple_for_write(&self, tuple: &TupleKey) -> DomainResult<(ObjectRef, UserRef)> {
        let (object, user) = self.validate_tuple_reference(tuple)?;
        let invalid = |reason: String| DomainError::InvalidTuple {
            tuple: tuple.to_string(),
            reason,
        };

        if self.validate_user(&user).is_err() {
            return Err(invalid(format!("user '{}' is not defined in the model", user)));
        }

        let relation_def = self.get_relation(&object.object_type, &tuple.relation)?;
        if !contains_this(&relation_def.rewrite) {
            return Err(invalid(format!(
                "relation '{}#{}' is not directly assignable",
                object.object_type, tuple.relation
            )));
        }
        if !relation_def.admits(&user) {
            return Err(invalid(format!(
                "type '{}' is not an allowed type restriction for '{}#{}'",
                user_shape(&user),
                object.object_type,
                tuple.relation
            )));
        }

        Ok((object, user))
    }

    /// Validates that a tuple names an existing object type and relation.
    ///
    /// Used for deletes, which only need to refer to something the model
    /// still knows about.
    pub fn validate_tuple_reference(&self, tuple: &TupleKey) -> DomainResult<(ObjectRef, UserRef)> {
        let (object, user) = tuple.parse()?;
        if !self.has_relation(&object.object_type, &tuple.relation) {
            return Err(DomainError::InvalidTuple {
                tuple: tuple.to_string(),
                reason: format!(
                    "relation '{}#{}' is not defined in the model",
                    object.object_type, tuple.relation
                ),
            });
        }
        Ok((object, user))
    }
}

fn contains_this(userset: &Userset) -> bool {
    match userset {
        Userset::This => true,
        Userset::ComputedUserset { .. } | Userset::TupleToUserset { .. } => false,
        Userset::Union { children } | Userset::Intersection { children } => {
            children.iter().any(contains_this)
        }
        Userset::Exclusion { base, subtract } => contains_this(base) || contains_this(subtract),
    }
}

/// `user`, `user:*` or `group#member`.
fn user_shape(user: &UserRef) -> String {
    match user {
        UserRef::Object { user_type, .. } => user_type.clone(),
        UserRef::Wildcard { user_type } => format!("{user_type}:*"),
        UserRef::Userset {
            user_type,
            relation,
            ..
        } => format!("{user_type}#{relation}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse;

    fn type_system() -> TypeSystem {
        let model = parse(
            r#"
type user
type group
  relations
    define member: [user, group#member]
type document
  relations
    define owner: [user]
    define public: [user:*]
    define viewer: [user, group#member] or owner
    define can_edit: owner
"#,
        )
        .unwrap();
        TypeSystem::new(model.with_id("01HMODEL")).unwrap()
    }

    #[test]
    fn test_lookups() {
        let ts = type_system();
        assert_eq!(ts.id(), Some("01HMODEL"));
        assert!(ts.has_type("document"));
        assert!(!ts.has_type("folder"));
        assert!(ts.has_relation("document", "viewer"));
        assert!(!ts.has_relation("document", "editor"));
        assert_eq!(ts.get_relation("document", "owner").unwrap().name, "owner");
        assert!(matches!(
            ts.get_relation("folder", "viewer"),
            Err(DomainError::TypeNotFound { .. })
        ));
        assert!(matches!(
            ts.get_relation("document", "editor"),
            Err(DomainError::RelationNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_model_is_rejected() {
        let model = parse("type document\n  relations\n    define viewer: editor").unwrap();
        assert!(matches!(
            TypeSystem::new(model),
            Err(DomainError::ModelValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_tuple_for_write_accepts_admitted_users() {
        let ts = type_system();
        for (relation, user) in [
            ("owner", "user:anne"),
            ("viewer", "group:eng#member"),
            ("public", "user:*"),
        ] {
            let tuple = TupleKey::new("document:1", relation, user);
            assert!(ts.validate_tuple_for_write(&tuple).is_ok(), "{tuple}");
        }
    }

    #[test]
    fn test_validate_tuple_for_write_rejects() {
        let ts = type_system();
        for (object, relation, user) in [
            ("document:1", "owner", "group:eng"),
            ("document:1", "owner", "user:*"),
            ("document:1", "public", "user:anne"),
            ("document:1", "editor", "user:anne"),
            ("folder:1", "viewer", "user:anne"),
            ("document:1", "viewer", "team:x"),
            ("document:1", "viewer", "group:eng#owner"),
            ("document:1", "can_edit", "user:anne"),
        ] {
            let tuple = TupleKey::new(object, relation, user);
            assert!(
                matches!(
                    ts.validate_tuple_for_write(&tuple),
                    Err(DomainError::InvalidTuple { .. })
                ),
                "{tuple}"
            );
        }
    }

    #[test]
    fn test_validate_tuple_reference_only_checks_relation() {
        let ts = type_system();
        assert!(ts
            .validate_tuple_reference(&TupleKey::new("document:1", "owner", "group:eng"))
            .is_ok());
        assert!(ts
            .validate_tuple_reference(&TupleKey::new("document:1", "editor", "user:anne"))
            .is_err());
        assert!(matches!(
            ts.validate_tuple_reference(&TupleKey::new("document", "owner", "user:anne")),
            Err(DomainError::InvalidObjectFormat { .. })
        ));
    }

    #[test]
    fn test_validate_user() {
        let ts = type_system();
        assert!(ts.validate_user(&UserRef::object("user", "anne")).is_ok());
        assert!(ts.validate_user(&UserRef::userset("group", "eng", "member")).is_ok());
        assert!(matches!(
            ts.validate_user(&UserRef::object("team", "x")),
            Err(DomainError::TypeNotFound { .. })
        ));
        assert!(matches!(
            ts.validate_user(&UserRef::userset("group", "eng", "owner")),
            Err(DomainError::RelationNotFound { .. })
        ));
    }
}
