//! Authorization model validation.
//!
//! Validates that authorization models are semantically correct:
//! - Names are well formed and unique
//! - All referenced types and relations exist
//! - Tuple-to-userset tuplesets are plain direct relations
//! - No relation is defined purely in terms of itself

use std::collections::{HashMap, HashSet};

use crate::error::{DomainError, DomainResult};
use crate::model::{validate_name, AuthorizationModel, TypeConstraint, TypeDefinition, Userset};

/// Validation error types
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Empty model (no type definitions)
    EmptyModel,
    /// A type or relation name is empty or contains reserved characters
    InvalidName { name: String },
    /// The same type is defined twice
    DuplicateType { type_name: String },
    /// The same relation is defined twice on a type
    DuplicateRelation {
        type_name: String,
        relation_name: String,
    },
    /// A relation is defined only through computed usersets that lead back to it
    CyclicRelation {
        type_name: String,
        relation_name: String,
        cycle_path: Vec<String>,
    },
    /// A referenced relation does not exist
    UndefinedRelation {
        type_name: String,
        relation_name: String,
        referenced_relation: String,
    },
    /// Type constraint references an undefined type or relation
    InvalidTypeConstraint {
        type_name: String,
        relation_name: String,
        invalid_type: String,
    },
    /// A tuple-to-userset names a tupleset that cannot be followed
    InvalidTupleset {
        type_name: String,
        relation_name: String,
        tupleset: String,
        reason: String,
    },
    /// Union or intersection without children
    EmptyOperator {
        type_name: String,
        relation_name: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyModel => {
                write!(f, "model must have at least one type definition")
            }
            ValidationError::InvalidName { name } => write!(f, "invalid name '{}'", name),
            ValidationError::DuplicateType { type_name } => {
                write!(f, "type '{}' is defined more than once", type_name)
            }
            ValidationError::DuplicateRelation {
                type_name,
                relation_name,
            } => write!(
                f,
                "relation '{}' is defined more than once on type '{}'",
                relation_name, type_name
            ),
            ValidationError::CyclicRelation {
                type_name,
                relation_name,
                cycle_path,
            } => write!(
                f,
                "cyclic relation definition in {}#{}: {}",
                type_name,
                relation_name,
                cycle_path.join(" -> ")
            ),
            ValidationError::UndefinedRelation {
                type_name,
                relation_name,
                referenced_relation,
            } => write!(
                f,
                "undefined relation '{}' referenced in {}#{}",
                referenced_relation, type_name, relation_name
            ),
            ValidationError::InvalidTypeConstraint {
                type_name,
                relation_name,
                invalid_type,
            } => write!(
                f,
                "invalid type constraint '{}' in {}#{}",
                invalid_type, type_name, relation_name
            ),
            ValidationError::InvalidTupleset {
                type_name,
                relation_name,
                tupleset,
                reason,
            } => write!(
                f,
                "invalid tupleset '{}' in {}#{}: {}",
                tupleset, type_name, relation_name, reason
            ),
            ValidationError::EmptyOperator {
                type_name,
                relation_name,
            } => write!(
                f,
                "union or intersection without children in {}#{}",
                type_name, relation_name
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

/// Model validator
pub struct ModelValidator<'m> {
    model: &'m AuthorizationModel,
    /// Relations defined on each type, by name.
    types: HashMap<&'m str, &'m TypeDefinition>,
}

impl<'m> ModelValidator<'m> {
    /// Create a new validator for the given model
    pub fn new(model: &'m AuthorizationModel) -> Self {
        let mut types = HashMap::new();
        for type_def in &model.type_definitions {
            types.entry(type_def.type_name.as_str()).or_insert(type_def);
        }
        Self { model, types }
    }

    /// Validate the model and return every error found
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.model.type_definitions.is_empty() {
            errors.push(ValidationError::EmptyModel);
            return Err(errors);
        }

        let mut seen_types = HashSet::new();
        for type_def in &self.model.type_definitions {
            if !validate_name(&type_def.type_name) {
                errors.push(ValidationError::InvalidName {
                    name: type_def.type_name.clone(),
                });
            }
            if !seen_types.insert(type_def.type_name.as_str()) {
                errors.push(ValidationError::DuplicateType {
                    type_name: type_def.type_name.clone(),
                });
            }
            self.validate_type_definition(type_def, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_type_definition(
        &self,
        type_def: &TypeDefinition,
        errors: &mut Vec<ValidationError>,
    ) {
        let mut seen_relations = HashSet::new();
        for relation_def in &type_def.relations {
            if !validate_name(&relation_def.name) {
                errors.push(ValidationError::InvalidName {
                    name: relation_def.name.clone(),
                });
            }
            if !seen_relations.insert(relation_def.name.as_str()) {
                errors.push(ValidationError::DuplicateRelation {
                    type_name: type_def.type_name.clone(),
                    relation_name: relation_def.name.clone(),
                });
            }

            self.validate_type_constraints(
                &type_def.type_name,
                &relation_def.name,
                &relation_def.type_constraints,
                errors,
            );
            self.validate_userset(
                &type_def.type_name,
                &relation_def.name,
                &relation_def.rewrite,
                errors,
            );
        }

        if let Some((relation_name, cycle_path)) = detect_cycle_in_type(type_def) {
            errors.push(ValidationError::CyclicRelation {
                type_name: type_def.type_name.clone(),
                relation_name,
                cycle_path,
            });
        }
    }

    /// Validate type restrictions (`[user]`, `[user:*]`, `[group#member]`)
    fn validate_type_constraints(
        &self,
        type_name: &str,
        relation_name: &str,
        constraints: &[TypeConstraint],
        errors: &mut Vec<ValidationError>,
    ) {
        for constraint in constraints {
            let valid = match &constraint.relation {
                Some(relation) => self.relation_exists(&constraint.type_name, relation),
                None => self.type_exists(&constraint.type_name),
            };
            if !valid {
                errors.push(ValidationError::InvalidTypeConstraint {
                    type_name: type_name.to_string(),
                    relation_name: relation_name.to_string(),
                    invalid_type: constraint.to_string(),
                });
            }
        }
    }

    fn validate_userset(
        &self,
        type_name: &str,
        relation_name: &str,
        userset: &Userset,
        errors: &mut Vec<ValidationError>,
    ) {
        match userset {
            Userset::This => {}
            Userset::ComputedUserset { relation } => {
                if !self.relation_exists(type_name, relation) {
                    errors.push(ValidationError::UndefinedRelation {
                        type_name: type_name.to_string(),
                        relation_name: relation_name.to_string(),
                        referenced_relation: relation.clone(),
                    });
                }
            }
            Userset::TupleToUserset {
                tupleset,
                computed_userset,
            } => self.validate_tupleset(type_name, relation_name, tupleset, computed_userset, errors),
            Userset::Union { children } | Userset::Intersection { children } => {
                if children.is_empty() {
                    errors.push(ValidationError::EmptyOperator {
                        type_name: type_name.to_string(),
                        relation_name: relation_name.to_string(),
                    });
                }
                for child in children {
                    self.validate_userset(type_name, relation_name, child, errors);
                }
            }
            Userset::Exclusion { base, subtract } => {
                self.validate_userset(type_name, relation_name, base, errors);
                self.validate_userset(type_name, relation_name, subtract, errors);
            }
        }
    }

    fn validate_tupleset(
        &self,
        type_name: &str,
        relation_name: &str,
        tupleset: &str,
        computed_userset: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(tupleset_def) = self
            .types
            .get(type_name)
            .and_then(|t| t.relations.iter().find(|r| r.name == tupleset))
        else {
            errors.push(ValidationError::UndefinedRelation {
                type_name: type_name.to_string(),
                relation_name: relation_name.to_string(),
                referenced_relation: tupleset.to_string(),
            });
            return;
        };

        let invalid = |reason: &str| ValidationError::InvalidTupleset {
            type_name: type_name.to_string(),
            relation_name: relation_name.to_string(),
            tupleset: tupleset.to_string(),
            reason: reason.to_string(),
        };

        if tupleset_def.rewrite != Userset::This {
            errors.push(invalid("tupleset must be directly assignable only"));
            return;
        }
        if tupleset_def
            .type_constraints
            .iter()
            .any(|c| c.relation.is_some())
        {
            errors.push(invalid("tupleset cannot allow userset restrictions"));
            return;
        }

        // Unrestricted tuplesets may point at any type.
        let parent_defines = if tupleset_def.type_constraints.is_empty() {
            self.model
                .type_definitions
                .iter()
                .any(|t| t.relations.iter().any(|r| r.name == computed_userset))
        } else {
            tupleset_def
                .type_constraints
                .iter()
                .any(|c| self.relation_exists(&c.type_name, computed_userset))
        };
        if !parent_defines {
            errors.push(invalid(&format!(
                "no related type defines relation '{}'",
                computed_userset
            )));
        }
    }

    /// Check if a type exists in the model
    pub fn type_exists(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Check if a relation exists on a type
    pub fn relation_exists(&self, type_name: &str, relation_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|t| t.relations.iter().any(|r| r.name == relation_name))
    }
}

/// Validates a model, folding every problem into one error.
pub fn validate_model(model: &AuthorizationModel) -> DomainResult<()> {
    ModelValidator::new(model).validate().map_err(|errors| {
        DomainError::ModelValidationError {
            message: errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    })
}

/// Detect cycles of computed-userset references within one type
fn detect_cycle_in_type(type_def: &TypeDefinition) -> Option<(String, Vec<String>)> {
    let mut graph: HashMap<&str, HashSet<&str>> = HashMap::new();
    for rel_def in &type_def.relations {
        let mut refs = HashSet::new();
        collect_computed_relations(&rel_def.rewrite, &mut refs);
        graph.insert(rel_def.name.as_str(), refs);
    }

    // Sorted so the reported cycle is stable.
    let mut roots: Vec<&str> = graph.keys().copied().collect();
    roots.sort_unstable();

    let mut visited = HashSet::new();
    for root in roots {
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        if dfs_cycle_detect(root, &graph, &mut visited, &mut on_path, &mut path) {
            return Some((root.to_string(), path));
        }
    }
    None
}

/// Tuple-to-userset moves to another object and cannot cycle locally.
fn collect_computed_relations<'a>(userset: &'a Userset, refs: &mut HashSet<&'a str>) {
    match userset {
        Userset::This | Userset::TupleToUserset { .. } => {}
        Userset::ComputedUserset { relation } => {
            refs.insert(relation);
        }
        Userset::Union { children } | Userset::Intersection { children } => {
            for child in children {
                collect_computed_relations(child, refs);
            }
        }
        Userset::Exclusion { base, subtract } => {
            collect_computed_relations(base, refs);
            collect_computed_relations(subtract, refs);
        }
    }
}

fn dfs_cycle_detect<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, HashSet<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    if on_path.contains(node) {
        path.push(node.to_string());
        return true;
    }
    if !visited.insert(node) {
        return false;
    }

    on_path.insert(node);
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        let mut neighbors: Vec<&str> = neighbors.iter().copied().collect();
        neighbors.sort_unstable();
        for neighbor in neighbors {
            if dfs_cycle_detect(neighbor, graph, visited, on_path, path) {
                return true;
            }
        }
    }

    on_path.remove(node);
    path.pop();
    false
}
