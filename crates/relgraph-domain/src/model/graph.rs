//! Reverse relation graph used by ReverseExpand.
//!
//! Nodes are `(type, relation?)` pairs. A node without a relation stands for
//! a concrete object of that type; a node with one stands for the members of
//! `type:id#relation`. Every edge leaving a node names a `(type, relation)`
//! the node's members can be placed into, and how to find the objects.

use std::collections::HashMap;

use super::types::{AuthorizationModel, RelationDefinition, Userset};

/// How a fact propagates along an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Tuples `(target_type, target_relation, X:id)`.
    Direct,
    /// Tuples `(target_type, target_relation, X:*)`.
    DirectWildcard,
    /// Tuples `(target_type, target_relation, X:id#Y)`.
    Userset,
    /// Same object, another relation. No read.
    Computed,
    /// Tuples `(target_type, tupleset, X:id)`.
    TupleToUserset { tupleset: String },
}

/// An edge out of a `(type, relation?)` node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationEdge {
    pub kind: EdgeKind,
    pub target_type: String,
    pub target_relation: String,
    /// Set when the edge sits under an intersection or an exclusion base,
    /// so objects reached through it still need a full check.
    pub conditional: bool,
}

type NodeKey = (String, Option<String>);

/// Precomputed reverse edges of a model.
#[derive(Debug, Default, Clone)]
pub struct RelationGraph {
    edges: HashMap<NodeKey, Vec<RelationEdge>>,
}

impl RelationGraph {
    /// Builds the graph. The model is expected to be validated.
    pub fn build(model: &AuthorizationModel) -> Self {
        let mut builder = GraphBuilder {
            model,
            graph: RelationGraph::default(),
        };
        for type_def in &model.type_definitions {
            for relation_def in &type_def.relations {
                builder.walk(
                    &type_def.type_name,
                    relation_def,
                    &relation_def.rewrite,
                    false,
                );
            }
        }
        builder.graph
    }

    /// Edges leaving `(type_name, relation)`.
    pub fn edges_from(&self, type_name: &str, relation: Option<&str>) -> &[RelationEdge] {
        self.edges
            .get(&(type_name.to_string(), relation.map(str::to_string)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn add(&mut self, source: NodeKey, edge: RelationEdge) {
        let edges = self.edges.entry(source).or_default();
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }
}

struct GraphBuilder<'m> {
    model: &'m AuthorizationModel,
    graph: RelationGraph,
}

impl<'m> GraphBuilder<'m> {
    fn walk(
        &mut self,
        type_name: &str,
        relation_def: &RelationDefinition,
        userset: &Userset,
        conditional: bool,
    ) {
        let edge = |kind: EdgeKind| RelationEdge {
            kind,
            target_type: type_name.to_string(),
            target_relation: relation_def.name.clone(),
            conditional,
        };

        match userset {
            Userset::This => {
                if relation_def.type_constraints.is_empty() {
                    for other in &self.model.type_definitions {
                        let source = other.type_name.clone();
                        self.graph.add((source.clone(), None), edge(EdgeKind::Direct));
                        self.graph
                            .add((source.clone(), None), edge(EdgeKind::DirectWildcard));
                        for rel in &other.relations {
                            self.graph.add(
                                (source.clone(), Some(rel.name.clone())),
                                edge(EdgeKind::Userset),
                            );
                        }
                    }
                    return;
                }
                for constraint in &relation_def.type_constraints {
                    let (source, kind) = match (&constraint.relation, constraint.wildcard) {
                        (Some(rel), _) => (
                            (constraint.type_name.clone(), Some(rel.clone())),
                            EdgeKind::Userset,
                        ),
                        (None, true) => ((constraint.type_name.clone(), None), EdgeKind::DirectWildcard),
                        (None, false) => ((constraint.type_name.clone(), None), EdgeKind::Direct),
                    };
                    self.graph.add(source, edge(kind));
                }
            }
            Userset::ComputedUserset { relation } => {
                self.graph.add(
                    (type_name.to_string(), Some(relation.clone())),
                    edge(EdgeKind::Computed),
                );
            }
            Userset::TupleToUserset {
                tupleset,
                computed_userset,
            } => {
                for parent in self.tupleset_parents(type_name, tupleset, computed_userset) {
                    self.graph.add(
                        (parent, Some(computed_userset.clone())),
                        edge(EdgeKind::TupleToUserset {
                            tupleset: tupleset.clone(),
                        }),
                    );
                }
            }
            Userset::Union { children } => {
                for child in children {
                    self.walk(type_name, relation_def, child, conditional);
                }
            }
            Userset::Intersection { children } => {
                for child in children {
                    self.walk(type_name, relation_def, child, true);
                }
            }
            // Subtract branches never place a user into the relation.
            Userset::Exclusion { base, .. } => {
                self.walk(type_name, relation_def, base, true);
            }
        }
    }

    /// Types a tupleset can point at that define the computed relation.
    fn tupleset_parents(&self, type_name: &str, tupleset: &str, computed: &str) -> Vec<String> {
        let defines = |t: &str| {
            self.model
                .type_definitions
                .iter()
                .any(|td| td.type_name == t && td.relations.iter().any(|r| r.name == computed))
        };
        let constraints = self
            .model
            .type_definitions
            .iter()
            .find(|td| td.type_name == type_name)
            .and_then(|td| td.relations.iter().find(|r| r.name == tupleset))
            .map(|r| r.type_constraints.as_slice())
            .unwrap_or(&[]);

        let mut parents: Vec<String> = if constraints.is_empty() {
            self.model
                .type_definitions
                .iter()
                .map(|td| td.type_name.clone())
                .filter(|t| defines(t))
                .collect()
        } else {
            constraints
                .iter()
                .filter(|c| c.relation.is_none() && !c.wildcard && defines(&c.type_name))
                .map(|c| c.type_name.clone())
                .collect()
        };
        parents.dedup();
        parents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse;

    fn graph(dsl: &str) -> RelationGraph {
        RelationGraph::build(&parse(dsl).unwrap())
    }

    fn edge(kind: EdgeKind, t: &str, r: &str, conditional: bool) -> RelationEdge {
        RelationEdge {
            kind,
            target_type: t.to_string(),
            target_relation: r.to_string(),
            conditional,
        }
    }

    #[test]
    fn test_direct_restrictions_become_edges() {
        let g = graph(
            r#"
type user
type group
  relations
    define member: [user, user:*, group#member]
"#,
        );
        assert_eq!(
            g.edges_from("user", None),
            &[
                edge(EdgeKind::Direct, "group", "member", false),
                edge(EdgeKind::DirectWildcard, "group", "member", false),
            ]
        );
        assert_eq!(
            g.edges_from("group", Some("member")),
            &[edge(EdgeKind::Userset, "group", "member", false)]
        );
    }

    #[test]
    fn test_computed_and_tuple_to_userset_edges() {
        let g = graph(
            r#"
type user
type folder
  relations
    define viewer: [user]
type document
  relations
    define parent: [folder]
    define owner: [user]
    define viewer: owner or viewer from parent
"#,
        );
        assert_eq!(
            g.edges_from("document", Some("owner")),
            &[edge(EdgeKind::Computed, "document", "viewer", false)]
        );
        assert_eq!(
            g.edges_from("folder", Some("viewer")),
            &[edge(
                EdgeKind::TupleToUserset {
                    tupleset: "parent".to_string()
                },
                "document",
                "viewer",
                false
            )]
        );
    }

    #[test]
    fn test_intersection_and_exclusion_edges_are_conditional() {
        let g = graph(
            r#"
type user
type document
  relations
    define allowed: [user]
    define blocked: [user]
    define editor: [user] and allowed
    define viewer: [user] but not blocked
"#,
        );
        let from_user = g.edges_from("user", None);
        assert!(from_user.contains(&edge(EdgeKind::Direct, "document", "editor", true)));
        assert!(from_user.contains(&edge(EdgeKind::Direct, "document", "viewer", true)));
        assert!(from_user.contains(&edge(EdgeKind::Direct, "document", "allowed", false)));
        assert_eq!(
            g.edges_from("document", Some("allowed")),
            &[edge(EdgeKind::Computed, "document", "editor", true)]
        );
        // Subtract side contributes nothing.
        assert!(g.edges_from("document", Some("blocked")).is_empty());
    }

    #[test]
    fn test_unknown_node_has_no_edges() {
        let g = graph("type user");
        assert!(g.edges_from("user", None).is_empty());
        assert!(g.edges_from("nope", Some("x")).is_empty());
    }
}
