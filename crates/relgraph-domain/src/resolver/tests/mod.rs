//! Tests for the graph resolver module.
//!
//! Organized by query:
//! - Check: direct, computed, tuple-to-userset, operators, safety limits
//! - Expand
//! - ListObjects / ReverseExpand
//! - ListUsers

mod mocks;


/// Model shared by most resolver tests.
pub(crate) const DOCS_MODEL: &str = r#"
model
  schema 1.1

type user

type group
  relations
    define member: [user, group#member]

type folder
  relations
    define parent: [folder]
    define viewer: [user] or viewer from parent

type document
  relations
    define owner: [user]
    define parent: [folder]
    define editor: [user] or owner
    define viewer: [user, user:*, group#member] or editor or viewer from parent
    define approved: [user]
    define blocked: [user]
    define reviewer: viewer and approved
    define auditor: reviewer but not blocked
    define commenter: viewer but not blocked
"#;
