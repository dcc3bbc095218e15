//! DSL loader for authorization models.
//!
//! Accepts the subset of the modeling DSL that the engine's rewrite operators
//! can express, mostly so fixtures and tests can state models compactly:
//!
//! ```text
//! model
//!   schema 1.1
//!
//! type user
//!
//! type document
//!   relations
//!     define owner: [user]
//!     define parent: [folder]
//!     define viewer: [user, user:*, group#member] or owner or viewer from parent
//!     define auditor: (viewer and approved) but not blocked
//! ```
//!
//! Precedence, tightest first: `but not`, `and`, `or`. Parentheses group.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace1, space0, space1},
    combinator::{all_consuming, map, opt, value},
    error::{context, ContextError, ParseError},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::{AuthorizationModel, RelationDefinition, TypeConstraint, TypeDefinition, Userset};
use crate::error::DomainError;

const DEFAULT_SCHEMA_VERSION: &str = "1.1";

/// Parser error type with context for better error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
}

impl ParserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParserError {}

impl From<ParserError> for DomainError {
    fn from(err: ParserError) -> Self {
        DomainError::ModelParseError {
            message: err.message,
        }
    }
}

/// Result type for parser operations.
pub type ParserResult<T> = Result<T, ParserError>;

/// Relation expression before type restrictions are lifted out of it.
#[derive(Debug, Clone)]
enum Expr {
    Direct(Vec<TypeConstraint>),
    Computed(String),
    TupleToUserset { computed: String, tupleset: String },
    Union(Vec<Expr>),
    Intersection(Vec<Expr>),
    Exclusion(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Lowers to a rewrite, collecting every `[...]` restriction on the way.
    fn lower(self, constraints: &mut Vec<TypeConstraint>) -> Userset {
        match self {
            Expr::Direct(types) => {
                constraints.extend(types);
                Userset::This
            }
            Expr::Computed(relation) => Userset::ComputedUserset { relation },
            Expr::TupleToUserset { computed, tupleset } => Userset::TupleToUserset {
                tupleset,
                computed_userset: computed,
            },
            Expr::Union(children) => Userset::Union {
                children: children.into_iter().map(|c| c.lower(constraints)).collect(),
            },
            Expr::Intersection(children) => Userset::Intersection {
                children: children.into_iter().map(|c| c.lower(constraints)).collect(),
            },
            Expr::Exclusion(base, subtract) => Userset::Exclusion {
                base: Box::new(base.lower(constraints)),
                subtract: Box::new(subtract.lower(constraints)),
            },
        }
    }
}

// ============ Helper Parsers ============

fn comment<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, (), E> {
    value((), pair(char('#'), take_while(|c| c != '\n' && c != '\r')))(input)
}

/// Whitespace, newlines and comments.
fn ws<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, (), E> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

const RESERVED_KEYWORDS: &[&str] = &[
    "model",
    "schema",
    "type",
    "relations",
    "define",
    "or",
    "and",
    "but",
    "not",
    "from",
];

fn identifier<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, &'a str, E> {
    let (rest, id) = take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)?;
    if RESERVED_KEYWORDS.contains(&id) {
        return Err(nom::Err::Error(E::from_error_kind(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, id))
}

fn keyword<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    word: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    context(word, tag(word))
}

// ============ Type Restrictions ============

/// `user`, `user:*` or `group#member`.
fn type_restriction<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, TypeConstraint, E> {
    let (rest, type_name) = identifier(input)?;
    let (rest, suffix) = opt(alt((
        map(tag(":*"), |_| None),
        map(preceded(char('#'), identifier), Some),
    )))(rest)?;
    let constraint = match suffix {
        None => TypeConstraint::direct(type_name),
        Some(None) => TypeConstraint::wildcard(type_name),
        Some(Some(relation)) => TypeConstraint::userset(type_name, relation),
    };
    Ok((rest, constraint))
}

fn direct<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    context(
        "type restriction",
        map(
            delimited(
                pair(char('['), space0),
                separated_list1(tuple((space0, char(','), space0)), type_restriction),
                pair(space0, char(']')),
            ),
            Expr::Direct,
        ),
    )(input)
}

// ============ Expressions ============

fn tuple_to_userset<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    map(
        tuple((identifier, space1, tag("from"), space1, identifier)),
        |(computed, _, _, _, tupleset): (&str, _, _, _, &str)| Expr::TupleToUserset {
            computed: computed.to_string(),
            tupleset: tupleset.to_string(),
        },
    )(input)
}

fn computed<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    map(identifier, |name: &str| Expr::Computed(name.to_string()))(input)
}

fn grouped<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    delimited(pair(char('('), space0), expression, pair(space0, char(')')))(input)
}

fn atom<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    alt((direct, grouped, tuple_to_userset, computed))(input)
}

fn exclusion_level<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (rest, base) = atom(input)?;
    let (rest, subtract) = opt(preceded(
        tuple((space1, tag("but"), space1, tag("not"), space1)),
        atom,
    ))(rest)?;
    Ok(match subtract {
        Some(subtract) => (rest, Expr::Exclusion(Box::new(base), Box::new(subtract))),
        None => (rest, base),
    })
}

fn intersection_level<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (rest, first) = exclusion_level(input)?;
    let (rest, others) = many0(preceded(
        tuple((space1, tag("and"), space1)),
        exclusion_level,
    ))(rest)?;
    if others.is_empty() {
        return Ok((rest, first));
    }
    let mut children = vec![first];
    children.extend(others);
    Ok((rest, Expr::Intersection(children)))
}

fn expression<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (rest, first) = intersection_level(input)?;
    let (rest, others) = many0(preceded(
        tuple((space1, tag("or"), space1)),
        intersection_level,
    ))(rest)?;
    if others.is_empty() {
        return Ok((rest, first));
    }
    let mut children = vec![first];
    children.extend(others);
    Ok((rest, Expr::Union(children)))
}

// ============ Definitions ============

fn relation_definition<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, RelationDefinition, E> {
    context(
        "relation definition",
        map(
            tuple((
                keyword("define"),
                space1,
                identifier,
                space0,
                char(':'),
                space0,
                expression,
                space0,
            )),
            |(_, _, name, _, _, _, expr, _): (_, _, &str, _, _, _, Expr, _)| {
                let mut type_constraints = Vec::new();
                let rewrite = expr.lower(&mut type_constraints);
                RelationDefinition {
                    name: name.to_string(),
                    type_constraints,
                    rewrite,
                }
            },
        ),
    )(input)
}

fn type_definition<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, TypeDefinition, E> {
    context(
        "type definition",
        map(
            tuple((
                keyword("type"),
                space1,
                identifier,
                ws,
                opt(preceded(
                    pair(keyword("relations"), ws),
                    many0(terminated(relation_definition, ws)),
                )),
            )),
            |(_, _, type_name, _, relations): (_, _, &str, _, _)| TypeDefinition {
                type_name: type_name.to_string(),
                relations: relations.unwrap_or_default(),
            },
        ),
    )(input)
}

/// Optional `model / schema 1.1` header.
fn model_header<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, &'a str, E> {
    context(
        "model header",
        preceded(
            tuple((keyword("model"), ws, keyword("schema"), space1)),
            take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        ),
    )(input)
}

fn model<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, AuthorizationModel, E> {
    context(
        "authorization model",
        map(
            tuple((
                ws,
                opt(terminated(model_header, ws)),
                many0(terminated(type_definition, ws)),
            )),
            |(_, schema, type_definitions)| {
                AuthorizationModel::with_types(
                    schema.unwrap_or(DEFAULT_SCHEMA_VERSION),
                    type_definitions,
                )
            },
        ),
    )(input)
}

/// Parses a DSL string into an unvalidated [`AuthorizationModel`].
pub fn parse(input: &str) -> ParserResult<AuthorizationModel> {
    match all_consuming(model::<nom::error::VerboseError<&str>>)(input) {
        Ok((_, model)) => Ok(model),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParserError::new(format!(
            "parse error: {}",
            nom::error::convert_error(input, e)
        ))),
        Err(nom::Err::Incomplete(_)) => Err(ParserError::new("incomplete input")),
    }
}
