//! Scalar filter expressions over non-vector fields.
//!
//! Filters are written in a small boolean language:
//!
//! ```text
//! doc_id == 'd1' and (metadata.category in ['faq', 'manual'] or not metadata.draft == true)
//! content like 'Intro%' && metadata.page >= 3
//! ```
//!
//! Fields are `id`, `doc_id`, `content` and `metadata.<key>[.<key>...]`.
//! Comparisons between values of different types are false, as are
//! comparisons against missing metadata keys. `!=` and `not in` are always
//! the negation of `==` and `in`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::{RagStoreError, Result};
use crate::vector::metadata::{self, Metadata, MetadataValue};
use crate::vector::schema::{CONTENT_FIELD, DOC_ID_FIELD, ID_FIELD, METADATA_FIELD};

pub mod parser;

pub use parser::FilterParser;

/// A filterable field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterField {
    Id,
    DocId,
    Content,
    /// Dotted path inside the metadata map.
    Metadata(Vec<String>),
}

impl FilterField {
    /// Resolve a dotted field name such as `doc_id` or `metadata.source.lang`.
    pub fn parse(name: &str) -> Result<Self> {
        let mut parts = name.split('.');
        let head = parts.next().unwrap_or_default();
        let rest: Vec<String> = parts.map(str::to_string).collect();

        match head {
            ID_FIELD if rest.is_empty() => Ok(FilterField::Id),
            DOC_ID_FIELD if rest.is_empty() => Ok(FilterField::DocId),
            CONTENT_FIELD if rest.is_empty() => Ok(FilterField::Content),
            METADATA_FIELD if !rest.is_empty() && rest.iter().all(|p| !p.is_empty()) => {
                Ok(FilterField::Metadata(rest))
            }
            METADATA_FIELD => Err(RagStoreError::validation(
                "metadata filters need a key, e.g. metadata.category",
            )),
            _ => Err(RagStoreError::validation(format!(
                "unknown filter field '{name}'"
            ))),
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterField::Id => f.write_str(ID_FIELD),
            FilterField::DocId => f.write_str(DOC_ID_FIELD),
            FilterField::Content => f.write_str(CONTENT_FIELD),
            FilterField::Metadata(path) => write!(f, "{METADATA_FIELD}.{}", path.join(".")),
        }
    }
}

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    String(String),
    Number(f64),
    Bool(bool),
}

impl FilterLiteral {
    /// Convert a JSON scalar into a literal.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(FilterLiteral::String(s.clone())),
            Value::Bool(b) => Ok(FilterLiteral::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(FilterLiteral::Number)
                .ok_or_else(|| RagStoreError::validation(format!("unsupported number {n}"))),
            other => Err(RagStoreError::validation(format!(
                "unsupported filter value {other}"
            ))),
        }
    }

    fn compare(&self, value: &FieldValue<'_>) -> Option<Ordering> {
        match (value, self) {
            (FieldValue::Text(a), FilterLiteral::String(b)) => Some((*a).cmp(b.as_str())),
            (FieldValue::Meta(MetadataValue::String(a)), FilterLiteral::String(b)) => {
                Some(a.as_str().cmp(b.as_str()))
            }
            (FieldValue::Meta(MetadataValue::Number(a)), FilterLiteral::Number(b)) => {
                a.partial_cmp(b)
            }
            (FieldValue::Meta(MetadataValue::Bool(a)), FilterLiteral::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for FilterLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterLiteral::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            FilterLiteral::Number(n) => write!(f, "{n}"),
            FilterLiteral::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        field: FilterField,
        op: CompareOp,
        value: FilterLiteral,
    },
    In {
        field: FilterField,
        values: Vec<FilterLiteral>,
        negated: bool,
    },
    Like {
        field: FilterField,
        pattern: String,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

/// Read access to the scalar fields of a stored row.
pub trait FilterTarget {
    fn id(&self) -> &str;
    fn doc_id(&self) -> &str;
    fn content(&self) -> &str;
    /// Decoded metadata, or `None` when the stored blob is unreadable.
    fn metadata(&self) -> Option<&Metadata>;
}

enum FieldValue<'a> {
    Text(&'a str),
    Meta(&'a MetadataValue),
}

impl FilterExpr {
    /// Parse a filter expression.
    pub fn parse(input: &str) -> Result<Self> {
        FilterParser::new().parse(input)
    }

    /// `id in [..]`
    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterExpr::In {
            field: FilterField::Id,
            values: ids
                .into_iter()
                .map(|id| FilterLiteral::String(id.into()))
                .collect(),
            negated: false,
        }
    }

    /// `doc_id == '..'`
    pub fn doc_id_eq<S: Into<String>>(doc_id: S) -> Self {
        FilterExpr::Compare {
            field: FilterField::DocId,
            op: CompareOp::Eq,
            value: FilterLiteral::String(doc_id.into()),
        }
    }

    /// Build a conjunction of equality tests from a `field -> value` map.
    /// Array values become `in` tests. Returns `None` for an empty map.
    pub fn from_equality_map(filters: &BTreeMap<String, Value>) -> Result<Option<Self>> {
        let mut clauses = Vec::with_capacity(filters.len());
        for (name, value) in filters {
            let field = FilterField::parse(name)?;
            let clause = match value {
                Value::Array(items) => FilterExpr::In {
                    field,
                    values: items
                        .iter()
                        .map(FilterLiteral::from_json)
                        .collect::<Result<Vec<_>>>()?,
                    negated: false,
                },
                scalar => FilterExpr::Compare {
                    field,
                    op: CompareOp::Eq,
                    value: FilterLiteral::from_json(scalar)?,
                },
            };
            clauses.push(clause);
        }
        Ok(match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(FilterExpr::And(clauses)),
        })
    }

    /// Combine two optional filters with `and`.
    pub fn conjoin(left: Option<Self>, right: Option<Self>) -> Option<Self> {
        match (left, right) {
            (Some(FilterExpr::And(mut a)), Some(b)) => {
                a.push(b);
                Some(FilterExpr::And(a))
            }
            (Some(a), Some(b)) => Some(FilterExpr::And(vec![a, b])),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Evaluate the filter against one row.
    pub fn matches(&self, target: &dyn FilterTarget) -> bool {
        match self {
            FilterExpr::Compare { field, op, value } => {
                let ord = resolve(field, target).and_then(|v| value.compare(&v));
                match op {
                    CompareOp::Eq => ord == Some(Ordering::Equal),
                    CompareOp::Ne => ord != Some(Ordering::Equal),
                    CompareOp::Lt => ord == Some(Ordering::Less),
                    CompareOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                    CompareOp::Gt => ord == Some(Ordering::Greater),
                    CompareOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                }
            }
            FilterExpr::In {
                field,
                values,
                negated,
            } => {
                let found = resolve(field, target).is_some_and(|v| {
                    values
                        .iter()
                        .any(|lit| lit.compare(&v) == Some(Ordering::Equal))
                });
                found != *negated
            }
            FilterExpr::Like { field, pattern } => {
                let text = match resolve(field, target) {
                    Some(FieldValue::Text(s)) => Some(s),
                    Some(FieldValue::Meta(value)) => value.as_str(),
                    None => None,
                };
                text.is_some_and(|text| like_matches(pattern, text))
            }
            FilterExpr::And(clauses) => clauses.iter().all(|c| c.matches(target)),
            FilterExpr::Or(clauses) => clauses.iter().any(|c| c.matches(target)),
            FilterExpr::Not(inner) => !inner.matches(target),
        }
    }
}

fn resolve<'a>(field: &FilterField, target: &'a dyn FilterTarget) -> Option<FieldValue<'a>> {
    match field {
        FilterField::Id => Some(FieldValue::Text(target.id())),
        FilterField::DocId => Some(FieldValue::Text(target.doc_id())),
        FilterField::Content => Some(FieldValue::Text(target.content())),
        FilterField::Metadata(path) => target
            .metadata()
            .and_then(|m| metadata::lookup(m, path))
            .map(FieldValue::Meta),
    }
}

/// `%` matches any run of characters; everything else is literal.
fn like_matches(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return pattern == text;
    }

    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return false,
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return true,
    };
    for segment in middle {
        match remaining.find(segment) {
            Some(pos) => remaining = &remaining[pos + segment.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.symbol())
            }
            FilterExpr::In {
                field,
                values,
                negated,
            } => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                let op = if *negated { "not in" } else { "in" };
                write!(f, "{field} {op} [{}]", items.join(", "))
            }
            FilterExpr::Like { field, pattern } => {
                write!(f, "{field} like {}", FilterLiteral::String(pattern.clone()))
            }
            FilterExpr::And(clauses) => write_joined(f, clauses, " and "),
            FilterExpr::Or(clauses) => write_joined(f, clauses, " or "),
            FilterExpr::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, clauses: &[FilterExpr], sep: &str) -> fmt::Result {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({clause})")?;
    }
    Ok(())
}
