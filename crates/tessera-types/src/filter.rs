//! Serializable predicate tree and sort order.
//!
//! A [`Filter`] describes which rows a query selects without saying how to
//! select them. Storage engines interpret it: the `PostgreSQL` engine renders
//! it into a parameterized `WHERE` clause, the in-memory engine evaluates it
//! with [`Filter::matches`]. Callers build filters with the constructors
//! below or deserialize them from JSON.
//!
//! Evaluation follows SQL three-valued logic: any comparison against `NULL`
//! is unknown, and a row is selected only when the whole tree is known to
//! be true.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::value::Value;

/// Longest identifier `PostgreSQL` accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Errors raised while validating or evaluating a filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// The filter names a column the row does not have.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// A text operator was applied to a non-text column.
    #[error("column {column} is {actual}, expected text")]
    NotText {
        /// The offending column.
        column: String,
        /// The column's actual value type.
        actual: &'static str,
    },

    /// A column name is not a plain SQL identifier.
    #[error("invalid column identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// The SQL spelling of this operator.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Whether `lhs op rhs` holds given `lhs.cmp(rhs)`.
    pub const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Ne => !matches!(ordering, Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Le => !matches!(ordering, Ordering::Greater),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Ge => !matches!(ordering, Ordering::Less),
        }
    }
}

/// Sort direction for an `ORDER BY` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

impl SortOrder {
    /// The SQL keyword for this direction.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A boolean predicate over the columns of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// `column <op> value`.
    Compare {
        /// Column on the left-hand side.
        column: String,
        /// Comparison operator.
        cmp: CompareOp,
        /// Value on the right-hand side.
        value: Value,
    },
    /// Text column begins with `prefix`.
    StartsWith {
        /// Text column to test.
        column: String,
        /// Literal prefix (no wildcards).
        prefix: String,
    },
    /// Text column contains `needle`.
    Contains {
        /// Text column to test.
        column: String,
        /// Literal substring (no wildcards).
        needle: String,
    },
    /// Column is `NULL`.
    IsNull {
        /// Column to test.
        column: String,
    },
    /// Column equals one of `values`.
    In {
        /// Column to test.
        column: String,
        /// Candidate values; an empty list matches nothing.
        values: Vec<Value>,
    },
    /// Every child holds; an empty list always holds.
    And {
        /// Conjuncts.
        filters: Vec<Filter>,
    },
    /// Some child holds; an empty list never holds.
    Or {
        /// Disjuncts.
        filters: Vec<Filter>,
    },
    /// The child does not hold.
    Not {
        /// Negated filter.
        filter: Box<Filter>,
    },
}

impl Filter {
    fn compare(column: impl Into<String>, cmp: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            cmp,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column <> value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// Text column begins with `prefix`.
    pub fn starts_with(column: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::StartsWith {
            column: column.into(),
            prefix: prefix.into(),
        }
    }

    /// Text column contains `needle`.
    pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            column: column.into(),
            needle: needle.into(),
        }
    }

    /// Column is `NULL`.
    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
        }
    }

    /// Column equals one of `values`.
    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction of all `filters`.
    pub fn all(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And {
            filters: filters.into_iter().collect(),
        }
    }

    /// Disjunction of all `filters`.
    pub fn any(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::Or {
            filters: filters.into_iter().collect(),
        }
    }

    /// `self AND other`, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And { mut filters } => {
                filters.push(other);
                Self::And { filters }
            }
            lhs => Self::And {
                filters: vec![lhs, other],
            },
        }
    }

    /// `self OR other`, flattening nested disjunctions.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or { mut filters } => {
                filters.push(other);
                Self::Or { filters }
            }
            lhs => Self::Or {
                filters: vec![lhs, other],
            },
        }
    }

    /// Every column name referenced anywhere in the tree.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { column, .. }
            | Self::StartsWith { column, .. }
            | Self::Contains { column, .. }
            | Self::IsNull { column }
            | Self::In { column, .. } => out.push(column),
            Self::And { filters } | Self::Or { filters } => {
                for filter in filters {
                    filter.collect_columns(out);
                }
            }
            Self::Not { filter } => filter.collect_columns(out),
        }
    }

    /// Check that every referenced column is a plain SQL identifier.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidIdentifier`] for the first offending
    /// column.
    pub fn validate(&self) -> Result<(), FilterError> {
        match self.columns().into_iter().find(|c| !is_valid_identifier(c)) {
            Some(bad) => Err(FilterError::InvalidIdentifier(bad.to_owned())),
            None => Ok(()),
        }
    }

    /// Evaluate the filter against one row.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::UnknownColumn`] if the row lacks a referenced
    /// column, or [`FilterError::NotText`] if a text operator meets a
    /// non-text value.
    pub fn matches(&self, record: &Record) -> Result<bool, FilterError> {
        Ok(self.eval(record)?.unwrap_or(false))
    }

    /// Three-valued evaluation; `None` is SQL's unknown.
    fn eval(&self, record: &Record) -> Result<Option<bool>, FilterError> {
        match self {
            Self::Compare { column, cmp, value } => {
                let actual = lookup(record, column)?;
                Ok(actual.compare(value).map(|ordering| cmp.holds(ordering)))
            }
            Self::StartsWith { column, prefix } => {
                Ok(text(record, column)?.map(|s| s.starts_with(prefix.as_str())))
            }
            Self::Contains { column, needle } => {
                Ok(text(record, column)?.map(|s| s.contains(needle.as_str())))
            }
            Self::IsNull { column } => Ok(Some(lookup(record, column)?.is_null())),
            Self::In { column, values } => {
                let actual = lookup(record, column)?;
                if values.is_empty() {
                    return Ok(Some(false));
                }
                if actual.is_null() {
                    return Ok(None);
                }
                let mut unknown = false;
                for candidate in values {
                    match actual.compare(candidate) {
                        Some(Ordering::Equal) => return Ok(Some(true)),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            Self::And { filters } => {
                let mut unknown = false;
                for filter in filters {
                    match filter.eval(record)? {
                        Some(false) => return Ok(Some(false)),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(true) })
            }
            Self::Or { filters } => {
                let mut unknown = false;
                for filter in filters {
                    match filter.eval(record)? {
                        Some(true) => return Ok(Some(true)),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            Self::Not { filter } => Ok(filter.eval(record)?.map(|b| !b)),
        }
    }
}

impl core::ops::Not for Filter {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self::Not {
            filter: Box::new(self),
        }
    }
}

fn lookup<'r>(record: &'r Record, column: &str) -> Result<&'r Value, FilterError> {
    record
        .get(column)
        .ok_or_else(|| FilterError::UnknownColumn(column.to_owned()))
}

fn text<'r>(record: &'r Record, column: &str) -> Result<Option<&'r str>, FilterError> {
    match lookup(record, column)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(FilterError::NotText {
            column: column.to_owned(),
            actual: other.type_name(),
        }),
    }
}

/// Whether `name` can be spliced into SQL unquoted.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 bytes.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
