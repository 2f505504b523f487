//! Statement parameter and result models.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for prepared statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Rows returned by a query, rendered as JSON objects keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
}

impl QueryRows {
    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What a single execute call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteResult {
    Rows(QueryRows),
    UpdateCount { rows_affected: u64 },
    BatchCounts { counts: Vec<u64> },
}

impl ExecuteResult {
    /// True if the statement produced a result set.
    pub fn has_rows(&self) -> bool {
        matches!(self, Self::Rows(_))
    }

    /// Total rows affected; zero for result sets.
    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::Rows(_) => 0,
            Self::UpdateCount { rows_affected } => *rows_affected,
            Self::BatchCounts { counts } => counts.iter().sum(),
        }
    }

    pub fn into_rows(self) -> Option<QueryRows> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_counts(self) -> Vec<u64> {
        match self {
            Self::Rows(_) => Vec::new(),
            Self::UpdateCount { rows_affected } => vec![rows_affected],
            Self::BatchCounts { counts } => counts,
        }
    }
}

/// Outcome of a statement execution as seen by the connection wrapper.
///
/// `dirties_state` is set for every call that could have mutated rows, which
/// is every execute family member except a plain query.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutcome {
    pub result: ExecuteResult,
    pub dirties_state: bool,
}
