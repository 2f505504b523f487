//! Connection-related data models.
//!
//! This module defines types describing which database a checkout talks to and
//! which logical tenant it belongs to.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Placeholder syntax for the n-th (1-based) bind parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", n),
            Self::MySQL | Self::SQLite => "?".to_string(),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// The logical tenant and pool pair a checkout was made for.
///
/// Replica routing decisions are made per context: once a write on the master
/// has been counted for a context, reads for that context stay on the master
/// until the replicas report the same transaction count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub context_id: i32,
    pub read_pool_id: i32,
    pub write_pool_id: i32,
    /// Schema the connection is bound to, if any
    #[serde(default)]
    pub schema: Option<String>,
}

impl Assignment {
    /// Create a new assignment.
    pub fn new(context_id: i32, read_pool_id: i32, write_pool_id: i32) -> Self {
        Self {
            context_id,
            read_pool_id,
            write_pool_id,
            schema: None,
        }
    }

    /// Bind the assignment to a schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// True if reads and writes go to the same pool (no replication involved).
    pub fn is_single_pool(&self) -> bool {
        self.read_pool_id == self.write_pool_id
    }
}
