//! The physical connection seam.
//!
//! [`DriverConnection`] is what the wrapper layer needs from a real driver
//! connection. [`crate::db::pool::SqlxConnection`] implements it on top of
//! sqlx; tests substitute scripted connections.

use crate::error::DbResult;
use crate::models::{DatabaseType, ExecuteResult, QueryParam, QueryRows};
use async_trait::async_trait;
use std::time::Duration;

/// Query used by [`DriverConnection::keep_alive`].
pub const KEEP_ALIVE_SQL: &str = "SELECT 1";

/// A named savepoint inside the current transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One queued entry of a statement batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl BatchEntry {
    pub fn new(sql: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A physical database connection.
///
/// All round-trips are async and exclusive (`&mut self`). Implementations
/// follow JDBC auto-commit semantics: with auto-commit off, the first statement
/// opens a transaction that lasts until `commit` or `rollback`.
#[async_trait]
pub trait DriverConnection: Send + 'static {
    fn database_type(&self) -> DatabaseType;

    /// Run a statement that may or may not produce a result set.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteResult>;

    /// Run a row-mutating statement and return the affected row count.
    async fn execute_update(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64>;

    /// Run a query and return its rows.
    async fn execute_query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryRows>;

    /// Run a batch, returning one update count per entry. Stops at the first
    /// failing entry.
    async fn execute_batch(&mut self, batch: &[BatchEntry]) -> DbResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(batch.len());
        for entry in batch {
            counts.push(self.execute_update(&entry.sql, &entry.params).await?);
        }
        Ok(counts)
    }

    /// Issue a trivial round-trip to keep the session alive, discarding any
    /// rows. Must not open a transaction.
    async fn keep_alive(&mut self) -> DbResult<()> {
        self.execute_query(KEEP_ALIVE_SQL, &[]).await.map(|_| ())
    }

    fn auto_commit(&self) -> bool;

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Create a savepoint, generating a name when none is given.
    async fn set_savepoint(&mut self, name: Option<&str>) -> DbResult<Savepoint>;

    async fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> DbResult<()>;

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> DbResult<()>;

    /// True once the connection has lost its network resources or was
    /// explicitly closed. Such a connection can never be used again.
    fn is_internally_closed(&self) -> bool;

    /// Per-round-trip socket timeout, if the driver enforces one.
    fn socket_timeout(&self) -> Option<Duration>;

    /// Current schema (catalog) name, resolved without a round-trip.
    fn schema(&self) -> Option<String>;
}
