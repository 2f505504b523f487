//! Statement handles bound to a [`ConnectionWrapper`].
//!
//! Statements do not talk to the physical connection themselves. Every call is
//! turned into a [`StatementCall`] and run by the owning wrapper, which does
//! the usage tracking and failure classification in one place.

use crate::db::driver::BatchEntry;
use crate::db::driver::DriverConnection;
use crate::db::wrapper::ConnectionWrapper;
use crate::error::{DbError, DbResult};
use crate::models::{ExecuteOutcome, QueryParam, QueryRows};

/// One execute-family call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StatementCall<'a> {
    Execute {
        sql: &'a str,
        params: &'a [QueryParam],
    },
    Update {
        sql: &'a str,
        params: &'a [QueryParam],
    },
    Query {
        sql: &'a str,
        params: &'a [QueryParam],
    },
    Batch {
        entries: &'a [BatchEntry],
    },
}

impl StatementCall<'_> {
    /// Whether a successful call could have mutated rows. Only a plain query
    /// is known not to.
    pub(crate) fn dirties_state(&self) -> bool {
        !matches!(self, Self::Query { .. })
    }

    /// Statement text for log records.
    pub(crate) fn statement_text(&self) -> String {
        match self {
            Self::Execute { sql, .. } | Self::Update { sql, .. } | Self::Query { sql, .. } => {
                sql.to_string()
            }
            Self::Batch { entries } => entries
                .iter()
                .map(|e| e.sql.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

fn into_update_count(outcome: ExecuteOutcome) -> u64 {
    outcome.result.rows_affected()
}

fn into_rows(outcome: ExecuteOutcome) -> DbResult<QueryRows> {
    outcome
        .result
        .into_rows()
        .ok_or_else(|| DbError::internal("Query did not produce a result set"))
}

/// A plain statement. SQL is given per call; batches collect SQL strings.
pub struct Statement<'a, C: DriverConnection> {
    conn: &'a ConnectionWrapper<C>,
    batch: Vec<BatchEntry>,
}

impl<'a, C: DriverConnection> Statement<'a, C> {
    pub(crate) fn new(conn: &'a ConnectionWrapper<C>) -> Self {
        Self {
            conn,
            batch: Vec::new(),
        }
    }

    pub fn connection(&self) -> &'a ConnectionWrapper<C> {
        self.conn
    }

    /// Run a statement that may or may not return rows.
    pub async fn execute(&self, sql: &str) -> DbResult<ExecuteOutcome> {
        self.conn
            .run(StatementCall::Execute { sql, params: &[] })
            .await
    }

    pub async fn execute_update(&self, sql: &str) -> DbResult<u64> {
        self.conn
            .run(StatementCall::Update { sql, params: &[] })
            .await
            .map(into_update_count)
    }

    pub async fn execute_query(&self, sql: &str) -> DbResult<QueryRows> {
        let outcome = self
            .conn
            .run(StatementCall::Query { sql, params: &[] })
            .await?;
        into_rows(outcome)
    }

    pub fn add_batch(&mut self, sql: impl Into<String>) {
        self.batch.push(BatchEntry::new(sql, Vec::new()));
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Run and clear the queued batch, returning one update count per entry.
    pub async fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        let entries = std::mem::take(&mut self.batch);
        let outcome = self
            .conn
            .run(StatementCall::Batch { entries: &entries })
            .await?;
        Ok(outcome.result.into_counts())
    }
}

/// A statement with fixed SQL and positional parameters.
///
/// Parameter indexes are 1-based. Unset parameters below the highest set
/// index are bound as NULL.
pub struct PreparedStatement<'a, C: DriverConnection> {
    conn: &'a ConnectionWrapper<C>,
    sql: String,
    params: Vec<QueryParam>,
    batch: Vec<Vec<QueryParam>>,
}

impl<'a, C: DriverConnection> PreparedStatement<'a, C> {
    pub(crate) fn new(conn: &'a ConnectionWrapper<C>, sql: impl Into<String>) -> Self {
        Self {
            conn,
            sql: sql.into(),
            params: Vec::new(),
            batch: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// Append the next positional parameter.
    pub fn bind(mut self, value: impl Into<QueryParam>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn set_param(&mut self, index: usize, value: impl Into<QueryParam>) -> DbResult<()> {
        if index == 0 {
            return Err(DbError::invalid_input("Parameter indexes start at 1"));
        }
        if self.params.len() < index {
            self.params.resize(index, QueryParam::Null);
        }
        self.params[index - 1] = value.into();
        Ok(())
    }

    pub fn clear_parameters(&mut self) {
        self.params.clear();
    }

    pub async fn execute(&self) -> DbResult<ExecuteOutcome> {
        self.conn
            .run(StatementCall::Execute {
                sql: &self.sql,
                params: &self.params,
            })
            .await
    }

    pub async fn execute_update(&self) -> DbResult<u64> {
        self.conn
            .run(StatementCall::Update {
                sql: &self.sql,
                params: &self.params,
            })
            .await
            .map(into_update_count)
    }

    pub async fn execute_query(&self) -> DbResult<QueryRows> {
        let outcome = self
            .conn
            .run(StatementCall::Query {
                sql: &self.sql,
                params: &self.params,
            })
            .await?;
        into_rows(outcome)
    }

    /// Queue the current parameter set. The parameters stay set.
    pub fn add_batch(&mut self) {
        self.batch.push(self.params.clone());
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    pub async fn execute_batch(&mut self) -> DbResult<Vec<u64>> {
        let entries: Vec<BatchEntry> = std::mem::take(&mut self.batch)
            .into_iter()
            .map(|params| BatchEntry::new(self.sql.clone(), params))
            .collect();
        let outcome = self
            .conn
            .run(StatementCall::Batch { entries: &entries })
            .await?;
        Ok(outcome.result.into_counts())
    }
}
