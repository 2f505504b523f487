//! Replication monitoring.
//!
//! A [`ReplicationMonitor`] decides, from a checkout's usage flags, whether a
//! write has to be counted so that later reads for the same context avoid
//! lagging replicas. It also owns the final hand-back of the physical
//! connection to its pool.

use crate::db::driver::DriverConnection;
use crate::db::pool::ConnectionPool;
use crate::db::state::ConnectionState;
use crate::error::DbResult;
use crate::models::{Assignment, QueryParam};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// DDL for the table that persists per-context transaction counters.
pub const REPLICATION_MONITOR_DDL: &str = "CREATE TABLE IF NOT EXISTS replication_monitor (\
     cid INTEGER NOT NULL PRIMARY KEY, \
     transaction_count BIGINT NOT NULL DEFAULT 0)";

#[async_trait]
pub trait ReplicationMonitor<C: DriverConnection>: Send + Sync {
    /// Count the checkout's writes inside the still-open transaction. Called
    /// right before a commit when auto-commit is off and an update happened.
    async fn increase_in_current_transaction(
        &self,
        assignment: &Assignment,
        conn: &mut C,
        state: &mut ConnectionState,
    ) -> DbResult<()>;

    /// Count any writes not yet counted and return `conn` to `pool`. Must hand
    /// the connection back even when counting fails.
    async fn back_and_increment_transaction(
        &self,
        pool: &dyn ConnectionPool<C>,
        assignment: &Assignment,
        conn: C,
        no_timeout: bool,
        is_write: bool,
        state: ConnectionState,
    );
}

/// Monitor keeping a per-context counter of committed write transactions.
///
/// With `track_in_database` the counter is also incremented in the
/// `replication_monitor` table so replicas can report how far they got.
pub struct CounterReplicationMonitor {
    counters: RwLock<HashMap<i32, u64>>,
    track_in_database: bool,
}

impl CounterReplicationMonitor {
    pub fn new(track_in_database: bool) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            track_in_database,
        }
    }

    /// Write transactions counted for a context so far.
    pub async fn transaction_count(&self, context_id: i32) -> u64 {
        let counters = self.counters.read().await;
        counters.get(&context_id).copied().unwrap_or(0)
    }

    /// Create the counter table and the row for `context_id` if missing.
    pub async fn prepare_table<C: DriverConnection>(
        conn: &mut C,
        context_id: i32,
    ) -> DbResult<()> {
        conn.execute_update(REPLICATION_MONITOR_DDL, &[]).await?;
        let placeholder = conn.database_type().placeholder(1);
        let existing = conn
            .execute_query(
                &format!("SELECT cid FROM replication_monitor WHERE cid = {}", placeholder),
                &[QueryParam::from(context_id)],
            )
            .await?;
        if existing.is_empty() {
            conn.execute_update(
                &format!(
                    "INSERT INTO replication_monitor (cid, transaction_count) VALUES ({}, 0)",
                    placeholder
                ),
                &[QueryParam::from(context_id)],
            )
            .await?;
        }
        Ok(())
    }

    async fn increment_in_database<C: DriverConnection>(
        conn: &mut C,
        context_id: i32,
    ) -> DbResult<u64> {
        let sql = format!(
            "UPDATE replication_monitor SET transaction_count = transaction_count + 1 WHERE cid = {}",
            conn.database_type().placeholder(1)
        );
        conn.execute_update(&sql, &[QueryParam::from(context_id)])
            .await
    }

    async fn bump(&self, context_id: i32) -> u64 {
        let mut counters = self.counters.write().await;
        let count = counters.entry(context_id).or_insert(0);
        *count += 1;
        *count
    }
}

impl Default for CounterReplicationMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl<C: DriverConnection> ReplicationMonitor<C> for CounterReplicationMonitor {
    async fn increase_in_current_transaction(
        &self,
        assignment: &Assignment,
        conn: &mut C,
        state: &mut ConnectionState,
    ) -> DbResult<()> {
        if assignment.is_single_pool() {
            return Ok(());
        }
        if self.track_in_database {
            Self::increment_in_database(conn, assignment.context_id).await?;
        }
        state.mark_update_committed();
        debug!(
            context_id = assignment.context_id,
            "Replication counter increased inside transaction"
        );
        Ok(())
    }

    async fn back_and_increment_transaction(
        &self,
        pool: &dyn ConnectionPool<C>,
        assignment: &Assignment,
        mut conn: C,
        no_timeout: bool,
        is_write: bool,
        state: ConnectionState,
    ) {
        if is_write && state.used_for_update && !assignment.is_single_pool() {
            // Uncounted writes outside auto-commit were never committed
            let counts_now = state.needs_replication_increment() && conn.auto_commit();
            if counts_now && self.track_in_database && !conn.is_internally_closed() {
                if let Err(e) = Self::increment_in_database(&mut conn, assignment.context_id).await
                {
                    error!(
                        context_id = assignment.context_id,
                        error = %e,
                        "Failed to increase replication counter"
                    );
                }
            }
            let count = self.bump(assignment.context_id).await;
            debug!(
                context_id = assignment.context_id,
                transaction_count = count,
                "Replication transaction counted"
            );
        }

        pool.back(conn, no_timeout).await;
    }
}
