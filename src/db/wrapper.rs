//! The connection wrapper handed to application code.
//!
//! A [`ConnectionWrapper`] owns one physical connection for the length of a
//! checkout. It tracks what the checkout did with the connection, notifies
//! listeners around transaction boundaries, keeps the connection alive while
//! it sits idle, and returns it through the replication monitor exactly once.

use crate::config::HeartbeatOptions;
use crate::db::classify::{ErrorClass, classify};
use crate::db::driver::{DriverConnection, Savepoint};
use crate::db::heartbeat::{HeartbeatProbe, SharedConnection};
use crate::db::listener::{ConnectionListener, ListenerEvent, ListenerRegistry};
use crate::db::pool::ConnectionPool;
use crate::db::replication::ReplicationMonitor;
use crate::db::state::ConnectionState;
use crate::db::statement::{PreparedStatement, Statement, StatementCall};
use crate::db::timer::TimerService;
use crate::error::{DbError, DbResult};
use crate::models::{Assignment, ExecuteOutcome, ExecuteResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::MappedMutexGuard;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Point-in-time view of a wrapper, for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub context_id: i32,
    pub is_write: bool,
    pub checked_out_at: DateTime<Utc>,
    /// Seconds since checkout.
    pub held_secs: i64,
    pub closed: bool,
    pub heartbeat_active: bool,
    pub state: ConnectionState,
}

/// Builds wrappers around physical connections.
///
/// Bundles the collaborators every wrapper needs so callers only pass what
/// differs per checkout.
pub struct WrapperFactory<C: DriverConnection> {
    monitor: Arc<dyn ReplicationMonitor<C>>,
    pool: Arc<dyn ConnectionPool<C>>,
    general_listeners: ListenerRegistry<C>,
    timer: Option<Arc<dyn TimerService>>,
    heartbeat: HeartbeatOptions,
}

impl<C: DriverConnection> WrapperFactory<C> {
    pub fn new(monitor: Arc<dyn ReplicationMonitor<C>>, pool: Arc<dyn ConnectionPool<C>>) -> Self {
        Self {
            monitor,
            pool,
            general_listeners: ListenerRegistry::new(),
            timer: None,
            heartbeat: HeartbeatOptions::default(),
        }
    }

    pub fn with_timer(mut self, timer: Arc<dyn TimerService>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_heartbeat(mut self, options: HeartbeatOptions) -> Self {
        self.heartbeat = options;
        self
    }

    /// Use `listeners` as the general listeners of every wrapper opened from
    /// now on.
    pub fn with_general_listeners(mut self, listeners: ListenerRegistry<C>) -> Self {
        self.general_listeners = listeners;
        self
    }

    pub fn general_listeners(&self) -> &ListenerRegistry<C> {
        &self.general_listeners
    }

    /// Wrap a freshly checked-out physical connection.
    pub fn open(
        &self,
        conn: C,
        assignment: Assignment,
        no_timeout: bool,
        is_write: bool,
        used_as_read: bool,
    ) -> ConnectionWrapper<C> {
        let wrapper = ConnectionWrapper {
            id: format!("conn_{}", Uuid::new_v4().simple()),
            socket_timeout: conn.socket_timeout(),
            conn: Arc::new(tokio::sync::Mutex::new(Some(conn))),
            closed: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::new(used_as_read)),
            heartbeat: Mutex::new(None),
            listeners: ListenerRegistry::new(),
            general_listeners: self.general_listeners.clone(),
            monitor: Arc::clone(&self.monitor),
            pool: Arc::clone(&self.pool),
            timer: self.timer.clone(),
            heartbeat_options: self.heartbeat.clone(),
            assignment,
            no_timeout,
            is_write,
            checked_out_at: Utc::now(),
        };
        debug!(
            connection_id = %wrapper.id,
            context_id = wrapper.assignment.context_id,
            is_write,
            used_as_read,
            "Connection checked out"
        );
        wrapper
    }
}

/// A checked-out physical connection.
pub struct ConnectionWrapper<C: DriverConnection> {
    id: String,
    conn: SharedConnection<C>,
    socket_timeout: Option<Duration>,
    closed: AtomicBool,
    state: Mutex<ConnectionState>,
    heartbeat: Mutex<Option<Arc<HeartbeatProbe>>>,
    listeners: ListenerRegistry<C>,
    general_listeners: ListenerRegistry<C>,
    monitor: Arc<dyn ReplicationMonitor<C>>,
    pool: Arc<dyn ConnectionPool<C>>,
    timer: Option<Arc<dyn TimerService>>,
    heartbeat_options: HeartbeatOptions,
    assignment: Assignment,
    no_timeout: bool,
    is_write: bool,
    checked_out_at: DateTime<Utc>,
}

impl<C: DriverConnection> ConnectionWrapper<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_heartbeat(&self) -> MutexGuard<'_, Option<Arc<HeartbeatProbe>>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the checkout's usage flags.
    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            context_id: self.assignment.context_id,
            is_write: self.is_write,
            checked_out_at: self.checked_out_at,
            held_secs: Utc::now()
                .signed_duration_since(self.checked_out_at)
                .num_seconds(),
            closed: self.is_closed(),
            heartbeat_active: self.lock_heartbeat().is_some(),
            state: self.state(),
        }
    }

    fn closed_error(&self) -> DbError {
        DbError::already_closed(&self.id)
    }

    /// Lock the physical connection for one operation.
    ///
    /// Fails without touching the physical connection once the wrapper is
    /// closed, and fails if the driver reports the connection as lost.
    async fn physical(&self) -> DbResult<MappedMutexGuard<'_, C>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let guard = self.conn.lock().await;
        let conn = tokio::sync::MutexGuard::try_map(guard, |slot| slot.as_mut())
            .map_err(|_| self.closed_error())?;
        if conn.is_internally_closed() {
            return Err(DbError::connection_lost(format!(
                "Connection {} lost its network resources",
                self.id
            )));
        }
        self.touch();
        Ok(conn)
    }

    /// Fail if the wrapper or its physical connection can no longer be used.
    pub async fn check_for_already_closed(&self) -> DbResult<()> {
        self.physical().await.map(|_| ())
    }

    /// Record activity so the heartbeat stays quiet.
    pub fn touch(&self) {
        if let Some(probe) = self.lock_heartbeat().as_ref() {
            probe.touch();
        }
    }

    /// Record a successful state-changing statement.
    pub(crate) fn mark_update_performed(&self) {
        self.lock_state().mark_update_performed();
        self.touch();
    }

    /// Register a listener for this checkout only.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener<C>>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener<C>>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn create_statement(&self) -> Statement<'_, C> {
        Statement::new(self)
    }

    pub fn prepare_statement(&self, sql: impl Into<String>) -> PreparedStatement<'_, C> {
        PreparedStatement::new(self, sql)
    }

    /// Run one statement call, tracking usage and classifying failures.
    pub(crate) async fn run(&self, call: StatementCall<'_>) -> DbResult<ExecuteOutcome> {
        let mut conn = self.physical().await?;
        let result = match call {
            StatementCall::Execute { sql, params } => conn.execute(sql, params).await,
            StatementCall::Update { sql, params } => conn
                .execute_update(sql, params)
                .await
                .map(|rows_affected| ExecuteResult::UpdateCount { rows_affected }),
            StatementCall::Query { sql, params } => {
                conn.execute_query(sql, params).await.map(ExecuteResult::Rows)
            }
            StatementCall::Batch { entries } => conn
                .execute_batch(entries)
                .await
                .map(|counts| ExecuteResult::BatchCounts { counts }),
        };

        match result {
            Ok(result) => {
                drop(conn);
                let dirties_state = call.dirties_state();
                if dirties_state {
                    self.mark_update_performed();
                } else {
                    self.touch();
                }
                Ok(ExecuteOutcome {
                    result,
                    dirties_state,
                })
            }
            Err(e) => {
                let schema = conn.schema();
                drop(conn);
                Err(self.handle_failure(e, &call, schema.as_deref()))
            }
        }
    }

    fn handle_failure(&self, err: DbError, call: &StatementCall<'_>, schema: Option<&str>) -> DbError {
        let schema = schema.unwrap_or("");
        match classify(&err) {
            ErrorClass::Ignorable => {
                debug!(connection_id = %self.id, error = %err, "Relation not found");
                err
            }
            ErrorClass::Syntax => {
                error!(
                    connection_id = %self.id,
                    statement = %call.statement_text(),
                    schema,
                    error = %err,
                    "Error in SQL statement"
                );
                err
            }
            ErrorClass::Timeout => {
                error!(
                    connection_id = %self.id,
                    statement = %call.statement_text(),
                    schema,
                    error = %err,
                    "Possible read timeout while executing statement"
                );
                err
            }
            ErrorClass::Translated(translated) => {
                debug!(
                    connection_id = %self.id,
                    original = %err,
                    translated = %translated,
                    "Driver error translated"
                );
                translated
            }
            ErrorClass::Other => err,
        }
    }

    /// Invoke `event` on the general listeners, then on this wrapper's own.
    /// Failures are logged and never stop the remaining listeners.
    async fn fire(&self, event: ListenerEvent) {
        let listeners = self
            .general_listeners
            .snapshot()
            .into_iter()
            .chain(self.listeners.snapshot());
        for listener in listeners {
            if let Err(e) = event.dispatch(listener.as_ref(), self).await {
                warn!(
                    connection_id = %self.id,
                    listener = listener.name(),
                    event = event.as_str(),
                    error = %e,
                    "Connection listener failed"
                );
            }
        }
    }

    /// Count this checkout's writes inside the open transaction, before the
    /// commit ends it.
    async fn count_update_in_transaction(&self) -> DbResult<()> {
        let mut state = self.state();
        if !state.used_for_update {
            return Ok(());
        }
        let mut conn = self.physical().await?;
        if conn.auto_commit() {
            return Ok(());
        }
        self.monitor
            .increase_in_current_transaction(&self.assignment, &mut *conn, &mut state)
            .await?;
        if state.update_committed {
            self.lock_state().mark_update_committed();
        }
        Ok(())
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.check_for_already_closed().await?;
        self.count_update_in_transaction().await?;
        self.fire(ListenerEvent::BeforeCommit).await;
        self.physical().await?.commit().await?;
        self.fire(ListenerEvent::AfterCommit).await;
        Ok(())
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.check_for_already_closed().await?;
        self.fire(ListenerEvent::BeforeRollback).await;
        self.physical().await?.rollback().await?;
        self.fire(ListenerEvent::AfterRollback).await;
        Ok(())
    }

    /// Roll back to `savepoint`. Listeners see it as a rollback.
    pub async fn rollback_to(&self, savepoint: &Savepoint) -> DbResult<()> {
        self.check_for_already_closed().await?;
        self.fire(ListenerEvent::BeforeRollback).await;
        self.physical().await?.rollback_to_savepoint(savepoint).await?;
        self.fire(ListenerEvent::AfterRollback).await;
        Ok(())
    }

    pub async fn set_savepoint(&self, name: Option<&str>) -> DbResult<Savepoint> {
        self.physical().await?.set_savepoint(name).await
    }

    pub async fn release_savepoint(&self, savepoint: &Savepoint) -> DbResult<()> {
        self.physical().await?.release_savepoint(savepoint).await
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> DbResult<()> {
        self.physical().await?.set_auto_commit(auto_commit).await?;
        self.fire(ListenerEvent::AutoCommitChanged(auto_commit))
            .await;
        Ok(())
    }

    pub async fn auto_commit(&self) -> DbResult<bool> {
        Ok(self.physical().await?.auto_commit())
    }

    /// Current schema name, if the driver knows it.
    pub async fn schema(&self) -> DbResult<Option<String>> {
        Ok(self.physical().await?.schema())
    }

    /// Start the keep-alive probe.
    ///
    /// Returns false when the heartbeat is disabled, the wrapper is closed, or
    /// no timer service is available. Starting twice keeps the first probe.
    pub fn start_heartbeat(&self) -> bool {
        if self.heartbeat_options.disabled || self.is_closed() {
            return false;
        }
        let Some(timer) = self.timer.as_ref() else {
            return false;
        };

        let mut slot = self.lock_heartbeat();
        if slot.is_none() {
            let max_idle = self.heartbeat_options.max_idle_for(self.socket_timeout);
            let interval = self.heartbeat_options.interval_for(max_idle);
            *slot = Some(HeartbeatProbe::start(
                self.id.clone(),
                Arc::clone(&self.conn),
                &**timer,
                max_idle,
                interval,
            ));
            self.lock_state().set_heartbeat_enabled(true);
        }
        true
    }

    /// Stop the keep-alive probe if one is running. Idempotent.
    pub fn stop_heartbeat(&self) {
        let probe = self.lock_heartbeat().take();
        if let Some(probe) = probe {
            probe.stop();
            self.lock_state().set_heartbeat_enabled(false);
        }
    }

    /// Keep-alive queries issued for this checkout so far.
    pub fn heartbeat_probe_count(&self) -> u64 {
        self.lock_heartbeat()
            .as_ref()
            .map_or(0, |probe| probe.probe_count())
    }

    /// End the checkout and hand the physical connection back.
    ///
    /// Only the first call succeeds; later calls fail with an already-closed
    /// error and do not touch the connection.
    pub async fn close(&self) -> DbResult<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(self.closed_error());
        }

        self.stop_heartbeat();
        self.listeners.clear();

        // Waits for an in-flight heartbeat cycle to finish
        let conn = self.conn.lock().await.take();
        let Some(conn) = conn else {
            return Err(self.closed_error());
        };
        let state = self.state();
        self.monitor
            .back_and_increment_transaction(
                self.pool.as_ref(),
                &self.assignment,
                conn,
                self.no_timeout,
                self.is_write,
                state,
            )
            .await;

        debug!(
            connection_id = %self.id,
            used_for_update = state.used_for_update,
            "Connection returned"
        );
        Ok(())
    }
}

impl<C: DriverConnection> Drop for ConnectionWrapper<C> {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(
                connection_id = %self.id,
                context_id = self.assignment.context_id,
                "Connection wrapper dropped without close(); replication state not recorded"
            );
            self.stop_heartbeat();
        }
    }
}
