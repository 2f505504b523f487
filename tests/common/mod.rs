//! Shared helpers for integration tests: a scripted driver connection, a
//! counting pool, recording listeners and a log capture layer.

#![allow(dead_code)]

use async_trait::async_trait;
use db_conn_guard::config::HeartbeatOptions;
use db_conn_guard::db::{
    ConnectionListener, ConnectionPool, ConnectionWrapper, CounterReplicationMonitor,
    DriverConnection, ListenerResult, ReplicationMonitor, Savepoint, TimerService,
    TokioTimerService, WrapperFactory,
};
use db_conn_guard::error::{DbError, DbResult};
use db_conn_guard::models::{Assignment, DatabaseType, ExecuteResult, QueryParam, QueryRows};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// Ordered record of everything that touched a mock connection, shared with
/// listeners so interleavings can be asserted.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Failure a mock connection raises for a given statement.
#[derive(Clone, Debug)]
pub enum Failure {
    Database {
        message: &'static str,
        sql_state: Option<&'static str>,
        code: Option<&'static str>,
    },
    ReadTimeout,
}

impl Failure {
    pub fn sql_state(message: &'static str, sql_state: &'static str) -> Self {
        Self::Database {
            message,
            sql_state: Some(sql_state),
            code: None,
        }
    }

    fn to_error(&self) -> DbError {
        match self {
            Self::Database {
                message,
                sql_state,
                code,
            } => DbError::database(
                *message,
                sql_state.map(String::from),
                code.map(String::from),
            ),
            Self::ReadTimeout => DbError::read_timeout("execute", Duration::from_secs(5)),
        }
    }
}

/// A scripted physical connection.
pub struct MockConnection {
    pub journal: Journal,
    lost: Arc<AtomicBool>,
    failures: HashMap<String, Failure>,
    auto_commit: bool,
    socket_timeout: Option<Duration>,
    savepoints: u32,
}

impl MockConnection {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            lost: Arc::new(AtomicBool::new(false)),
            failures: HashMap::new(),
            auto_commit: true,
            socket_timeout: None,
            savepoints: 0,
        }
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn fail_on(mut self, sql: &str, failure: Failure) -> Self {
        self.failures.insert(sql.to_string(), failure);
        self
    }

    /// Handle that simulates the network going away.
    pub fn lost_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.lost)
    }

    fn check(&self, sql: &str) -> DbResult<()> {
        match self.failures.get(sql) {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn execute(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<ExecuteResult> {
        self.journal.record(format!("execute: {}", sql));
        self.check(sql)?;
        // Scripted: only plain SELECTs produce a result set
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            Ok(ExecuteResult::Rows(QueryRows::default()))
        } else {
            Ok(ExecuteResult::UpdateCount { rows_affected: 1 })
        }
    }

    async fn execute_update(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<u64> {
        self.journal.record(format!("update: {}", sql));
        self.check(sql)?;
        Ok(1)
    }

    async fn execute_query(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<QueryRows> {
        self.journal.record(format!("query: {}", sql));
        self.check(sql)?;
        Ok(QueryRows::default())
    }

    async fn keep_alive(&mut self) -> DbResult<()> {
        self.journal.record("keep_alive");
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.journal
            .record(format!("set_auto_commit({})", auto_commit));
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.journal.record("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.journal.record("rollback");
        Ok(())
    }

    async fn set_savepoint(&mut self, name: Option<&str>) -> DbResult<Savepoint> {
        self.savepoints += 1;
        let name = name
            .map(String::from)
            .unwrap_or_else(|| format!("sp_{}", self.savepoints));
        self.journal.record(format!("savepoint {}", name));
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> DbResult<()> {
        self.journal
            .record(format!("rollback_to {}", savepoint.name()));
        Ok(())
    }

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> DbResult<()> {
        self.journal.record(format!("release {}", savepoint.name()));
        Ok(())
    }

    fn is_internally_closed(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout
    }

    fn schema(&self) -> Option<String> {
        Some("ctx_1".to_string())
    }
}

/// Pool that counts hand-backs.
#[derive(Default)]
pub struct MockPool {
    backs: AtomicUsize,
}

impl MockPool {
    pub fn backs(&self) -> usize {
        self.backs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionPool<MockConnection> for MockPool {
    async fn back(&self, conn: MockConnection, _no_timeout: bool) {
        self.backs.fetch_add(1, Ordering::SeqCst);
        conn.journal.record("back");
    }
}

/// Listener that writes `<label>.<hook>` into a journal.
pub struct RecordingListener {
    label: &'static str,
    journal: Journal,
    fail_before_commit: bool,
}

impl RecordingListener {
    pub fn new(label: &'static str, journal: Journal) -> Self {
        Self {
            label,
            journal,
            fail_before_commit: false,
        }
    }

    pub fn failing_before_commit(mut self) -> Self {
        self.fail_before_commit = true;
        self
    }
}

#[async_trait]
impl ConnectionListener<MockConnection> for RecordingListener {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn before_commit(&self, _conn: &ConnectionWrapper<MockConnection>) -> ListenerResult {
        self.journal.record(format!("{}.before_commit", self.label));
        if self.fail_before_commit {
            return Err("listener refused".into());
        }
        Ok(())
    }

    async fn after_commit(&self, _conn: &ConnectionWrapper<MockConnection>) -> ListenerResult {
        self.journal.record(format!("{}.after_commit", self.label));
        Ok(())
    }

    async fn before_rollback(&self, _conn: &ConnectionWrapper<MockConnection>) -> ListenerResult {
        self.journal
            .record(format!("{}.before_rollback", self.label));
        Ok(())
    }

    async fn after_rollback(&self, _conn: &ConnectionWrapper<MockConnection>) -> ListenerResult {
        self.journal
            .record(format!("{}.after_rollback", self.label));
        Ok(())
    }

    async fn auto_commit_changed(
        &self,
        auto_commit: bool,
        _conn: &ConnectionWrapper<MockConnection>,
    ) -> ListenerResult {
        self.journal
            .record(format!("{}.auto_commit_changed({})", self.label, auto_commit));
        Ok(())
    }
}

/// Collaborators for wrapping mock connections.
pub struct Harness {
    pub journal: Journal,
    pub pool: Arc<MockPool>,
    pub monitor: Arc<CounterReplicationMonitor>,
    pub factory: WrapperFactory<MockConnection>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false, None, HeartbeatOptions::default())
    }

    pub fn with_timer(heartbeat: HeartbeatOptions) -> Self {
        Self::build(
            false,
            Some(Arc::new(TokioTimerService::new())),
            heartbeat,
        )
    }

    pub fn tracking_in_database() -> Self {
        Self::build(true, None, HeartbeatOptions::default())
    }

    fn build(
        track_in_database: bool,
        timer: Option<Arc<dyn TimerService>>,
        heartbeat: HeartbeatOptions,
    ) -> Self {
        let pool = Arc::new(MockPool::default());
        let monitor = Arc::new(CounterReplicationMonitor::new(track_in_database));
        let mut factory = WrapperFactory::new(
            Arc::clone(&monitor) as Arc<dyn ReplicationMonitor<MockConnection>>,
            Arc::clone(&pool) as Arc<dyn ConnectionPool<MockConnection>>,
        )
        .with_heartbeat(heartbeat);
        if let Some(timer) = timer {
            factory = factory.with_timer(timer);
        }
        Self {
            journal: Journal::default(),
            pool,
            monitor,
            factory,
        }
    }

    pub fn connection(&self) -> MockConnection {
        MockConnection::new(self.journal.clone())
    }

    /// Open a write checkout on a read/write pool pair.
    pub fn open(&self, conn: MockConnection) -> ConnectionWrapper<MockConnection> {
        self.factory
            .open(conn, Assignment::new(1, 10, 20), false, true, false)
    }
}

/// One captured log event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn mentions(&self, text: &str) -> bool {
        self.message.contains(text) || self.fields.iter().any(|(_, v)| v.contains(text))
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .push((field.name().to_string(), format!("{:?}", value)));
        }
    }
}

/// `tracing` layer that keeps every event in memory.
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCapture {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        self.records.lock().unwrap().push(LogRecord {
            level: *event.metadata().level(),
            message: collector.message,
            fields: collector.fields,
        });
    }
}

/// Capture log events on the current thread until the guard is dropped.
pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
