//! DB Connection Guard - Main entry point.
//!
//! Checks out one connection, wraps it, runs the given statements through the
//! wrapper and prints each result as JSON.

use db_conn_guard::config::Config;
use db_conn_guard::db::{
    ConnectionPool, ConnectionWrapper, CounterReplicationMonitor, ReplicationMonitor,
    SqlxConnection, SqlxPool, TimerService, TokioTimerService, WrapperFactory,
};
use db_conn_guard::models::Assignment;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Distinct ids so that writes on the checkout are counted for the context
const READ_POOL_ID: i32 = 1;
const WRITE_POOL_ID: i32 = 2;

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

async fn run_statements(
    conn: &ConnectionWrapper<SqlxConnection>,
    statements: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let statement = conn.create_statement();
    for sql in statements {
        let outcome = statement.execute(sql).await?;
        println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!("Starting DB Connection Guard v{}", env!("CARGO_PKG_VERSION"));

    let db_config = config.database_config()?;
    let heartbeat = config.heartbeat_options(&db_config);
    let is_write = db_config.writable;
    let mut assignment = Assignment::new(config.context_id, READ_POOL_ID, WRITE_POOL_ID);
    if let Some(schema) = db_config.database.clone() {
        assignment = assignment.with_schema(schema);
    }

    let pool = Arc::new(SqlxPool::connect(db_config).await?);
    let monitor = Arc::new(CounterReplicationMonitor::new(config.track_replication));
    let timer: Arc<dyn TimerService> = Arc::new(TokioTimerService::new());

    let mut physical = pool.acquire().await?;
    if config.track_replication {
        CounterReplicationMonitor::prepare_table(&mut physical, config.context_id).await?;
    }

    let factory = WrapperFactory::new(
        Arc::clone(&monitor) as Arc<dyn ReplicationMonitor<SqlxConnection>>,
        Arc::clone(&pool) as Arc<dyn ConnectionPool<SqlxConnection>>,
    )
    .with_timer(timer)
    .with_heartbeat(heartbeat);

    let conn = factory.open(physical, assignment, false, is_write, !is_write);
    if conn.start_heartbeat() {
        info!(connection_id = %conn.id(), "Heartbeat enabled");
    }

    if config.transaction {
        conn.set_auto_commit(false).await?;
    }

    let result = run_statements(&conn, &config.statements).await;
    match &result {
        Ok(()) if config.transaction => conn.commit().await?,
        Ok(()) => {}
        Err(e) => {
            error!(error = %e, "Statement failed");
            if config.transaction {
                if let Err(e) = conn.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
            }
        }
    }

    let summary = conn.summary();
    conn.close().await?;
    info!(
        connection_id = %summary.id,
        used_for_update = summary.state.used_for_update,
        transaction_count = monitor.transaction_count(config.context_id).await,
        "Connection closed"
    );

    pool.close().await;
    result
}
