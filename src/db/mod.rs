//! Database abstraction layer.
//!
//! This module provides the connection wrapper layer:
//! - Physical driver connections and the pools they come from
//! - Connection wrappers, statements and usage tracking
//! - Heartbeat probing of idle connections
//! - Transaction listeners and replication monitoring
//! - Error classification and row type mappings

pub mod classify;
pub mod driver;
pub mod heartbeat;
pub mod listener;
pub mod pool;
pub mod replication;
pub mod state;
pub mod statement;
pub mod timer;
pub mod types;
pub mod wrapper;

pub use classify::{ErrorClass, classify};
pub use driver::{BatchEntry, DriverConnection, Savepoint};
pub use heartbeat::HeartbeatProbe;
pub use listener::{ConnectionListener, ListenerError, ListenerRegistry, ListenerResult};
pub use pool::{ConnectionPool, DbPool, SqlxConnection, SqlxPool};
pub use replication::{CounterReplicationMonitor, ReplicationMonitor};
pub use state::ConnectionState;
pub use statement::{PreparedStatement, Statement};
pub use timer::{ScheduledTask, TimerService, TimerTask, TokioTimerService};
pub use wrapper::{ConnectionSummary, ConnectionWrapper, WrapperFactory};
