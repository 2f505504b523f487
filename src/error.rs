//! Error types for the connection guard.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver failures keep their SQLSTATE and vendor code so callers can still
//! pattern-match on the original condition after it passed through the wrapper.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection already closed: {connection_id}")]
    AlreadyClosed { connection_id: String },

    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        /// Vendor error number (MySQL) or result code (SQLite)
        code: Option<String>,
    },

    #[error("Integrity constraint violation: {message}")]
    IntegrityViolation {
        message: String,
        sql_state: Option<String>,
        code: Option<String>,
    },

    #[error("Transaction rolled back by server: {message}")]
    TransactionRollback {
        message: String,
        sql_state: Option<String>,
        code: Option<String>,
    },

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an already-closed error for the given wrapper.
    pub fn already_closed(connection_id: impl Into<String>) -> Self {
        Self::AlreadyClosed {
            connection_id: connection_id.into(),
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state and vendor code.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        code: Option<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            code,
        }
    }

    /// Create a read-timeout error: an I/O error of kind `TimedOut`.
    pub fn read_timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Io {
            operation: operation.into(),
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("read timed out after {}ms", after.as_millis()),
            ),
        }
    }

    /// Create an I/O error.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. }
            | Self::IntegrityViolation { sql_state, .. }
            | Self::TransactionRollback { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Vendor-specific error code reported by the driver, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. }
            | Self::IntegrityViolation { code, .. }
            | Self::TransactionRollback { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True for an I/O failure caused by a socket read timing out.
    pub fn is_read_timeout(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::TimedOut)
    }

    /// True if the failure means the physical connection can no longer be used.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::Io { .. })
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::AlreadyClosed { .. } | Self::ConnectionLost { .. } => {
                Some("Obtain a fresh connection from the pool")
            }
            Self::TransactionRollback { .. } => Some("Retry the transaction"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionLost { .. }
                | Self::Timeout { .. }
                | Self::TransactionRollback { .. }
        ) || self.is_read_timeout()
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let (sql_state, code) = driver_codes(db_err.as_ref());
                DbError::database(db_err.message(), sql_state, code)
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None, None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::io("database round-trip", io_err),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => {
                DbError::connection_lost(format!("Protocol error: {}", msg))
            }
            sqlx::Error::WorkerCrashed => DbError::connection_lost("Database worker crashed"),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Split a driver error into (SQLSTATE, vendor code).
///
/// MySQL reports both; PostgreSQL only has SQLSTATE; SQLite only has its
/// extended result code.
fn driver_codes(err: &dyn sqlx::error::DatabaseError) -> (Option<String>, Option<String>) {
    if let Some(mysql) = err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        return (
            mysql.code().map(str::to_string),
            Some(mysql.number().to_string()),
        );
    }
    if err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
        // Constraint failures are reported under SQLSTATE class 23
        let sql_state = (!matches!(err.kind(), sqlx::error::ErrorKind::Other))
            .then(|| "23000".to_string());
        return (sql_state, err.code().map(|c| c.to_string()));
    }
    (err.code().map(|c| c.to_string()), None)
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
