//! Classification of statement failures.
//!
//! Each failure is classified exactly once, independent of which driver raised
//! it. The class only decides how the failure is logged and whether a
//! translated error replaces it; nothing here swallows an error.

use crate::error::DbError;

/// SQLSTATEs for "relation does not exist" (PostgreSQL, MySQL/ODBC).
const IGNORABLE_SQL_STATES: &[&str] = &["42P01", "42S02"];

/// MySQL vendor codes: ER_NO_SUCH_TABLE, ER_BAD_TABLE_ERROR.
const IGNORABLE_VENDOR_CODES: &[&str] = &["1146", "1051"];

/// MySQL vendor code: ER_LOCK_DEADLOCK.
const DEADLOCK_VENDOR_CODE: &str = "1213";

/// How a failed statement should be treated.
#[derive(Debug)]
pub enum ErrorClass {
    /// Expected "relation not found" condition; never logged as an error.
    Ignorable,
    /// Syntax or access-rule violation worth logging with the statement text.
    Syntax,
    /// The socket read timed out.
    Timeout,
    /// The driver condition maps onto a more specific error.
    Translated(DbError),
    Other,
}

/// Classify a statement failure.
pub fn classify(err: &DbError) -> ErrorClass {
    if err.is_read_timeout() {
        return ErrorClass::Timeout;
    }

    let DbError::Database {
        message,
        sql_state,
        code,
    } = err
    else {
        return ErrorClass::Other;
    };

    let state = sql_state.as_deref();
    let code = code.as_deref();

    if is_relation_absent(state, code, message) {
        return ErrorClass::Ignorable;
    }
    if is_syntax_error(state, message) {
        return ErrorClass::Syntax;
    }
    if let Some(translated) = translate(message, state, code) {
        return ErrorClass::Translated(translated);
    }
    ErrorClass::Other
}

fn is_relation_absent(state: Option<&str>, code: Option<&str>, message: &str) -> bool {
    state.is_some_and(|s| IGNORABLE_SQL_STATES.contains(&s))
        || code.is_some_and(|c| IGNORABLE_VENDOR_CODES.contains(&c))
        // SQLite has no SQLSTATE; its generic error code needs the message
        || (state.is_none() && message.starts_with("no such table"))
}

fn is_syntax_error(state: Option<&str>, message: &str) -> bool {
    match state {
        Some(s) => s.starts_with("42"),
        None => message.contains("syntax error"),
    }
}

fn translate(message: &str, state: Option<&str>, code: Option<&str>) -> Option<DbError> {
    let sql_state = state.map(str::to_string);
    let vendor = code.map(str::to_string);

    if state.is_some_and(|s| s.starts_with("23")) {
        return Some(DbError::IntegrityViolation {
            message: message.to_string(),
            sql_state,
            code: vendor,
        });
    }
    if matches!(state, Some("40001") | Some("40P01")) || code == Some(DEADLOCK_VENDOR_CODE) {
        return Some(DbError::TransactionRollback {
            message: message.to_string(),
            sql_state,
            code: vendor,
        });
    }
    None
}
