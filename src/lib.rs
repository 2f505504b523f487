//! DB Connection Guard Library
//!
//! This library wraps pooled SQL connections (SQLite, PostgreSQL, MySQL) so
//! they are safe to hand to application code: usage is tracked for replica
//! routing, driver failures are classified and logged, idle connections are
//! kept alive, and every connection goes back to its pool exactly once.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{ConnectionWrapper, WrapperFactory};
pub use error::{DbError, DbResult};
