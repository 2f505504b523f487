//! Data models for the connection guard.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{Assignment, DatabaseType};
pub use query::{ExecuteOutcome, ExecuteResult, QueryParam, QueryRows};
