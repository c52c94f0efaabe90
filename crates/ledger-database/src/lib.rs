//! SQLite persistence for the ledger.
//!
//! This crate provides:
//! - A connection wrapper with pragmas and schema migrations applied on open
//! - Repositories that save aggregates and their events in one transaction
//! - The outbox store: claim, mark, retry, cleanup, and stats operations
//!
//! All timestamps are stored as RFC 3339 TEXT in UTC, so SQL comparisons on
//! them are chronologically consistent.

mod db;
mod error;
mod migrations;
mod models;
mod outbox;
mod repositories;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use migrations::CURRENT_VERSION;
pub use models::{OutboxRow, OutboxStats, OutboxStatus};
pub use outbox::{compute_backoff, RetryPolicy};
pub use repositories::{ExpenseRepository, UserRepository};
