//! Dispatcher error types.

use thiserror::Error;

/// Dispatcher error type.
///
/// Sink-side failures never surface here; they are classified into
/// [`DeliveryError`](crate::sink::DeliveryError) and resolved against the
/// failing row instead.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] ledger_database::DatabaseError),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
