//! Model types for stored rows.

use chrono::{DateTime, Utc};

use crate::error::{DatabaseError, DatabaseResult};

/// Delivery state of an outbox row.
///
/// `Pending` is the only non-terminal state; a row leaves it exactly once,
/// either to `Processed` or to `DeadLetter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(value: &str) -> DatabaseResult<Self> {
        match value {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "dead_letter" => Ok(OutboxStatus::DeadLetter),
            other => Err(DatabaseError::InvalidData(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// One outbox row. `id` is both insertion order and delivery order.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub event_type: String,
    pub aggregate_id: String,
    /// Serialized event envelope; rebuilds the original `DomainEvent`.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub status: OutboxStatus,
    pub error_message: Option<String>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Aggregate counters over the outbox table, for operator visibility.
#[derive(Debug, Clone, Default)]
pub struct OutboxStats {
    pub pending: u64,
    pub processed: u64,
    pub dead_letter: u64,
    pub oldest_pending_age: Option<chrono::Duration>,
    pub average_attempts: f64,
}
