//! Delivery sink contract.
//!
//! The dispatcher hands claimed outbox rows to a sink one at a time and maps
//! the result back onto the row: success marks it processed, a retryable
//! failure schedules a retry, a permanent failure dead-letters it.

use async_trait::async_trait;
use thiserror::Error;

use ledger_database::OutboxRow;

/// Why a delivery attempt did not succeed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Transient failure; the row stays pending and is retried with backoff.
    #[error("retryable delivery failure: {0}")]
    Retryable(String),

    /// The receiver will never accept this event; the row is dead-lettered
    /// without consuming the remaining retry budget.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Retryable(_))
    }
}

/// A sink that receives committed events from the dispatcher.
///
/// Implementations decide what delivery means (e.g., POST to a webhook,
/// publish to a broker, write to a log).
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one event. Must not retry internally; the dispatcher owns
    /// retry scheduling and the attempt counter.
    async fn deliver(&self, row: &OutboxRow) -> Result<(), DeliveryError>;
}

/// A no-op sink that accepts and discards every event.
///
/// Useful for draining an outbox whose receiver is gone for good.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl DeliverySink for NullSink {
    async fn deliver(&self, _row: &OutboxRow) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// A sink that records all delivered rows for testing.
#[derive(Debug, Default)]
pub struct RecordingSink {
    rows: std::sync::Mutex<Vec<OutboxRow>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cloned vector of all delivered rows, in delivery order.
    pub fn delivered(&self) -> Vec<OutboxRow> {
        self.rows.lock().expect("lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.rows.lock().expect("lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, row: &OutboxRow) -> Result<(), DeliveryError> {
        self.rows.lock().expect("lock poisoned").push(row.clone());
        Ok(())
    }
}

/// A sink that fails a fixed number of deliveries before succeeding.
/// Drives the retry and dead-letter paths in tests.
#[derive(Debug)]
pub struct FailingSink {
    failures_left: std::sync::Mutex<u32>,
    permanent: bool,
    calls: std::sync::atomic::AtomicU32,
}

impl FailingSink {
    /// Fail the first `failures` deliveries with a retryable error.
    pub fn retryable(failures: u32) -> Self {
        Self {
            failures_left: std::sync::Mutex::new(failures),
            permanent: false,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Fail the first `failures` deliveries with a permanent error.
    pub fn permanent(failures: u32) -> Self {
        Self {
            failures_left: std::sync::Mutex::new(failures),
            permanent: true,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Total deliveries attempted against this sink.
    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySink for FailingSink {
    async fn deliver(&self, row: &OutboxRow) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let mut failures_left = self.failures_left.lock().expect("lock poisoned");
        if *failures_left == 0 {
            return Ok(());
        }
        *failures_left -= 1;

        let message = format!("delivery of row {} refused", row.id);
        if self.permanent {
            Err(DeliveryError::Permanent(message))
        } else {
            Err(DeliveryError::Retryable(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_database::OutboxStatus;

    fn test_row(id: i64) -> OutboxRow {
        OutboxRow {
            id,
            event_type: "user_registered".to_string(),
            aggregate_id: "user-1".to_string(),
            payload: serde_json::json!({"email": "ada@example.com"}),
            created_at: Utc::now(),
            processed_at: None,
            attempts: 0,
            status: OutboxStatus::Pending,
            error_message: None,
            next_eligible_at: None,
            claimed_by: None,
            claimed_at: None,
        }
    }

    #[tokio::test]
    async fn recording_sink_keeps_delivery_order() {
        let sink = RecordingSink::new();
        assert!(sink.is_empty());

        sink.deliver(&test_row(1)).await.unwrap();
        sink.deliver(&test_row(2)).await.unwrap();

        let delivered = sink.delivered();
        assert_eq!(delivered.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 2]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn failing_sink_recovers_after_budget() {
        let sink = FailingSink::retryable(2);

        let first = sink.deliver(&test_row(1)).await.unwrap_err();
        assert!(first.is_retryable());
        assert!(sink.deliver(&test_row(1)).await.is_err());
        assert!(sink.deliver(&test_row(1)).await.is_ok());
        assert_eq!(sink.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retryable() {
        let sink = FailingSink::permanent(1);
        let err = sink.deliver(&test_row(7)).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("row 7"));
    }
}
