//! Outbox store operations.
//!
//! Rows are created by repositories inside their save transaction and mutated
//! only through the claim/mark operations here. A row leaves PENDING exactly
//! once; PROCESSED and DEAD_LETTER are terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use ledger_domain::DomainEvent;

use crate::db::{parse_datetime, Database};
use crate::error::{DatabaseError, DatabaseResult};
use crate::models::{OutboxRow, OutboxStats, OutboxStatus};

/// Retry budget and backoff shape for failed deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt count at which a row is dead-lettered.
    pub max_attempts: u32,
    /// Base duration for exponential backoff.
    pub base_delay: Duration,
    /// Cap on the computed backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Backoff delay after `attempts` failed deliveries: `base_delay * 2^attempts`,
/// capped at `max_delay`.
pub fn compute_backoff(attempts: u32, policy: &RetryPolicy) -> chrono::Duration {
    if attempts == 0 {
        return chrono::Duration::zero();
    }

    let base_ms = policy.base_delay.as_millis() as u64;
    let max_ms = policy.max_delay.as_millis() as u64;
    let multiplier = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    chrono::Duration::milliseconds(delay_ms as i64)
}

const ROW_COLUMNS: &str = "id, event_type, aggregate_id, payload, created_at, processed_at, \
     attempts, status, error_message, next_eligible_at, claimed_by, claimed_at";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRow> {
    let payload_text: String = row.get(3)?;
    let payload = serde_json::from_str(&payload_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_text: String = row.get(7)?;
    let status = OutboxStatus::parse(&status_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(OutboxRow {
        id: row.get(0)?,
        event_type: row.get(1)?,
        aggregate_id: row.get(2)?,
        payload,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        processed_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
        attempts: row.get(6)?,
        status,
        error_message: row.get(8)?,
        next_eligible_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        claimed_by: row.get(10)?,
        claimed_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
    })
}

fn row_status(conn: &Connection, id: i64) -> DatabaseResult<Option<OutboxStatus>> {
    match conn.query_row(
        "SELECT status FROM outbox_events WHERE id = ?1",
        params![id],
        |row| row.get::<_, String>(0),
    ) {
        Ok(raw) => Ok(Some(OutboxStatus::parse(&raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert one PENDING row inside the caller's open save transaction.
///
/// The row becomes visible together with the aggregate state it belongs to,
/// or not at all.
pub(crate) fn insert_pending(
    tx: &Transaction<'_>,
    event: &DomainEvent,
    created_at: DateTime<Utc>,
) -> DatabaseResult<i64> {
    let payload = serde_json::to_string(event)?;
    tx.execute(
        "INSERT INTO outbox_events (event_type, aggregate_id, payload, created_at, attempts, status)
         VALUES (?1, ?2, ?3, ?4, 0, 'pending')",
        params![
            event.event_type(),
            event.aggregate_id.to_string(),
            payload,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

impl Database {
    /// Claim up to `limit` deliverable rows for `worker_id`, oldest first.
    ///
    /// Deliverable means PENDING, past any backoff schedule, and either
    /// unclaimed or holding a claim older than `claim_timeout` (rows from a
    /// crashed claimer become deliverable again). The select and the claim
    /// stamps run in one write transaction, so two concurrent claimers always
    /// receive disjoint batches.
    pub fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        claim_timeout: Duration,
    ) -> DatabaseResult<Vec<OutboxRow>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let reclaim_cutoff = now - chrono::Duration::milliseconds(claim_timeout.as_millis() as i64);

        let mut rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ROW_COLUMNS} FROM outbox_events
                 WHERE status = 'pending'
                   AND (next_eligible_at IS NULL OR next_eligible_at <= ?1)
                   AND (claimed_at IS NULL OR claimed_at <= ?2)
                 ORDER BY id ASC
                 LIMIT ?3"
            ))?;
            let mapped = stmt.query_map(
                params![now.to_rfc3339(), reclaim_cutoff.to_rfc3339(), limit as i64],
                read_row,
            )?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        for row in &mut rows {
            tx.execute(
                "UPDATE outbox_events SET claimed_by = ?1, claimed_at = ?2 WHERE id = ?3",
                params![worker_id, now.to_rfc3339(), row.id],
            )?;
            row.claimed_by = Some(worker_id.to_string());
            row.claimed_at = Some(now);
        }
        tx.commit()?;

        if !rows.is_empty() {
            debug!(worker_id, count = rows.len(), "Claimed outbox batch");
        }
        Ok(rows)
    }

    /// Mark a delivered row PROCESSED and release its claim.
    ///
    /// Idempotent: repeating the call on an already-processed row is a no-op
    /// and leaves `processed_at` untouched. Terminal rows never transition.
    pub fn mark_processed(&self, id: i64) -> DatabaseResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE outbox_events
             SET status = 'processed', processed_at = ?1, claimed_by = NULL, claimed_at = NULL
             WHERE id = ?2 AND status = 'pending'",
            params![Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            match row_status(&conn, id)? {
                None => return Err(DatabaseError::NotFound(format!("outbox row {id}"))),
                Some(OutboxStatus::Processed) => {}
                Some(status) => {
                    warn!(
                        id,
                        status = status.as_str(),
                        "Ignoring mark_processed on non-pending row"
                    );
                }
            }
        }
        Ok(())
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments `attempts`; when the count reaches `policy.max_attempts`
    /// the row is dead-lettered, otherwise it stays PENDING with the claim
    /// released and `next_eligible_at` pushed out by [`compute_backoff`].
    /// Returns the resulting status.
    pub fn mark_failed(
        &self,
        id: i64,
        error: &str,
        policy: &RetryPolicy,
    ) -> DatabaseResult<OutboxStatus> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let attempts = match tx.query_row(
            "SELECT attempts FROM outbox_events WHERE id = ?1 AND status = 'pending'",
            params![id],
            |row| row.get::<_, u32>(0),
        ) {
            Ok(previous) => previous + 1,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let status = row_status(&tx, id)?
                    .ok_or_else(|| DatabaseError::NotFound(format!("outbox row {id}")))?;
                warn!(
                    id,
                    status = status.as_str(),
                    "Ignoring mark_failed on non-pending row"
                );
                return Ok(status);
            }
            Err(e) => return Err(e.into()),
        };

        let status = if attempts >= policy.max_attempts {
            tx.execute(
                "UPDATE outbox_events
                 SET status = 'dead_letter', attempts = ?1, error_message = ?2,
                     next_eligible_at = NULL, claimed_by = NULL, claimed_at = NULL
                 WHERE id = ?3",
                params![attempts, error, id],
            )?;
            OutboxStatus::DeadLetter
        } else {
            let next_eligible_at = Utc::now() + compute_backoff(attempts, policy);
            tx.execute(
                "UPDATE outbox_events
                 SET attempts = ?1, error_message = ?2, next_eligible_at = ?3,
                     claimed_by = NULL, claimed_at = NULL
                 WHERE id = ?4",
                params![attempts, error, next_eligible_at.to_rfc3339(), id],
            )?;
            OutboxStatus::Pending
        };
        tx.commit()?;

        debug!(
            id,
            attempts,
            status = status.as_str(),
            "Recorded delivery failure"
        );
        Ok(status)
    }

    /// Dead-letter a row immediately, bypassing the remaining retry budget.
    ///
    /// Used when the sink reports a permanent, non-retryable failure. The
    /// attempt is still counted so statistics reflect the delivery try.
    pub fn mark_dead_letter(&self, id: i64, error: &str) -> DatabaseResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE outbox_events
             SET status = 'dead_letter', attempts = attempts + 1, error_message = ?1,
                 next_eligible_at = NULL, claimed_by = NULL, claimed_at = NULL
             WHERE id = ?2 AND status = 'pending'",
            params![error, id],
        )?;

        if updated == 0 {
            match row_status(&conn, id)? {
                None => return Err(DatabaseError::NotFound(format!("outbox row {id}"))),
                Some(status) => {
                    warn!(
                        id,
                        status = status.as_str(),
                        "Ignoring mark_dead_letter on non-pending row"
                    );
                }
            }
        }
        Ok(())
    }

    /// Release unresolved claims held by `worker_id`.
    ///
    /// Called on graceful shutdown; the claim timeout covers crashed
    /// dispatchers that never get here.
    pub fn release_claims(&self, worker_id: &str) -> DatabaseResult<u64> {
        let conn = self.conn();
        let released = conn.execute(
            "UPDATE outbox_events SET claimed_by = NULL, claimed_at = NULL
             WHERE claimed_by = ?1 AND status = 'pending'",
            params![worker_id],
        )?;
        Ok(released as u64)
    }

    /// Return all DEAD_LETTER rows to PENDING with a fresh retry budget.
    /// Operator-triggered redelivery; returns the number of rows reset.
    pub fn retry_failed(&self) -> DatabaseResult<u64> {
        let conn = self.conn();
        let reset = conn.execute(
            "UPDATE outbox_events
             SET status = 'pending', attempts = 0, error_message = NULL,
                 next_eligible_at = NULL, claimed_by = NULL, claimed_at = NULL
             WHERE status = 'dead_letter'",
            [],
        )?;
        Ok(reset as u64)
    }

    /// Delete PROCESSED rows whose `processed_at` is older than `older_than`.
    ///
    /// PENDING and DEAD_LETTER rows are never touched regardless of age;
    /// those need explicit operator action. With `dry_run`, counts what would
    /// be deleted without deleting anything.
    pub fn cleanup(&self, older_than: DateTime<Utc>, dry_run: bool) -> DatabaseResult<u64> {
        let conn = self.conn();
        let cutoff = older_than.to_rfc3339();

        if dry_run {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM outbox_events
                 WHERE status = 'processed' AND processed_at < ?1",
                params![cutoff],
                |row| row.get(0),
            )?;
            return Ok(count as u64);
        }

        let deleted = conn.execute(
            "DELETE FROM outbox_events WHERE status = 'processed' AND processed_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted as u64)
    }

    /// Aggregate counters over the outbox table.
    pub fn outbox_stats(&self) -> DatabaseResult<OutboxStats> {
        let conn = self.conn();
        let mut stats = OutboxStats::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")?;
        let counts = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for entry in counts {
            let (status, count) = entry?;
            match OutboxStatus::parse(&status)? {
                OutboxStatus::Pending => stats.pending = count as u64,
                OutboxStatus::Processed => stats.processed = count as u64,
                OutboxStatus::DeadLetter => stats.dead_letter = count as u64,
            }
        }

        let oldest_pending: Option<String> = conn.query_row(
            "SELECT MIN(created_at) FROM outbox_events WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        stats.oldest_pending_age = oldest_pending.map(|raw| Utc::now() - parse_datetime(raw));

        stats.average_attempts = conn.query_row(
            "SELECT COALESCE(AVG(attempts), 0.0) FROM outbox_events",
            [],
            |row| row.get(0),
        )?;

        Ok(stats)
    }

    /// Fetch a single row by id.
    pub fn outbox_row(&self, id: i64) -> DatabaseResult<Option<OutboxRow>> {
        let conn = self.conn();
        let result = conn.query_row(
            &format!("SELECT {ROW_COLUMNS} FROM outbox_events WHERE id = ?1"),
            params![id],
            read_row,
        );
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All rows in insertion order. Intended for tests and small operator
    /// queries, not for the dispatch path.
    pub fn list_outbox_rows(&self) -> DatabaseResult<Vec<OutboxRow>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {ROW_COLUMNS} FROM outbox_events ORDER BY id ASC"))?;
        let rows = stmt.query_map([], read_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_domain::EventKind;
    use uuid::Uuid;

    fn test_event(label: &str) -> DomainEvent {
        DomainEvent::new(
            Uuid::new_v4(),
            EventKind::UserDeactivated {
                email: format!("{label}@example.com"),
                reason: None,
            },
        )
    }

    fn seed_pending(db: &Database, count: usize) -> Vec<i64> {
        let mut conn = db.conn();
        let tx = conn.transaction().unwrap();
        let now = Utc::now();
        let ids = (0..count)
            .map(|i| insert_pending(&tx, &test_event(&format!("user{i}")), now).unwrap())
            .collect();
        tx.commit().unwrap();
        ids
    }

    fn short_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }

    const NO_TIMEOUT: Duration = Duration::from_secs(60);

    #[test]
    fn compute_backoff_caps_and_grows() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };

        assert_eq!(compute_backoff(0, &policy), chrono::Duration::zero());
        assert_eq!(compute_backoff(1, &policy), chrono::Duration::seconds(4));
        assert_eq!(compute_backoff(2, &policy), chrono::Duration::seconds(8));
        assert_eq!(compute_backoff(3, &policy), chrono::Duration::seconds(10));
        assert_eq!(compute_backoff(10, &policy), chrono::Duration::seconds(10));
    }

    #[test]
    fn compute_backoff_large_attempt_count_saturates() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            ..RetryPolicy::default()
        };

        // Very large attempt counts should cap at max, not overflow
        assert_eq!(
            compute_backoff(100, &policy),
            chrono::Duration::seconds(300)
        );
        assert_eq!(
            compute_backoff(u32::MAX, &policy),
            chrono::Duration::seconds(300)
        );
    }

    #[test]
    fn claim_returns_rows_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 3);

        let batch = db.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap();
        assert_eq!(batch.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
        assert!(batch
            .iter()
            .all(|r| r.claimed_by.as_deref() == Some("worker-a")));
    }

    #[test]
    fn claim_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 5);

        let batch = db.claim_batch("worker-a", 2, NO_TIMEOUT).unwrap();
        assert_eq!(
            batch.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![ids[0], ids[1]]
        );
    }

    #[test]
    fn claimed_rows_are_excluded_until_timeout() {
        let db = Database::open_in_memory().unwrap();
        seed_pending(&db, 2);

        let first = db.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap();
        assert_eq!(first.len(), 2);

        let second = db.claim_batch("worker-b", 10, NO_TIMEOUT).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn expired_claims_are_reclaimable() {
        let db = Database::open_in_memory().unwrap();
        seed_pending(&db, 2);

        let first = db.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap();
        assert_eq!(first.len(), 2);

        // Zero timeout: any existing claim is immediately expired
        let second = db.claim_batch("worker-b", 10, Duration::ZERO).unwrap();
        assert_eq!(second.len(), 2);
        assert!(second
            .iter()
            .all(|r| r.claimed_by.as_deref() == Some("worker-b")));
    }

    #[test]
    fn claim_skips_rows_scheduled_in_the_future() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);

        db.mark_failed(ids[0], "boom", &short_policy()).unwrap();

        let batch = db.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn claim_includes_rows_whose_backoff_elapsed() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);

        // Zero base delay makes the retry due immediately
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            ..short_policy()
        };
        db.mark_failed(ids[0], "boom", &policy).unwrap();

        let batch = db.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].attempts, 1);
    }

    #[test]
    fn concurrent_claims_over_one_file_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let db = Database::open(&path).unwrap();
        seed_pending(&db, 20);
        drop(db);

        let db_a = Database::open(&path).unwrap();
        let db_b = Database::open(&path).unwrap();

        let handle_a =
            std::thread::spawn(move || db_a.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap());
        let handle_b =
            std::thread::spawn(move || db_b.claim_batch("worker-b", 10, NO_TIMEOUT).unwrap());

        let batch_a = handle_a.join().unwrap();
        let batch_b = handle_b.join().unwrap();

        let mut all_ids: Vec<i64> = batch_a.iter().chain(batch_b.iter()).map(|r| r.id).collect();
        all_ids.sort_unstable();
        all_ids.dedup();
        assert_eq!(batch_a.len() + batch_b.len(), 20);
        assert_eq!(all_ids.len(), 20, "a row was claimed by both workers");
    }

    #[test]
    fn mark_processed_sets_processed_at_and_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);

        db.mark_processed(ids[0]).unwrap();
        let row = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Processed);
        assert_eq!(row.attempts, 0);
        let first_processed_at = row.processed_at.unwrap();

        db.mark_processed(ids[0]).unwrap();
        let row = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(row.processed_at.unwrap(), first_processed_at);
    }

    #[test]
    fn mark_processed_on_missing_row_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.mark_processed(999),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn mark_processed_never_resurrects_a_dead_letter_row() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);

        db.mark_dead_letter(ids[0], "rejected").unwrap();
        db.mark_processed(ids[0]).unwrap();

        let row = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::DeadLetter);
        assert!(row.processed_at.is_none());
    }

    #[test]
    fn mark_failed_backoff_strictly_increases() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);
        let policy = RetryPolicy {
            max_attempts: 5,
            ..short_policy()
        };

        db.mark_failed(ids[0], "first", &policy).unwrap();
        let first = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(first.attempts, 1);
        let first_eligible = first.next_eligible_at.unwrap();

        db.mark_failed(ids[0], "second", &policy).unwrap();
        let second = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        let second_eligible = second.next_eligible_at.unwrap();

        assert!(second_eligible > first_eligible);
    }

    #[test]
    fn mark_failed_dead_letters_exactly_at_max_attempts() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);
        let policy = short_policy();

        assert_eq!(
            db.mark_failed(ids[0], "first", &policy).unwrap(),
            OutboxStatus::Pending
        );
        assert_eq!(
            db.mark_failed(ids[0], "second", &policy).unwrap(),
            OutboxStatus::Pending
        );
        assert_eq!(
            db.mark_failed(ids[0], "third", &policy).unwrap(),
            OutboxStatus::DeadLetter
        );

        let row = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::DeadLetter);
        assert_eq!(row.attempts, 3);
        assert_eq!(row.error_message.as_deref(), Some("third"));
        assert!(row.next_eligible_at.is_none());

        // Terminal: a further failure report leaves the row alone
        assert_eq!(
            db.mark_failed(ids[0], "fourth", &policy).unwrap(),
            OutboxStatus::DeadLetter
        );
        let row = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(row.attempts, 3);
        assert_eq!(row.error_message.as_deref(), Some("third"));
    }

    #[test]
    fn mark_failed_releases_the_claim_for_retry() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);

        let batch = db.claim_batch("worker-a", 10, NO_TIMEOUT).unwrap();
        assert_eq!(batch.len(), 1);

        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            ..short_policy()
        };
        db.mark_failed(ids[0], "boom", &policy).unwrap();

        let retried = db.claim_batch("worker-b", 10, NO_TIMEOUT).unwrap();
        assert_eq!(retried.len(), 1);
    }

    #[test]
    fn mark_dead_letter_is_immediate() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 1);

        db.mark_dead_letter(ids[0], "payload rejected").unwrap();

        let row = db.outbox_row(ids[0]).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::DeadLetter);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.error_message.as_deref(), Some("payload rejected"));
    }

    #[test]
    fn release_claims_only_touches_own_unresolved_rows() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 3);

        let batch = db.claim_batch("worker-a", 2, NO_TIMEOUT).unwrap();
        assert_eq!(batch.len(), 2);
        db.mark_processed(ids[0]).unwrap();

        let released = db.release_claims("worker-a").unwrap();
        assert_eq!(released, 1);

        // Released row is claimable again right away
        let next = db.claim_batch("worker-b", 10, NO_TIMEOUT).unwrap();
        assert_eq!(
            next.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![ids[1], ids[2]]
        );
    }

    #[test]
    fn retry_failed_resets_dead_letter_rows_only() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 3);

        db.mark_dead_letter(ids[0], "bad").unwrap();
        db.mark_dead_letter(ids[1], "worse").unwrap();
        db.mark_processed(ids[2]).unwrap();

        let reset = db.retry_failed().unwrap();
        assert_eq!(reset, 2);

        for id in [ids[0], ids[1]] {
            let row = db.outbox_row(id).unwrap().unwrap();
            assert_eq!(row.status, OutboxStatus::Pending);
            assert_eq!(row.attempts, 0);
            assert!(row.error_message.is_none());
            assert!(row.next_eligible_at.is_none());
        }
        let processed = db.outbox_row(ids[2]).unwrap().unwrap();
        assert_eq!(processed.status, OutboxStatus::Processed);
    }

    #[test]
    fn cleanup_spares_pending_and_dead_letter_rows() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 3);

        db.mark_processed(ids[0]).unwrap();
        db.mark_dead_letter(ids[1], "bad").unwrap();

        let cutoff = Utc::now() + chrono::Duration::hours(1);

        let would_delete = db.cleanup(cutoff, true).unwrap();
        assert_eq!(would_delete, 1);
        assert_eq!(db.list_outbox_rows().unwrap().len(), 3, "dry run deleted");

        let deleted = db.cleanup(cutoff, false).unwrap();
        assert_eq!(deleted, 1);

        let remaining = db.list_outbox_rows().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining
            .iter()
            .all(|r| r.status != OutboxStatus::Processed));

        // Idempotent: same cutoff again deletes nothing
        assert_eq!(db.cleanup(cutoff, false).unwrap(), 0);
    }

    #[test]
    fn stats_reflect_status_counts_and_attempts() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed_pending(&db, 4);

        db.mark_processed(ids[0]).unwrap();
        db.mark_dead_letter(ids[1], "bad").unwrap();
        db.mark_failed(ids[2], "flaky", &short_policy()).unwrap();

        let stats = db.outbox_stats().unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dead_letter, 1);
        // attempts: 0 + 1 + 1 + 0 over four rows
        assert!((stats.average_attempts - 0.5).abs() < f64::EPSILON);
        assert!(stats.oldest_pending_age.is_some());
    }

    #[test]
    fn stats_on_empty_outbox_are_zeroed() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.outbox_stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.dead_letter, 0);
        assert!(stats.oldest_pending_age.is_none());
        assert_eq!(stats.average_attempts, 0.0);
    }
}
