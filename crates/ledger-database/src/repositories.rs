//! Aggregate persistence.
//!
//! `save` writes the aggregate's state row and one outbox row per buffered
//! event in a single transaction. Either all of it commits or none of it
//! does; an event can never exist without the state change that produced it.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use ledger_domain::{Expense, User};

use crate::db::{parse_datetime, Database};
use crate::error::DatabaseResult;
use crate::outbox::insert_pending;

fn parse_uuid(index: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User::from_stored(
        parse_uuid(0, row.get(0)?)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        parse_datetime(row.get::<_, String>(5)?),
        parse_datetime(row.get::<_, String>(6)?),
    ))
}

fn read_expense(row: &rusqlite::Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense::from_stored(
        parse_uuid(0, row.get(0)?)?,
        parse_uuid(1, row.get(1)?)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        parse_datetime(row.get::<_, String>(6)?),
        parse_datetime(row.get::<_, String>(7)?),
    ))
}

const USER_COLUMNS: &str = "id, email, first_name, last_name, is_active, created_at, updated_at";
const EXPENSE_COLUMNS: &str =
    "id, user_id, category, amount_cents, currency, description, created_at, updated_at";

pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert the user row and enqueue its buffered events atomically.
    ///
    /// Events are drained only after the state write succeeds, so a failed
    /// save leaves them buffered for the next attempt. Outbox timestamps are
    /// taken while the write lock is held, which keeps `created_at` order
    /// consistent with row id order across saves.
    pub fn save(&self, user: &mut User) -> DatabaseResult<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO users (id, email, first_name, last_name, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 email = excluded.email,
                 first_name = excluded.first_name,
                 last_name = excluded.last_name,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
            params![
                user.id().to_string(),
                user.email(),
                user.first_name(),
                user.last_name(),
                user.is_active(),
                user.created_at().to_rfc3339(),
                user.updated_at().to_rfc3339(),
            ],
        )?;

        let events = user.drain_events();
        for event in &events {
            insert_pending(&tx, event, now)?;
        }
        tx.commit()?;

        debug!(user_id = %user.id(), events = events.len(), "Saved user");
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            read_user,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lookup by stored email. Emails are normalized to lowercase at the
    /// domain boundary, so the match is exact.
    pub fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            read_user,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct ExpenseRepository {
    db: Arc<Database>,
}

impl ExpenseRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert the expense row and enqueue its buffered events atomically.
    /// Same contract as [`UserRepository::save`]. Saving a deleted expense
    /// removes its row instead, still in the same transaction as the events.
    pub fn save(&self, expense: &mut Expense) -> DatabaseResult<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        if expense.is_deleted() {
            tx.execute(
                "DELETE FROM expenses WHERE id = ?1",
                params![expense.id().to_string()],
            )?;
        } else {
            tx.execute(
                "INSERT INTO expenses
                     (id, user_id, category, amount_cents, currency, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     category = excluded.category,
                     amount_cents = excluded.amount_cents,
                     currency = excluded.currency,
                     description = excluded.description,
                     updated_at = excluded.updated_at",
                params![
                    expense.id().to_string(),
                    expense.user_id().to_string(),
                    expense.category(),
                    expense.amount_cents(),
                    expense.currency(),
                    expense.description(),
                    expense.created_at().to_rfc3339(),
                    expense.updated_at().to_rfc3339(),
                ],
            )?;
        }

        let events = expense.drain_events();
        for event in &events {
            insert_pending(&tx, event, now)?;
        }
        tx.commit()?;

        debug!(expense_id = %expense.id(), events = events.len(), "Saved expense");
        Ok(())
    }

    pub fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Expense>> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1"),
            params![id.to_string()],
            read_expense,
        );
        match result {
            Ok(expense) => Ok(Some(expense)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_for_user(&self, user_id: Uuid) -> DatabaseResult<Vec<Expense>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string()], read_expense)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
