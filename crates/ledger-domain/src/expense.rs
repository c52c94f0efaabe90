//! Expense aggregate.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::buffer::EventBuffer;
use crate::error::{DomainError, DomainResult};
use crate::events::{DomainEvent, EventKind};

/// An expense recorded against a user's ledger. Amounts are integer cents.
#[derive(Debug, Clone)]
pub struct Expense {
    id: Uuid,
    user_id: Uuid,
    category: String,
    amount_cents: i64,
    currency: String,
    description: String,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: EventBuffer,
}

impl Expense {
    /// Records a new expense. Emits `expense_created`.
    pub fn create(
        user_id: Uuid,
        category: &str,
        amount_cents: i64,
        currency: &str,
        description: &str,
    ) -> DomainResult<Self> {
        if amount_cents <= 0 {
            return Err(DomainError::InvalidAmount(amount_cents));
        }
        let category = require_non_empty(category, "category")?;
        let currency = require_non_empty(currency, "currency")?.to_uppercase();

        let now = Utc::now();
        let mut expense = Self {
            id: Uuid::new_v4(),
            user_id,
            category,
            amount_cents,
            currency,
            description: description.trim().to_string(),
            deleted: false,
            created_at: now,
            updated_at: now,
            events: EventBuffer::new(),
        };
        expense.events.record(DomainEvent::new(
            expense.id,
            EventKind::ExpenseCreated {
                user_id,
                category: expense.category.clone(),
                amount_cents: expense.amount_cents,
                currency: expense.currency.clone(),
                description: expense.description.clone(),
            },
        ));
        Ok(expense)
    }

    /// Rehydrates an expense from stored state. Records no event.
    pub fn from_stored(
        id: Uuid,
        user_id: Uuid,
        category: String,
        amount_cents: i64,
        currency: String,
        description: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            category,
            amount_cents,
            currency,
            description,
            deleted: false,
            created_at,
            updated_at,
            events: EventBuffer::new(),
        }
    }

    /// Changes amount and/or description. Emits `expense_updated` with the
    /// previous amount only when something actually changed.
    pub fn update(&mut self, amount_cents: i64, description: &str) -> DomainResult<()> {
        if self.deleted {
            return Err(DomainError::DeletedExpense);
        }
        if amount_cents <= 0 {
            return Err(DomainError::InvalidAmount(amount_cents));
        }
        let description = description.trim();
        if amount_cents == self.amount_cents && description == self.description {
            return Ok(());
        }

        let previous_amount_cents = self.amount_cents;
        self.amount_cents = amount_cents;
        self.description = description.to_string();
        self.updated_at = Utc::now();

        self.events.record(DomainEvent::new(
            self.id,
            EventKind::ExpenseUpdated {
                user_id: self.user_id,
                category: self.category.clone(),
                amount_cents: self.amount_cents,
                previous_amount_cents,
                currency: self.currency.clone(),
                description: self.description.clone(),
            },
        ));
        Ok(())
    }

    /// Removes the expense from the ledger. Emits `expense_deleted`. Calling
    /// this on an already-deleted expense is a no-op. The next repository
    /// save removes the stored row.
    pub fn delete(&mut self) {
        if self.deleted {
            return;
        }
        self.deleted = true;
        self.updated_at = Utc::now();
        self.events.record(DomainEvent::new(
            self.id,
            EventKind::ExpenseDeleted {
                user_id: self.user_id,
            },
        ));
    }

    /// Returns all buffered events in recording order and clears the buffer.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        self.events.drain()
    }

    pub fn buffered_events(&self) -> usize {
        self.events.len()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn amount_cents(&self) -> i64 {
        self.amount_cents
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

fn require_non_empty(raw: &str, field: &'static str) -> DomainResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(DomainError::EmptyField { field });
    }
    Ok(value.to_string())
}
