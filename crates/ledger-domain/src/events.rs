//! Domain events for the ledger service.
//!
//! Events are immutable records of completed state changes. Each event
//! serializes to a flat JSON envelope whose `event_type` tag identifies the
//! variant, and the envelope round-trips losslessly so an outbox payload can
//! be rebuilt into the originating event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event-specific data, tagged by event type.
///
/// The serde tag doubles as the wire-level `event_type` identifier stored on
/// each outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    /// A new user completed registration.
    UserRegistered {
        email: String,
        first_name: String,
        last_name: String,
    },
    /// A user changed their email or name.
    UserProfileUpdated {
        old_email: String,
        new_email: String,
        old_full_name: String,
        new_full_name: String,
    },
    /// A user account was deactivated.
    UserDeactivated {
        email: String,
        reason: Option<String>,
    },
    /// A new expense was recorded.
    ExpenseCreated {
        user_id: Uuid,
        category: String,
        amount_cents: i64,
        currency: String,
        description: String,
    },
    /// An existing expense was changed.
    ExpenseUpdated {
        user_id: Uuid,
        category: String,
        amount_cents: i64,
        previous_amount_cents: i64,
        currency: String,
        description: String,
    },
    /// An expense was removed from the ledger. The envelope's `aggregate_id`
    /// identifies the deleted expense.
    ExpenseDeleted {
        user_id: Uuid,
    },
}

impl EventKind {
    /// Wire identifier for this event. Matches the serde tag exactly.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::UserRegistered { .. } => "user_registered",
            EventKind::UserProfileUpdated { .. } => "user_profile_updated",
            EventKind::UserDeactivated { .. } => "user_deactivated",
            EventKind::ExpenseCreated { .. } => "expense_created",
            EventKind::ExpenseUpdated { .. } => "expense_updated",
            EventKind::ExpenseDeleted { .. } => "expense_deleted",
        }
    }
}

/// Immutable envelope around an [`EventKind`].
///
/// Serialized shape:
/// `{event_id, aggregate_id, occurred_at, event_version, event_type, data}`.
/// `occurred_at` is the moment the aggregate recorded the event, which may
/// precede the outbox row's `created_at` (the save transaction time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event_version: u16,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl DomainEvent {
    pub fn new(aggregate_id: Uuid, kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            occurred_at: Utc::now(),
            event_version: 1,
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Serializes the event into its outbox payload.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Rebuilds an event from a stored outbox payload.
    pub fn from_payload(payload: &serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(payload.clone())
    }
}
