//! User aggregate.
//!
//! Mutations validate input, apply the change, and record a matching event in
//! the aggregate's buffer. Nothing here performs I/O; persistence and event
//! delivery happen in the storage and outbox layers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::buffer::EventBuffer;
use crate::error::{DomainError, DomainResult};
use crate::events::{DomainEvent, EventKind};

#[derive(Debug, Clone)]
pub struct User {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: EventBuffer,
}

impl User {
    /// Registers a new user. Emits `user_registered`.
    pub fn register(email: &str, first_name: &str, last_name: &str) -> DomainResult<Self> {
        let email = normalize_email(email)?;
        let first_name = require_non_empty(first_name, "first name")?;
        let last_name = require_non_empty(last_name, "last name")?;

        let now = Utc::now();
        let mut user = Self {
            id: Uuid::new_v4(),
            email,
            first_name,
            last_name,
            active: true,
            created_at: now,
            updated_at: now,
            events: EventBuffer::new(),
        };
        user.events.record(DomainEvent::new(
            user.id,
            EventKind::UserRegistered {
                email: user.email.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
            },
        ));
        Ok(user)
    }

    /// Rehydrates a user from stored state. Records no event.
    pub fn from_stored(
        id: Uuid,
        email: String,
        first_name: String,
        last_name: String,
        active: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            first_name,
            last_name,
            active,
            created_at,
            updated_at,
            events: EventBuffer::new(),
        }
    }

    /// Updates email and/or name. Emits `user_profile_updated` only when
    /// something actually changed.
    pub fn update_profile(
        &mut self,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::InactiveUser);
        }

        let old_email = self.email.clone();
        let old_full_name = self.full_name();
        let mut changed = false;

        if let Some(email) = email {
            let email = normalize_email(email)?;
            if email != self.email {
                self.email = email;
                changed = true;
            }
        }
        if let Some(first_name) = first_name {
            let first_name = require_non_empty(first_name, "first name")?;
            if first_name != self.first_name {
                self.first_name = first_name;
                changed = true;
            }
        }
        if let Some(last_name) = last_name {
            let last_name = require_non_empty(last_name, "last name")?;
            if last_name != self.last_name {
                self.last_name = last_name;
                changed = true;
            }
        }

        if changed {
            self.updated_at = Utc::now();
            let event = DomainEvent::new(
                self.id,
                EventKind::UserProfileUpdated {
                    old_email,
                    new_email: self.email.clone(),
                    old_full_name,
                    new_full_name: self.full_name(),
                },
            );
            self.events.record(event);
        }
        Ok(())
    }

    /// Deactivates the account. Emits `user_deactivated`. Calling this on an
    /// already-inactive user is a no-op.
    pub fn deactivate(&mut self, reason: Option<&str>) {
        if !self.active {
            return;
        }
        self.active = false;
        self.updated_at = Utc::now();
        self.events.record(DomainEvent::new(
            self.id,
            EventKind::UserDeactivated {
                email: self.email.clone(),
                reason: reason.map(str::to_owned),
            },
        ));
    }

    /// Restores a deactivated account. Records no event.
    pub fn reactivate(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.updated_at = Utc::now();
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

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::InvalidEmail(raw.to_string()));
    }
    Ok(email)
}

fn require_non_empty(raw: &str, field: &'static str) -> DomainResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(DomainError::EmptyField { field });
    }
    Ok(value.to_string())
}
