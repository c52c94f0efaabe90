//! Domain model for the ledger service.
//!
//! This crate provides:
//! - `DomainEvent` / `EventKind`: typed events with a round-tripping JSON envelope
//! - `EventBuffer`: ordered event sequence with an atomic drain
//! - `User`, `Expense`: aggregates that buffer events on every mutation
//!
//! Aggregates never perform I/O and never reference a repository, dispatcher,
//! or sink. Persistence and delivery live in `ledger-database` and
//! `ledger-outbox`.

mod buffer;
mod error;
mod events;
mod expense;
mod user;

pub use buffer::EventBuffer;
pub use error::{DomainError, DomainResult};
pub use events::{DomainEvent, EventKind};
pub use expense::Expense;
pub use user::User;
