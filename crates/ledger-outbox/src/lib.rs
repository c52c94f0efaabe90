//! Reliable delivery of committed ledger events.
//!
//! This crate provides:
//! - Dispatcher: polling loop that claims pending rows and delivers them
//! - DeliverySink: the delivery contract, with test sinks included
//! - WebhookSink: HTTP delivery of events as JSON POSTs

mod dispatcher;
mod error;
mod sink;
mod webhook;

pub use dispatcher::{Dispatcher, DispatcherConfig, DrainStats};
pub use error::{OutboxError, OutboxResult};
pub use sink::{DeliveryError, DeliverySink, FailingSink, NullSink, RecordingSink};
pub use webhook::{WebhookConfig, WebhookSink};
