//! Logging initialization for ledgerd.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing output for the process.
///
/// `RUST_LOG` takes precedence when set; otherwise the given level applies to
/// the ledger crates.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ledgerd={level},ledger_outbox={level},ledger_database={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
