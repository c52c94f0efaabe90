//! Ledgerd - outbox dispatcher and operator tooling for ledger domain events.

mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use ledger_database::Database;
use ledger_outbox::{DeliverySink, Dispatcher, WebhookConfig, WebhookSink};

use crate::config::Config;

/// Ledgerd command-line interface.
#[derive(Parser)]
#[command(name = "ledgerd")]
#[command(about = "Outbox dispatcher for ledger domain events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the SQLite database file
    #[arg(long, env = "LEDGERD_DB", global = true)]
    db: Option<PathBuf>,

    /// Webhook endpoint that receives event POSTs
    #[arg(long, env = "LEDGERD_WEBHOOK_URL", global = true)]
    webhook_url: Option<String>,

    /// Maximum rows claimed per poll cycle
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Delay between poll cycles in milliseconds
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Delivery attempts before a row is dead-lettered
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch events continuously until interrupted
    Run,
    /// Deliver everything currently claimable, then exit
    Flush,
    /// Return dead-letter rows to pending for redelivery
    RetryFailed,
    /// Delete old processed rows
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Count what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show outbox counters
    Stats,
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(url) = &cli.webhook_url {
        config.webhook_url = Some(url.clone());
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(poll_interval_ms) = cli.poll_interval_ms {
        config.poll_interval_ms = poll_interval_ms;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);

    logging::init_logging(&config.log_level);

    let db = Arc::new(Database::open(&config.db_path)?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_dispatcher(db, &config).await?,
        Commands::Flush => flush(db, &config).await?,
        Commands::RetryFailed => {
            let count = db.retry_failed()?;
            println!("requeued {count} dead-letter rows");
        }
        Commands::Cleanup { days, dry_run } => {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            let count = db.cleanup(cutoff, dry_run)?;
            if dry_run {
                println!("{count} processed rows older than {days} days would be deleted");
            } else {
                println!("deleted {count} processed rows older than {days} days");
            }
        }
        Commands::Stats => print_stats(&db)?,
    }

    Ok(())
}

fn webhook_sink(config: &Config) -> anyhow::Result<Arc<dyn DeliverySink>> {
    let url = config
        .webhook_url
        .clone()
        .context("a webhook URL is required (--webhook-url or LEDGERD_WEBHOOK_URL)")?;
    Ok(Arc::new(WebhookSink::new(WebhookConfig::new(url))))
}

/// Run the dispatcher until Ctrl-C.
async fn run_dispatcher(db: Arc<Database>, config: &Config) -> anyhow::Result<()> {
    let sink = webhook_sink(config)?;
    let dispatcher = Dispatcher::new(db, sink, config.dispatcher_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await?;
    Ok(())
}

/// Deliver everything claimable in one pass and report the outcome.
async fn flush(db: Arc<Database>, config: &Config) -> anyhow::Result<()> {
    let sink = webhook_sink(config)?;
    let dispatcher = Dispatcher::new(db, sink, config.dispatcher_config());

    let stats = dispatcher.flush().await?;
    println!(
        "claimed {}, delivered {}, retried {}, dead-lettered {}",
        stats.claimed, stats.delivered, stats.retried, stats.dead_lettered
    );
    Ok(())
}

fn print_stats(db: &Database) -> anyhow::Result<()> {
    let stats = db.outbox_stats()?;
    println!("pending:        {}", stats.pending);
    println!("processed:      {}", stats.processed);
    println!("dead_letter:    {}", stats.dead_letter);
    match stats.oldest_pending_age {
        Some(age) => println!("oldest pending: {}s", age.num_seconds()),
        None => println!("oldest pending: none"),
    }
    println!("avg attempts:   {:.2}", stats.average_attempts);
    Ok(())
}
