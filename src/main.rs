//! # tgscrape
//!
//! Command-line entry point for the Telegram chat scraper.
//!
//! ## Usage
//!
//! ```bash
//! tgscrape [--reset] [-f|--follow] [--db] [--config scrape.toml]
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tgscrape` | Catch up on the configured chat (and follow with `-f`) |
//! | `tgscrape login` | Interactive sign-in; prints a string session |
//! | `tgscrape chats` | List accessible dialogs and their peer ids |
//! | `tgscrape init` | Create the database schema |
//!
//! Configuration comes from the environment (a `.env` file is loaded if
//! present). Logs go to stderr; stdout carries only message records.

use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tg_chat_scrape::chats;
use tg_chat_scrape::config::{self, ConfigArgs};
use tg_chat_scrape::runner;
use tg_chat_scrape::scrape::ScrapeOptions;

/// Incremental Telegram chat scraper.
#[derive(Parser)]
#[command(
    name = "tgscrape",
    about = "Incremental Telegram chat scraper",
    version,
    long_about = "Fetches every message of one Telegram chat newer than the last checkpoint \
    (bounded by LOOKBACK_HOURS), writes them as JSON lines or into a database, and optionally \
    keeps following new and edited messages until interrupted."
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Ignore the stored checkpoint; fetch the whole lookback window.
    #[arg(long)]
    reset: bool,

    /// Keep running after catch-up and emit new messages as they arrive.
    #[arg(short, long)]
    follow: bool,

    /// Store messages and checkpoints in DATABASE_URL instead of stdout/files.
    #[arg(long, global = true)]
    db: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in interactively and print a portable string session.
    Login,

    /// List accessible dialogs with their peer ids.
    Chats {
        /// Emit JSON lines (one object per dialog).
        #[arg(long)]
        json: bool,
    },

    /// Create the database schema (requires --db and DATABASE_URL).
    ///
    /// Idempotent: running it again is safe.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config, cli.db)?;

    match cli.command {
        Some(Commands::Login) => runner::run_login(&cfg).await?,
        Some(Commands::Chats { json }) => chats::run_chats(&cfg, json).await?,
        Some(Commands::Init) => runner::run_init(&cfg).await?,
        None => {
            let started = Instant::now();
            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));

            let mut opts = ScrapeOptions::new(cfg.lookback_hours);
            opts.reset = cli.reset;
            opts.follow = cli.follow;

            let result = runner::run(&cfg, &opts, &cancel).await;
            tracing::info!(
                "[exit] finished in {:.1}s",
                started.elapsed().as_secs_f64()
            );
            result?;
        }
    }

    Ok(())
}

/// Cancel the token on Ctrl+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, stopping");
    cancel.cancel();
}
