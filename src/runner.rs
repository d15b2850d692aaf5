//! Command runners: wire config, backend and Telegram source together.
//!
//! Every runner that opens a resource closes it on all exit paths, errors
//! included.

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::backend;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::scrape::{run_scrape, ScrapeOptions, ScrapeReport};
use crate::telegram::TelegramSource;

/// Default command: scrape the configured chat.
pub async fn run(
    config: &Config,
    opts: &ScrapeOptions,
    cancel: &CancellationToken,
) -> Result<ScrapeReport> {
    let chat = config.require_chat()?.clone();

    let backend = backend::open(config).await?;
    tracing::info!(
        mode = backend.mode(),
        lookback_hours = config.lookback_hours,
        follow = opts.follow,
        reset = opts.reset,
        "starting scraper"
    );

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = TelegramSource::connect(config) => Some(result),
    };
    let source = match connected {
        Some(Ok(source)) => source,
        Some(Err(e)) => {
            backend.close().await;
            return Err(e);
        }
        None => {
            backend.close().await;
            tracing::info!("[exit] interrupted while connecting");
            return Ok(ScrapeReport::cancelled());
        }
    };

    let result = async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ScrapeReport::cancelled()),
            authorized = source.ensure_authorized() => authorized?,
        }
        let report = run_scrape(
            &source,
            &chat,
            backend.sink.as_ref(),
            backend.state.as_ref(),
            opts,
            cancel,
        )
        .await?;
        Ok::<_, anyhow::Error>(report)
    }
    .await;

    if let Err(e) = source.close() {
        tracing::warn!("failed to persist Telegram session: {:#}", e);
    }
    backend.close().await;

    let report = result?;
    if report.cancelled {
        tracing::info!("[exit] interrupted by user");
    }
    Ok(report)
}

/// `tgscrape login`: sign in interactively and print the string session.
pub async fn run_login(config: &Config) -> Result<()> {
    let source = TelegramSource::connect(config).await?;
    let result = source.login().await;
    let closed = source.close();
    result?;
    closed?;

    eprintln!("Signed in. Session saved under {}", config.data_dir.display());
    eprintln!("For headless runs, export:");
    println!("TELEGRAM_STRING_SESSION={}", source.string_session());
    Ok(())
}

/// `tgscrape init`: create the database schema.
pub async fn run_init(config: &Config) -> Result<()> {
    let Some(db_config) = &config.db else {
        bail!("init requires database mode: pass --db and set DATABASE_URL");
    };
    let database = db::connect(&db_config.url).await?;
    let result = migrate::run_migrations(&database).await;
    database.close().await;
    result?;

    println!("Database initialized successfully.");
    Ok(())
}
