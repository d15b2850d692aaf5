//! Scrape orchestration.
//!
//! Coordinates the run: resolve chat → load checkpoint → catch up on history
//! → (optionally) follow live events. Every record is emitted through the
//! [`Sink`] first and only then checkpointed in the [`StateStore`], so a
//! failed or interrupted run always resumes from the last message that was
//! actually delivered.
//!
//! ```text
//! INIT ──▶ CATCHUP ──▶ DONE
//!             │
//!             └──(follow)──▶ LISTEN ──(cancel)──▶ DONE
//! ```

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;
use crate::models::{ChatEvent, ChatRef, MessageRecord};
use crate::traits::{ChatSource, Sink, StateStore};

/// Run-time switches for one scrape.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Ignore the stored checkpoint; only the lookback window bounds history.
    pub reset: bool,
    /// Enter the live loop after catch-up.
    pub follow: bool,
    pub lookback: Duration,
}

impl ScrapeOptions {
    pub fn new(lookback_hours: u32) -> Self {
        Self {
            reset: false,
            follow: false,
            lookback: Duration::hours(i64::from(lookback_hours)),
        }
    }
}

/// What a finished (or cancelled) run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub peer_id: i64,
    pub title: String,
    /// Checkpoint the run started from (`None` on first run or with reset).
    pub start_id: Option<i32>,
    pub catchup_count: u64,
    pub live_count: u64,
    /// Checkpoint at the end of the run.
    pub last_id: Option<i32>,
    pub cancelled: bool,
}

impl ScrapeReport {
    /// A run interrupted before it resolved the chat.
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to resolve chat {chat}")]
    Resolve {
        chat: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read checkpoint for chat {peer_id}")]
    LoadCheckpoint {
        peer_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to fetch messages")]
    Fetch(#[source] anyhow::Error),

    #[error("failed to emit message {message_id}")]
    Emit {
        message_id: i32,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to checkpoint message {message_id}")]
    Checkpoint {
        message_id: i32,
        #[source]
        source: anyhow::Error,
    },

    #[error("message source closed the live stream")]
    SourceClosed,
}

/// Run one scrape against an already-connected source.
///
/// Returns normally on completion and on cancellation (`report.cancelled`).
/// Cancellation is only observed between records and while waiting on the
/// source, so an emit/checkpoint pair is never split.
pub async fn run_scrape(
    source: &dyn ChatSource,
    chat: &ChatRef,
    sink: &dyn Sink,
    state: &dyn StateStore,
    opts: &ScrapeOptions,
    cancel: &CancellationToken,
) -> Result<ScrapeReport, ScrapeError> {
    // INIT
    let resolved = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(ScrapeReport::cancelled()),
        result = source.resolve(chat) => result.map_err(|source| ScrapeError::Resolve {
            chat: chat.to_string(),
            source,
        })?,
    };
    let peer_id = resolved.peer_id;
    tracing::info!("Scraping: {} [{} | {}]", resolved.title, peer_id, chat);

    let start_id = if opts.reset {
        tracing::info!("reset requested, ignoring stored checkpoint");
        None
    } else {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(ScrapeReport {
                    peer_id,
                    title: resolved.title,
                    ..ScrapeReport::cancelled()
                });
            }
            result = state.load(peer_id) => {
                result.map_err(|source| ScrapeError::LoadCheckpoint { peer_id, source })?
            }
        }
    };

    let mut run = Run {
        sink,
        state,
        peer_id,
        checkpoint: start_id,
    };
    let mut report = ScrapeReport {
        peer_id,
        title: resolved.title,
        start_id,
        ..Default::default()
    };

    // CATCHUP
    let since = Utc::now() - opts.lookback;
    tracing::info!(
        "Fetching since ID {} or {}",
        start_id.unwrap_or(0),
        since.to_rfc3339()
    );

    let fetcher = Fetcher::new(source);
    let history = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            report.cancelled = true;
            report.last_id = run.checkpoint;
            return Ok(report);
        }
        result = fetcher.history(peer_id, start_id, since) => result.map_err(ScrapeError::Fetch)?,
    };

    for record in history {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        run.deliver(&record, Utc::now()).await?;
        report.catchup_count += 1;
    }
    report.last_id = run.checkpoint;

    tracing::info!(
        "Processed {} messages. Last ID: {}",
        report.catchup_count,
        run.checkpoint.unwrap_or(0)
    );

    if !opts.follow || report.cancelled {
        return Ok(report);
    }

    // LISTEN
    tracing::info!("--- Listening for new messages (Ctrl+C to stop) ---");
    let mut subscription = fetcher.listen(peer_id);
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            event = subscription.next() => event.map_err(ScrapeError::Fetch)?,
        };

        let Some(event) = event else {
            report.last_id = run.checkpoint;
            return Err(ScrapeError::SourceClosed);
        };

        if run.handle_live(event, Utc::now()).await? {
            report.live_count += 1;
        }
        report.last_id = run.checkpoint;
    }

    report.last_id = run.checkpoint;
    if let Some(id) = run.checkpoint {
        tracing::info!("Final state: {}", id);
    }
    Ok(report)
}

/// Per-run delivery state: the sink/store pair and the current checkpoint.
struct Run<'a> {
    sink: &'a dyn Sink,
    state: &'a dyn StateStore,
    peer_id: i64,
    checkpoint: Option<i32>,
}

impl Run<'_> {
    /// Emit a record, then checkpoint it if it advances the checkpoint.
    async fn deliver(
        &mut self,
        record: &MessageRecord,
        at: DateTime<Utc>,
    ) -> Result<(), ScrapeError> {
        self.sink
            .emit(record)
            .await
            .map_err(|source| ScrapeError::Emit {
                message_id: record.id,
                source,
            })?;

        if self.advances(record.id) {
            self.state
                .save(self.peer_id, record.id, at)
                .await
                .map_err(|source| ScrapeError::Checkpoint {
                    message_id: record.id,
                    source,
                })?;
            self.checkpoint = Some(record.id);
        }
        Ok(())
    }

    /// Handle one live event. Returns whether anything was emitted.
    ///
    /// New messages at or below the checkpoint were already delivered and are
    /// skipped. Edits of delivered messages are re-emitted under the same id
    /// only when the sink upserts; the checkpoint never moves backwards.
    async fn handle_live(
        &mut self,
        event: ChatEvent,
        at: DateTime<Utc>,
    ) -> Result<bool, ScrapeError> {
        match &event {
            ChatEvent::NewMessage(record) if !self.advances(record.id) => {
                tracing::debug!(message_id = record.id, "skipping already processed message");
                Ok(false)
            }
            ChatEvent::Edited(record) if !self.advances(record.id) && !self.sink.upserts() => {
                tracing::debug!(message_id = record.id, "skipping edit of delivered message");
                Ok(false)
            }
            ChatEvent::NewMessage(record) | ChatEvent::Edited(record) => {
                self.deliver(record, at).await?;
                Ok(true)
            }
        }
    }

    fn advances(&self, id: i32) -> bool {
        self.checkpoint.map_or(true, |c| id > c)
    }
}
