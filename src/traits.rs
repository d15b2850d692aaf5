//! Capability traits at the seams of the scraper.
//!
//! The orchestrator only ever talks to these traits. Concrete variants are
//! picked once at startup by [`crate::backend::open`] (sink + state store)
//! and by the binary (chat source).
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  ChatSource  │──▶│ Orchestrator │──▶│ Sink             │
//! │ Telegram/mem │   │   (scrape)   │   │ JSON lines / DB  │
//! └──────────────┘   └──────┬───────┘   └──────────────────┘
//!                           ▼
//!                   ┌──────────────────┐
//!                   │ StateStore       │
//!                   │ state file / DB  │
//!                   └──────────────────┘
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ChatEvent, ChatRef, MessageRecord, ResolvedChat};

// ═══════════════════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════════════════

/// Destination for normalized messages.
///
/// `emit` must either fully persist the record or return an error. The
/// orchestrator never checkpoints a record whose emit failed.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, record: &MessageRecord) -> Result<()>;

    /// Whether emitting an already-delivered id replaces the stored record.
    ///
    /// Append-only sinks return `false`; edits to delivered messages are then
    /// not re-emitted.
    fn upserts(&self) -> bool {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════
// State Store
// ═══════════════════════════════════════════════════════════════════════

/// Per-chat checkpoint storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The last processed message id for a chat, if any.
    async fn load(&self, peer_id: i64) -> Result<Option<i32>>;

    /// Replace the checkpoint for a chat. Must not leave a partial write
    /// behind on failure.
    async fn save(&self, peer_id: i64, last_message_id: i32, at: DateTime<Utc>) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Chat Source
// ═══════════════════════════════════════════════════════════════════════

/// The external message source (a connected, authorized client).
///
/// Implementations are thin adapters: ordering and filtering guarantees are
/// enforced on top of them by [`crate::fetch::Fetcher`], so a source may
/// return extra or unordered messages.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Resolve a configured chat identifier to a stable peer.
    async fn resolve(&self, chat: &ChatRef) -> Result<ResolvedChat>;

    /// Messages of `peer_id` newer than `after_id` and not older than `since`.
    async fn history(
        &self,
        peer_id: i64,
        after_id: Option<i32>,
        since: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>>;

    /// Register interest in live events for a peer.
    fn subscribe(&self, _peer_id: i64) {}

    /// Wait for the next live event from any subscribed chat.
    ///
    /// `Ok(None)` means the source closed the stream.
    async fn next_event(&self) -> Result<Option<ChatEvent>>;

    /// Drop interest in live events for a peer. Called on every exit path of
    /// a subscription.
    fn unsubscribe(&self, _peer_id: i64) {}
}
