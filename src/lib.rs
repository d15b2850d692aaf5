//! # tg-chat-scrape
//!
//! Incremental scraper for a single Telegram chat.
//!
//! Each run resolves the configured chat, catches up on every message newer
//! than the stored checkpoint (bounded by a lookback window), and optionally
//! keeps following new and edited messages until interrupted. Messages go
//! either to stdout as JSON lines or into a database; the checkpoint lives
//! next to them (a state file or the `scraper_state` table).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ ChatSource  │──▶│ Orchestrator│──▶│ Sink             │
//! │ (Telegram)  │   │ catch-up +  │   │ stdout / DB      │
//! └─────────────┘   │ live follow │   └──────────────────┘
//!                   └──────┬──────┘
//!                          ▼
//!                   ┌─────────────┐
//!                   │ StateStore  │
//!                   │ file / DB   │
//!                   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tgscrape login                      # sign in, writes the session file
//! tgscrape chats                      # find the chat's peer id
//! TELEGRAM_CHAT_ID=-100123 tgscrape   # catch up, print JSON lines
//! tgscrape --db -f                    # store in DATABASE_URL, keep following
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment / TOML configuration |
//! | [`models`] | Message records, events, chat identifiers |
//! | [`traits`] | `ChatSource`, `Sink`, `StateStore` seams |
//! | [`fetch`] | Ordered history and live subscriptions |
//! | [`scrape`] | The orchestrator |
//! | [`telegram`] | `ChatSource` over the MTProto client |
//! | [`sink_jsonl`] | JSON lines output |
//! | [`state_file`] | Per-chat checkpoint files |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`db_store`] | Database sink and checkpoint store |
//! | [`backend`] | Stream vs database selection |
//! | [`memory`] | In-memory source, sink and store |
//! | [`chats`] | Dialog listing |
//! | [`runner`] | Command runners |

pub mod backend;
pub mod chats;
pub mod config;
pub mod db;
pub mod db_store;
pub mod fetch;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod runner;
pub mod scrape;
pub mod sink_jsonl;
pub mod state_file;
pub mod telegram;
pub mod traits;
