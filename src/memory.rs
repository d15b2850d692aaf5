//! In-memory source, sink and state store.
//!
//! Used by the test suites to drive the orchestrator without a network
//! connection or a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::models::{ChatEvent, ChatRef, MessageRecord, ResolvedChat};
use crate::traits::{ChatSource, Sink, StateStore};

/// A fake chat source holding one chat's history plus a live event queue.
///
/// History is returned exactly as stored (unordered, unfiltered), which
/// exercises the fetcher's ordering guarantees.
pub struct MemorySource {
    chat: ResolvedChat,
    history: RwLock<Vec<MessageRecord>>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChatEvent>>,
    subscribed: RwLock<HashSet<i64>>,
    unsubscribe_calls: Mutex<u32>,
    fail_history: RwLock<Option<String>>,
}

/// Handle for pushing live events into a [`MemorySource`].
///
/// Dropping every sender closes the live stream.
#[derive(Clone)]
pub struct EventSender(mpsc::UnboundedSender<ChatEvent>);

impl EventSender {
    pub fn send(&self, event: ChatEvent) {
        let _ = self.0.send(event);
    }
}

impl MemorySource {
    pub fn new(peer_id: i64, title: &str) -> (Self, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            chat: ResolvedChat {
                peer_id,
                title: title.to_string(),
            },
            history: RwLock::new(Vec::new()),
            events: tokio::sync::Mutex::new(rx),
            subscribed: RwLock::new(HashSet::new()),
            unsubscribe_calls: Mutex::new(0),
            fail_history: RwLock::new(None),
        };
        (source, EventSender(tx))
    }

    /// Append messages to the stored history.
    pub fn push_history(&self, records: impl IntoIterator<Item = MessageRecord>) {
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        history.extend(records);
    }

    /// Make every following `history` call fail with `reason`.
    pub fn fail_history(&self, reason: &str) {
        *self.fail_history.write().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    pub fn is_subscribed(&self, peer_id: i64) -> bool {
        self.subscribed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&peer_id)
    }

    pub fn unsubscribe_calls(&self) -> u32 {
        *self.unsubscribe_calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChatSource for MemorySource {
    async fn resolve(&self, chat: &ChatRef) -> Result<ResolvedChat> {
        let matches = match chat {
            ChatRef::Id(id) => *id == self.chat.peer_id,
            ChatRef::Username(_) => false,
        };
        if !matches {
            bail!("chat {} not found", chat);
        }
        Ok(self.chat.clone())
    }

    async fn history(
        &self,
        peer_id: i64,
        _after_id: Option<i32>,
        _since: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>> {
        if let Some(reason) = self
            .fail_history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            bail!(reason);
        }
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        Ok(history
            .iter()
            .filter(|m| m.peer_id == peer_id)
            .cloned()
            .collect())
    }

    fn subscribe(&self, peer_id: i64) {
        self.subscribed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer_id);
    }

    async fn next_event(&self) -> Result<Option<ChatEvent>> {
        let mut events = self.events.lock().await;
        Ok(events.recv().await)
    }

    fn unsubscribe(&self, peer_id: i64) {
        self.subscribed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&peer_id);
        *self.unsubscribe_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}

/// Collects emitted records; can be told to fail on a given message id.
#[derive(Default)]
pub struct MemorySink {
    records: RwLock<Vec<MessageRecord>>,
    fail_on: RwLock<Option<i32>>,
    upserts: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that reports upsert semantics, like the database store.
    pub fn upserting() -> Self {
        Self {
            upserts: true,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, message_id: Option<i32>) {
        *self.fail_on.write().unwrap_or_else(|e| e.into_inner()) = message_id;
    }

    pub fn records(&self) -> Vec<MessageRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.records().iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn emit(&self, record: &MessageRecord) -> Result<()> {
        if *self.fail_on.read().unwrap_or_else(|e| e.into_inner()) == Some(record.id) {
            bail!("sink rejected message {}", record.id);
        }
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn upserts(&self) -> bool {
        self.upserts
    }
}

/// Checkpoints in a map, with a log of every save.
///
/// Loads and saves can be made to fail for error-path tests.
#[derive(Default)]
pub struct MemoryStateStore {
    checkpoints: RwLock<HashMap<i64, i32>>,
    saves: RwLock<Vec<(i64, i32)>>,
    fail_save_on: RwLock<Option<i32>>,
    fail_load: RwLock<bool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_save_on(&self, message_id: Option<i32>) {
        *self.fail_save_on.write().unwrap_or_else(|e| e.into_inner()) = message_id;
    }

    pub fn fail_load(&self, fail: bool) {
        *self.fail_load.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn saves(&self) -> Vec<(i64, i32)> {
        self.saves.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, peer_id: i64) -> Result<Option<i32>> {
        if *self.fail_load.read().unwrap_or_else(|e| e.into_inner()) {
            bail!("state store unavailable");
        }
        Ok(self
            .checkpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&peer_id)
            .copied())
    }

    async fn save(&self, peer_id: i64, last_message_id: i32, _at: DateTime<Utc>) -> Result<()> {
        if *self.fail_save_on.read().unwrap_or_else(|e| e.into_inner()) == Some(last_message_id) {
            bail!("disk full while saving checkpoint {}", last_message_id);
        }
        self.checkpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer_id, last_message_id);
        self.saves
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((peer_id, last_message_id));
        Ok(())
    }
}
