//! Ordered history and live subscriptions on top of a [`ChatSource`].
//!
//! The source adapter is allowed to be sloppy (return extra or unordered
//! messages); the fetcher is where the resume-safety guarantees live:
//! history comes back strictly increasing by id with everything at or below
//! the checkpoint, or older than the date floor, removed.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{ChatEvent, MessageRecord};
use crate::traits::ChatSource;

pub struct Fetcher<'a> {
    source: &'a dyn ChatSource,
}

impl<'a> Fetcher<'a> {
    pub fn new(source: &'a dyn ChatSource) -> Self {
        Self { source }
    }

    /// Historical messages after `after_id` and not older than `since`,
    /// oldest first. Every call re-queries the source.
    ///
    /// The whole window is buffered before the first record is yielded:
    /// Telegram pages history newest-first, so ascending order is only known
    /// once the page walk reaches the checkpoint or the date floor.
    pub async fn history(
        &self,
        peer_id: i64,
        after_id: Option<i32>,
        since: DateTime<Utc>,
    ) -> Result<std::vec::IntoIter<MessageRecord>> {
        let raw = self.source.history(peer_id, after_id, since).await?;
        Ok(order_history(raw, peer_id, after_id, since).into_iter())
    }

    /// Subscribe to live events for one chat.
    pub fn listen(&self, peer_id: i64) -> Subscription<'a> {
        self.source.subscribe(peer_id);
        Subscription {
            source: self.source,
            peer_id,
        }
    }
}

/// Filter, sort and de-duplicate a raw history batch.
pub fn order_history(
    mut raw: Vec<MessageRecord>,
    peer_id: i64,
    after_id: Option<i32>,
    since: DateTime<Utc>,
) -> Vec<MessageRecord> {
    raw.retain(|m| {
        m.peer_id == peer_id && after_id.map_or(true, |after| m.id > after) && m.date >= since
    });
    raw.sort_by_key(|m| m.id);
    raw.dedup_by_key(|m| m.id);
    raw
}

/// A live subscription to one chat.
///
/// Unsubscribes from the source when dropped, whichever way the listen loop
/// ends.
pub struct Subscription<'a> {
    source: &'a dyn ChatSource,
    peer_id: i64,
}

impl Subscription<'_> {
    /// Wait for the next event belonging to this chat.
    ///
    /// Returns `Ok(None)` only when the source closed its stream.
    pub async fn next(&mut self) -> Result<Option<ChatEvent>> {
        loop {
            match self.source.next_event().await? {
                Some(event) if event.record().peer_id == self.peer_id => return Ok(Some(event)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn msg(peer: i64, id: i32, hours_ago: i64) -> MessageRecord {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        MessageRecord::new(peer, id, now - Duration::hours(hours_ago), format!("m{}", id))
    }

    #[test]
    fn history_is_sorted_filtered_and_deduplicated() {
        let since = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        let raw = vec![
            msg(1, 9, 1),
            msg(1, 5, 2),
            msg(1, 7, 3),
            msg(1, 7, 3),
            msg(1, 4, 4),  // at/below checkpoint
            msg(1, 8, 30), // older than the floor
            msg(2, 10, 1), // other chat
        ];

        let ordered = order_history(raw, 1, Some(4), since);
        let ids: Vec<i32> = ordered.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 7, 9]);
    }

    #[test]
    fn history_without_checkpoint_uses_date_floor_only() {
        let since = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        let raw = vec![msg(1, 1, 1), msg(1, 2, 48)];
        let ordered = order_history(raw, 1, None, since);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].id, 1);
    }
}
