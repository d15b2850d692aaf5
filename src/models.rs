//! Core data models used throughout the scraper.
//!
//! These types represent the normalized messages, live events and chat
//! identifiers that flow between the source, the orchestrator and the sinks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized representation of one chat message.
///
/// Produced fresh from each raw message the source returns. This is the
/// exact shape written as one JSON line in stream mode and stored as the
/// document column in database mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i32,
    /// Chat id in marked form; equal to `peer_id`.
    pub chat_id: i64,
    /// Marked peer id of the chat (stable across runs).
    pub peer_id: i64,
    #[serde(with = "rfc3339")]
    pub date: DateTime<Utc>,
    pub text: String,
    pub sender_id: Option<i64>,
    pub sender: Option<Sender>,
    #[serde(default, with = "rfc3339_opt")]
    pub edit_date: Option<DateTime<Utc>>,
    pub out: bool,
    pub mentioned: bool,
    pub silent: bool,
    pub post: bool,
    pub pinned: bool,
    pub views: Option<i32>,
    pub forwards: Option<i32>,
    pub reply_to_msg_id: Option<i32>,
    pub forward: Option<Forward>,
    pub has_media: bool,
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
}

impl MessageRecord {
    /// A bare record with only the required fields populated.
    pub fn new(peer_id: i64, id: i32, date: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id: peer_id,
            peer_id,
            date,
            text: text.into(),
            sender_id: None,
            sender: None,
            edit_date: None,
            out: false,
            mentioned: false,
            silent: false,
            post: false,
            pinned: false,
            views: None,
            forwards: None,
            reply_to_msg_id: None,
            forward: None,
            has_media: false,
            media_type: None,
            reactions: None,
            entities: None,
        }
    }
}

// Timestamps are written with an explicit `+00:00` offset rather than `Z`.
mod rfc3339 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

mod rfc3339_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&dt.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// Sender metadata nested inside a [`MessageRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub is_bot: bool,
}

/// One reaction bucket on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: Option<String>,
    pub custom_emoji_id: Option<i64>,
    pub count: i32,
    /// Whether the signed-in account chose this reaction.
    pub i_reacted: bool,
    pub my_reaction_order: Option<i32>,
}

/// Origin of a forwarded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    /// Marked peer id of the original author, when visible.
    pub from_id: Option<i64>,
    pub from_name: Option<String>,
    #[serde(default, with = "rfc3339_opt")]
    pub date: Option<DateTime<Utc>>,
}

/// A formatting entity (link, mention, code span, ...) inside the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i32,
    pub length: i32,
    pub url: Option<String>,
}

/// A live event delivered while listening.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    NewMessage(MessageRecord),
    Edited(MessageRecord),
}

impl ChatEvent {
    pub fn record(&self) -> &MessageRecord {
        match self {
            ChatEvent::NewMessage(r) | ChatEvent::Edited(r) => r,
        }
    }
}

/// The configured chat identifier, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    /// Marked peer id (negative for groups and channels).
    Id(i64),
    /// Public username, without the leading `@`.
    Username(String),
}

impl FromStr for ChatRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("chat identifier is empty");
        }
        if let Ok(id) = s.parse::<i64>() {
            return Ok(ChatRef::Id(id));
        }
        Ok(ChatRef::Username(s.trim_start_matches('@').to_string()))
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id),
            ChatRef::Username(name) => write!(f, "@{}", name),
        }
    }
}

/// A chat after resolution against the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChat {
    pub peer_id: i64,
    pub title: String,
}

/// Summary of one dialog, used by the `chats` command.
#[derive(Debug, Clone, Serialize)]
pub struct DialogInfo {
    pub title: String,
    pub id: i64,
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub peer_id: i64,
    pub is_bot: bool,
    pub megagroup: bool,
    pub broadcast: bool,
    pub access_hash: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chat_ref_parses_numeric_and_username() {
        assert_eq!(
            "-1001234567890".parse::<ChatRef>().unwrap(),
            ChatRef::Id(-1001234567890)
        );
        assert_eq!("42".parse::<ChatRef>().unwrap(), ChatRef::Id(42));
        assert_eq!(
            "@rustlang".parse::<ChatRef>().unwrap(),
            ChatRef::Username("rustlang".to_string())
        );
        assert!("  ".parse::<ChatRef>().is_err());
    }

    #[test]
    fn record_serializes_to_single_line_with_offset_date() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let mut record = MessageRecord::new(-100, 7, date, "hello\nworld");
        record.sender_id = Some(11);
        record.sender = Some(Sender {
            id: 11,
            username: None,
            display_name: Some("Ann".to_string()),
            is_bot: false,
        });

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["peer_id"], -100);
        assert_eq!(value["chat_id"], -100);
        assert_eq!(value["forward"], serde_json::Value::Null);
        assert_eq!(value["date"], "2024-05-01T12:30:00+00:00");
        assert_eq!(value["text"], "hello\nworld");
        assert_eq!(value["sender"]["username"], serde_json::Value::Null);
        assert!(value.get("reactions").is_none());
        assert!(value.get("entities").is_none());
    }
}
