//! Telegram [`ChatSource`] backed by `grammers-client`.
//!
//! Owns the authenticated client for the lifetime of a run. The session is
//! read from `TELEGRAM_STRING_SESSION` when set, otherwise from
//! `<data_dir>/session`, and is written back to that file by
//! [`TelegramSource::close`].
//!
//! Chat ids are exposed as *marked* peer ids, the same numbers other Telegram
//! tooling prints: users keep their id, basic groups are negated, channels
//! and supergroups are `-100<id>`.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use grammers_client::types::{Chat, Media, Message};
use grammers_client::{Client, Config as ClientConfig, InitParams, SignInError, Update};
use grammers_session::{PackedChat, PackedType, Session};
use grammers_tl_types as tl;

use crate::config::Config;
use crate::models::{
    ChatEvent, ChatRef, DialogInfo, Entity, Forward, MessageRecord, Reaction, ResolvedChat, Sender,
};
use crate::traits::ChatSource;

const CHANNEL_MARK: i64 = 1_000_000_000_000;

pub struct TelegramSource {
    client: Client,
    session_path: PathBuf,
    /// Sessions passed in via the environment are not written to disk.
    persist_session: bool,
    packed: RwLock<HashMap<i64, PackedChat>>,
    subscribed: RwLock<HashSet<i64>>,
}

impl TelegramSource {
    /// Connect to Telegram. Does not require the session to be authorized;
    /// see [`TelegramSource::ensure_authorized`].
    pub async fn connect(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir.display()
            )
        })?;
        let session_path = config.session_path();

        let (session, persist_session) = match &config.telegram.string_session {
            Some(encoded) => (decode_string_session(encoded)?, false),
            None => (
                Session::load_file_or_create(&session_path).with_context(|| {
                    format!("Failed to open session file: {}", session_path.display())
                })?,
                true,
            ),
        };

        let client = Client::connect(ClientConfig {
            session,
            api_id: config.telegram.api_id,
            api_hash: config.telegram.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .context("Failed to connect to Telegram")?;

        tracing::debug!("connected to Telegram");
        Ok(Self {
            client,
            session_path,
            persist_session,
            packed: RwLock::new(HashMap::new()),
            subscribed: RwLock::new(HashSet::new()),
        })
    }

    pub async fn ensure_authorized(&self) -> Result<()> {
        let authorized = self
            .client
            .is_authorized()
            .await
            .context("Failed to check Telegram authorization")?;
        if !authorized {
            bail!("Telegram session is not signed in; run `tgscrape login` first");
        }
        Ok(())
    }

    /// Interactive sign-in on the terminal (phone, code, optional 2FA password).
    pub async fn login(&self) -> Result<()> {
        if self.client.is_authorized().await? {
            tracing::info!("session is already signed in");
            return Ok(());
        }

        let phone = prompt("Enter your phone number (international format): ")?;
        let token = self
            .client
            .request_login_code(&phone)
            .await
            .context("Failed to request login code")?;
        let code = prompt("Enter the code you received: ")?;

        match self.client.sign_in(&token, &code).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().unwrap_or("none").to_string();
                let password = prompt(&format!("Enter your 2FA password (hint: {}): ", hint))?;
                self.client
                    .check_password(password_token, password.trim())
                    .await
                    .context("Failed to check 2FA password")?;
            }
            Err(e) => return Err(anyhow!(e).context("Failed to sign in")),
        }

        self.save_session()?;
        Ok(())
    }

    /// The current session as a base64 string for `TELEGRAM_STRING_SESSION`.
    pub fn string_session(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.client.session().save())
    }

    /// All dialogs visible to the signed-in account.
    pub async fn dialogs(&self) -> Result<Vec<DialogInfo>> {
        let mut dialogs = self.client.iter_dialogs();
        let mut out = Vec::new();
        while let Some(dialog) = dialogs.next().await? {
            let chat = dialog.chat();
            let packed = chat.pack();
            let title = if chat.name().is_empty() {
                "NoTitle".to_string()
            } else {
                chat.name().to_string()
            };
            out.push(DialogInfo {
                title,
                id: chat.id(),
                username: chat.username().map(str::to_string),
                kind: chat_kind(chat).to_string(),
                peer_id: marked_id(&packed),
                is_bot: matches!(packed.ty, PackedType::Bot),
                megagroup: matches!(packed.ty, PackedType::Megagroup | PackedType::Gigagroup),
                broadcast: matches!(packed.ty, PackedType::Broadcast),
                access_hash: packed.access_hash,
            });
        }
        Ok(out)
    }

    /// Persist the session (file sessions only). Called on every exit path.
    pub fn close(&self) -> Result<()> {
        self.save_session()?;
        tracing::debug!("Telegram session closed");
        Ok(())
    }

    fn save_session(&self) -> Result<()> {
        if self.persist_session {
            self.client
                .session()
                .save_to_file(&self.session_path)
                .with_context(|| {
                    format!(
                        "Failed to save session file: {}",
                        self.session_path.display()
                    )
                })?;
        }
        Ok(())
    }

    fn packed_for(&self, peer_id: i64) -> Result<PackedChat> {
        self.packed
            .read()
            .map_err(|_| anyhow!("chat cache lock poisoned"))?
            .get(&peer_id)
            .copied()
            .ok_or_else(|| anyhow!("chat {} has not been resolved", peer_id))
    }
}

#[async_trait]
impl ChatSource for TelegramSource {
    async fn resolve(&self, chat: &ChatRef) -> Result<ResolvedChat> {
        let found: Option<Chat> = match chat {
            ChatRef::Username(name) => self.client.resolve_username(name).await?,
            ChatRef::Id(id) => {
                let mut dialogs = self.client.iter_dialogs();
                let mut hit = None;
                while let Some(dialog) = dialogs.next().await? {
                    if marked_id(&dialog.chat().pack()) == *id {
                        hit = Some(dialog.chat().clone());
                        break;
                    }
                }
                hit
            }
        };

        let entity = found
            .ok_or_else(|| anyhow!("chat {} not found among accessible dialogs", chat))?;
        let packed = entity.pack();
        let peer_id = marked_id(&packed);
        self.packed
            .write()
            .map_err(|_| anyhow!("chat cache lock poisoned"))?
            .insert(peer_id, packed);

        Ok(ResolvedChat {
            peer_id,
            title: entity.name().to_string(),
        })
    }

    async fn history(
        &self,
        peer_id: i64,
        after_id: Option<i32>,
        since: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>> {
        let packed = self.packed_for(peer_id)?;
        let mut messages = self.client.iter_messages(packed);
        let mut out = Vec::new();

        // Newest first: stop at the checkpoint or the date floor.
        while let Some(message) = messages.next().await? {
            if after_id.map_or(false, |after| message.id() <= after) || message.date() < since {
                break;
            }
            out.push(normalize(peer_id, &message));
        }
        Ok(out)
    }

    fn subscribe(&self, peer_id: i64) {
        if let Ok(mut subscribed) = self.subscribed.write() {
            subscribed.insert(peer_id);
        }
    }

    async fn next_event(&self) -> Result<Option<ChatEvent>> {
        loop {
            let update = self.client.next_update().await?;
            let (message, edited) = match update {
                Update::NewMessage(message) => (message, false),
                Update::MessageEdited(message) => (message, true),
                _ => continue,
            };

            let peer_id = marked_id(&message.chat().pack());
            let wanted = self
                .subscribed
                .read()
                .map(|s| s.contains(&peer_id))
                .unwrap_or(false);
            if !wanted {
                continue;
            }

            let record = normalize(peer_id, &message);
            return Ok(Some(if edited {
                ChatEvent::Edited(record)
            } else {
                ChatEvent::NewMessage(record)
            }));
        }
    }

    fn unsubscribe(&self, peer_id: i64) {
        if let Ok(mut subscribed) = self.subscribed.write() {
            subscribed.remove(&peer_id);
        }
    }
}

/// Marked peer id for a packed chat.
pub fn marked_id(packed: &PackedChat) -> i64 {
    match packed.ty {
        PackedType::User | PackedType::Bot => packed.id,
        PackedType::Chat => -packed.id,
        _ => -(CHANNEL_MARK + packed.id),
    }
}

fn chat_kind(chat: &Chat) -> &'static str {
    match chat {
        Chat::User(_) => "User",
        Chat::Group(_) => "Group",
        Chat::Channel(_) => "Channel",
    }
}

fn normalize(peer_id: i64, message: &Message) -> MessageRecord {
    let sender = message.sender();
    let media = message.media();

    MessageRecord {
        id: message.id(),
        chat_id: peer_id,
        peer_id,
        date: message.date(),
        text: message.text().to_string(),
        sender_id: sender.as_ref().map(|s| marked_id(&s.pack())),
        sender: sender.as_ref().map(sender_info),
        edit_date: message.edit_date(),
        out: message.outgoing(),
        mentioned: message.mentioned(),
        silent: message.silent(),
        post: message.post(),
        pinned: message.pinned(),
        views: message.view_count(),
        forwards: message.forward_count(),
        reply_to_msg_id: message.reply_to_message_id(),
        forward: message.forward_header().as_ref().map(forward_info),
        has_media: media.is_some(),
        media_type: media.as_ref().map(|m| media_kind(m).to_string()),
        reactions: message.raw.reactions.as_ref().map(reactions_info),
        entities: message
            .fmt_entities()
            .map(|entities| entities.iter().filter_map(entity_info).collect()),
    }
}

/// Marked id of a raw peer reference.
fn peer_marked_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(p) => p.user_id,
        tl::enums::Peer::Chat(p) => -p.chat_id,
        tl::enums::Peer::Channel(p) => -(CHANNEL_MARK + p.channel_id),
    }
}

fn forward_info(header: &tl::enums::MessageFwdHeader) -> Forward {
    let tl::enums::MessageFwdHeader::Header(header) = header;
    Forward {
        from_id: header.from_id.as_ref().map(peer_marked_id),
        from_name: header.from_name.clone(),
        date: DateTime::from_timestamp(i64::from(header.date), 0),
    }
}

fn reactions_info(reactions: &tl::enums::MessageReactions) -> Vec<Reaction> {
    let tl::enums::MessageReactions::Reactions(reactions) = reactions;
    reactions.results.iter().map(reaction_info).collect()
}

fn reaction_info(result: &tl::enums::ReactionCount) -> Reaction {
    let tl::enums::ReactionCount::Count(result) = result;
    let (emoji, custom_emoji_id) = match &result.reaction {
        tl::enums::Reaction::Emoji(r) => (Some(r.emoticon.clone()), None),
        tl::enums::Reaction::CustomEmoji(r) => (None, Some(r.document_id)),
        _ => (None, None),
    };
    Reaction {
        emoji,
        custom_emoji_id,
        count: result.count,
        i_reacted: result.chosen_order.is_some(),
        my_reaction_order: result.chosen_order,
    }
}

fn sender_info(chat: &Chat) -> Sender {
    Sender {
        id: marked_id(&chat.pack()),
        username: chat.username().map(str::to_string),
        display_name: Some(chat.name().to_string()).filter(|n| !n.is_empty()),
        is_bot: matches!(chat, Chat::User(user) if user.is_bot()),
    }
}

fn media_kind(media: &Media) -> &'static str {
    match media {
        Media::Photo(_) => "photo",
        Media::Document(_) => "document",
        Media::Sticker(_) => "sticker",
        Media::Contact(_) => "contact",
        Media::Poll(_) => "poll",
        _ => "other",
    }
}

fn entity_info(entity: &tl::enums::MessageEntity) -> Option<Entity> {
    use tl::enums::MessageEntity as E;

    let (kind, offset, length, url) = match entity {
        E::Mention(e) => ("MessageEntityMention", e.offset, e.length, None),
        E::Hashtag(e) => ("MessageEntityHashtag", e.offset, e.length, None),
        E::BotCommand(e) => ("MessageEntityBotCommand", e.offset, e.length, None),
        E::Url(e) => ("MessageEntityUrl", e.offset, e.length, None),
        E::Email(e) => ("MessageEntityEmail", e.offset, e.length, None),
        E::Bold(e) => ("MessageEntityBold", e.offset, e.length, None),
        E::Italic(e) => ("MessageEntityItalic", e.offset, e.length, None),
        E::Code(e) => ("MessageEntityCode", e.offset, e.length, None),
        E::Pre(e) => ("MessageEntityPre", e.offset, e.length, None),
        E::TextUrl(e) => ("MessageEntityTextUrl", e.offset, e.length, Some(e.url.clone())),
        E::MentionName(e) => ("MessageEntityMentionName", e.offset, e.length, None),
        E::Phone(e) => ("MessageEntityPhone", e.offset, e.length, None),
        E::Cashtag(e) => ("MessageEntityCashtag", e.offset, e.length, None),
        E::Underline(e) => ("MessageEntityUnderline", e.offset, e.length, None),
        E::Strike(e) => ("MessageEntityStrike", e.offset, e.length, None),
        E::Spoiler(e) => ("MessageEntitySpoiler", e.offset, e.length, None),
        _ => return None,
    };

    Some(Entity {
        kind: kind.to_string(),
        offset,
        length,
        url,
    })
}

fn decode_string_session(encoded: &str) -> Result<Session> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("TELEGRAM_STRING_SESSION is not valid base64")?;
    Session::load(&bytes).map_err(|e| anyhow!("TELEGRAM_STRING_SESSION is invalid: {:?}", e))
}

fn prompt(message: &str) -> Result<String> {
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(message.as_bytes())?;
    stderr.flush()?;
    drop(stderr);

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(ty: PackedType, id: i64) -> PackedChat {
        PackedChat {
            ty,
            id,
            access_hash: None,
        }
    }

    #[test]
    fn marked_ids_follow_telegram_convention() {
        assert_eq!(marked_id(&packed(PackedType::User, 777)), 777);
        assert_eq!(marked_id(&packed(PackedType::Bot, 778)), 778);
        assert_eq!(marked_id(&packed(PackedType::Chat, 123)), -123);
        assert_eq!(
            marked_id(&packed(PackedType::Megagroup, 1234567890)),
            -1001234567890
        );
        assert_eq!(
            marked_id(&packed(PackedType::Broadcast, 42)),
            -1000000000042
        );
    }

    #[test]
    fn forwarded_from_ids_are_marked() {
        let user = tl::enums::Peer::User(tl::types::PeerUser { user_id: 5 });
        let chat = tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: 6 });
        let channel = tl::enums::Peer::Channel(tl::types::PeerChannel {
            channel_id: 1234567890,
        });
        assert_eq!(peer_marked_id(&user), 5);
        assert_eq!(peer_marked_id(&chat), -6);
        assert_eq!(peer_marked_id(&channel), -1001234567890);
    }

    #[test]
    fn reactions_keep_emoji_custom_id_and_own_choice() {
        let thumbs = tl::enums::ReactionCount::Count(tl::types::ReactionCount {
            chosen_order: Some(0),
            reaction: tl::enums::Reaction::Emoji(tl::types::ReactionEmoji {
                emoticon: "👍".to_string(),
            }),
            count: 3,
        });
        let custom = tl::enums::ReactionCount::Count(tl::types::ReactionCount {
            chosen_order: None,
            reaction: tl::enums::Reaction::CustomEmoji(tl::types::ReactionCustomEmoji {
                document_id: 5368324170671202286,
            }),
            count: 1,
        });

        assert_eq!(
            reaction_info(&thumbs),
            Reaction {
                emoji: Some("👍".to_string()),
                custom_emoji_id: None,
                count: 3,
                i_reacted: true,
                my_reaction_order: Some(0),
            }
        );
        let custom = reaction_info(&custom);
        assert_eq!(custom.emoji, None);
        assert_eq!(custom.custom_emoji_id, Some(5368324170671202286));
        assert!(!custom.i_reacted);
    }

    #[test]
    fn bad_string_session_is_rejected() {
        assert!(decode_string_session("%%% not base64 %%%").is_err());
    }
}
