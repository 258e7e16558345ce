//! serenity-backed implementations of the engine's platform seams.

use crate::filter::sticker_ids;
use crate::model::{ChannelAccess, HistoryRecord, MessageKind, StoredMessage};
use crate::ports::{ChannelHistoryProvider, MessageSender, PermissionOracle, StatusHandle, StatusSink};
use anyhow::Context as AnyhowContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    Cache, ChannelId, ChannelType, CreateAllowedMentions, CreateMessage, EditMessage, GetMessages,
    GuildId, Message, MessageId, StickerId, Timestamp, UserId,
};
use serenity::http::Http;
use std::sync::Arc;
use tracing::debug;

impl From<&Message> for HistoryRecord {
    fn from(message: &Message) -> Self {
        HistoryRecord {
            id: message.id.get(),
            author_id: message.author.id.get(),
            author_is_bot: message.author.bot,
            content: message.content.clone(),
            attachment_urls: message.attachments.iter().map(|a| a.url.clone()).collect(),
            embed_urls: message
                .embeds
                .iter()
                .map(|e| e.url.clone().unwrap_or_default())
                .collect(),
            sticker_ids: message.sticker_items.iter().map(|s| s.id.get()).collect(),
            mentioned_user_ids: message.mentions.iter().map(|u| u.id.get()).collect(),
            timestamp: message_time(&message.timestamp),
        }
    }
}

/// Keeps the sub-second part, which the catch-up watermark compares against.
fn message_time(timestamp: &Timestamp) -> DateTime<Utc> {
    timestamp
        .to_rfc3339()
        .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or_else(|| {
            DateTime::<Utc>::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_default()
        })
}

/// Text channels of a cached guild, in sidebar order.
pub fn text_channels(cache: &Cache, guild_id: u64) -> Vec<u64> {
    let Some(guild) = cache.guild(GuildId::new(guild_id)) else {
        return Vec::new();
    };
    let mut channels: Vec<(u16, u64)> = guild
        .channels
        .values()
        .filter(|c| c.kind == ChannelType::Text)
        .map(|c| (c.position, c.id.get()))
        .collect();
    channels.sort();
    channels.into_iter().map(|(_, id)| id).collect()
}

pub struct SerenityHistory {
    http: Arc<Http>,
}

impl SerenityHistory {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChannelHistoryProvider for SerenityHistory {
    async fn fetch_page(
        &self,
        channel_id: u64,
        before: Option<u64>,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        let mut builder = GetMessages::new().limit(limit.clamp(1, 100) as u8);
        if let Some(before) = before {
            builder = builder.before(MessageId::new(before));
        }
        let messages = ChannelId::new(channel_id)
            .messages(&self.http, builder)
            .await
            .with_context(|| format!("Failed to fetch history of channel {}", channel_id))?;
        debug!("Fetched {} messages from channel {}", messages.len(), channel_id);
        Ok(messages.iter().map(HistoryRecord::from).collect())
    }
}

/// Reads the bot's effective channel permissions from the gateway cache.
pub struct SerenityPermissions {
    cache: Arc<Cache>,
}

impl SerenityPermissions {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PermissionOracle for SerenityPermissions {
    async fn channel_access(&self, guild_id: u64, channel_id: u64) -> ChannelAccess {
        let bot_id: UserId = self.cache.current_user().id;
        let Some(guild) = self.cache.guild(GuildId::new(guild_id)) else {
            return ChannelAccess::default();
        };
        let (Some(channel), Some(member)) = (
            guild.channels.get(&ChannelId::new(channel_id)),
            guild.members.get(&bot_id),
        ) else {
            return ChannelAccess::default();
        };

        let permissions = guild.user_permissions_in(channel, member);
        ChannelAccess {
            view: permissions.view_channel(),
            read_history: permissions.read_message_history(),
            send: permissions.send_messages(),
        }
    }
}

/// Posts and edits status lines in the channel a command was run from.
pub struct ChannelStatus {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelStatus {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl StatusSink for ChannelStatus {
    async fn post(&self, text: &str) -> anyhow::Result<StatusHandle> {
        let builder = CreateMessage::new()
            .content(text)
            .allowed_mentions(CreateAllowedMentions::new());
        let message = self.channel_id.send_message(&self.http, builder).await?;
        Ok(message.id.get())
    }

    async fn edit(&self, handle: StatusHandle, text: &str) -> anyhow::Result<()> {
        self.channel_id
            .edit_message(&self.http, MessageId::new(handle), EditMessage::new().content(text))
            .await?;
        Ok(())
    }
}

pub struct SerenitySender {
    http: Arc<Http>,
}

impl SerenitySender {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Builds the outgoing message for a stored payload.
pub fn replay_message(message: &StoredMessage, allow_mentions: bool) -> anyhow::Result<CreateMessage> {
    let mentions = if allow_mentions {
        CreateAllowedMentions::new()
            .all_users(true)
            .all_roles(true)
            .everyone(true)
    } else {
        CreateAllowedMentions::new()
    };

    let builder = match message.kind {
        MessageKind::Raw => CreateMessage::new().content(message.text.as_str()),
        MessageKind::Sticker => {
            let ids = sticker_ids(&message.text)
                .with_context(|| format!("Malformed sticker payload for message {}", message.message_id))?;
            CreateMessage::new().sticker_ids(ids.into_iter().map(StickerId::new))
        }
    };
    Ok(builder.allowed_mentions(mentions))
}

#[async_trait]
impl MessageSender for SerenitySender {
    async fn send_replay(
        &self,
        channel_id: u64,
        message: &StoredMessage,
        allow_mentions: bool,
    ) -> anyhow::Result<()> {
        let builder = replay_message(message, allow_mentions)?;
        ChannelId::new(channel_id)
            .send_message(&self.http, builder)
            .await?;
        debug!(
            "Replayed message {} (index {}) in channel {}",
            message.message_id, message.index, channel_id
        );
        Ok(())
    }
}
