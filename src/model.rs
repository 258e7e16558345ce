//! Guild replication state and the platform-neutral message records that flow
//! through ingestion.

use chrono::{DateTime, Utc};
use std::ops::BitOr;

/// Per-guild replication settings and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct GuildConfig {
    pub guild_id: u64,
    pub enabled: bool,
    pub target_user_id: Option<u64>,
    /// Every message scanned in the guild, stored or not.
    pub guild_message_count: i64,
    /// Number of stored messages; also the next free index.
    pub target_message_count: i64,
    pub probability: f64,
    pub auto_update_probability: bool,
    pub can_mention: bool,
    pub can_embed: bool,
    /// Watermark up to which history has been ingested.
    pub last_update: Option<DateTime<Utc>>,
}

impl GuildConfig {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            enabled: false,
            target_user_id: None,
            guild_message_count: 0,
            target_message_count: 0,
            probability: 0.0,
            auto_update_probability: true,
            can_mention: false,
            can_embed: false,
            last_update: None,
        }
    }

    /// Re-derives the probability from the counters when auto update is on.
    pub fn recompute_probability(&mut self) {
        if self.auto_update_probability {
            self.probability = auto_probability(self.target_message_count, self.guild_message_count);
        }
    }

    /// Sets a fixed probability, disabling auto update.
    pub fn set_fixed_probability(&mut self, probability: f64) {
        self.auto_update_probability = false;
        self.probability = clamp_probability(probability);
    }

    /// Toggles auto update; enabling it recomputes immediately.
    pub fn set_auto_probability(&mut self, enabled: bool) {
        self.auto_update_probability = enabled;
        self.recompute_probability();
        self.probability = clamp_probability(self.probability);
    }
}

/// `stored / scanned`, or 0 when the ratio is undefined.
pub fn auto_probability(stored: i64, scanned: i64) -> f64 {
    if scanned <= 0 {
        return 0.0;
    }
    clamp_probability(stored as f64 / scanned as f64)
}

pub fn clamp_probability(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Guild-configured channel permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelPermission(u8);

impl ChannelPermission {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const READ_WRITE: Self = Self(1 | 2);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::READ_WRITE.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl BitOr for ChannelPermission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Platform-level access the bot has in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelAccess {
    pub view: bool,
    pub read_history: bool,
    pub send: bool,
}

impl ChannelAccess {
    pub const FULL: Self = Self {
        view: true,
        read_history: true,
        send: true,
    };

    pub fn can_read(&self) -> bool {
        self.view && self.read_history
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Raw,
    Sticker,
}

impl MessageKind {
    pub fn as_i64(self) -> i64 {
        match self {
            MessageKind::Raw => 0,
            MessageKind::Sticker => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(MessageKind::Raw),
            1 => Some(MessageKind::Sticker),
            _ => None,
        }
    }
}

/// A persisted message in a guild's replay pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub guild_id: u64,
    pub message_id: u64,
    /// Dense 0-based sampling key within the guild.
    pub index: i64,
    pub kind: MessageKind,
    pub text: String,
}

impl StoredMessage {
    /// Sentinel returned when nothing can be sampled.
    pub fn empty() -> Self {
        Self {
            guild_id: 0,
            message_id: 0,
            index: -1,
            kind: MessageKind::Raw,
            text: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index < 0
    }
}

/// A message that passed the storability filter and is awaiting an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCandidate {
    pub message_id: u64,
    pub kind: MessageKind,
    pub text: String,
}

impl MessageCandidate {
    pub fn into_stored(self, guild_id: u64, index: i64) -> StoredMessage {
        StoredMessage {
            guild_id,
            message_id: self.message_id,
            index,
            kind: self.kind,
            text: self.text,
        }
    }
}

/// One record of channel history as observed on the platform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryRecord {
    pub id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
    pub content: String,
    pub attachment_urls: Vec<String>,
    /// One entry per embed; empty when the embed carries no URL.
    pub embed_urls: Vec<String>,
    pub sticker_ids: Vec<u64>,
    pub mentioned_user_ids: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn has_embeds_or_attachments(&self) -> bool {
        !self.embed_urls.is_empty() || !self.attachment_urls.is_empty()
    }

    pub fn is_command(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.content.starts_with(prefix)
    }

    pub fn mentions(&self, user_id: u64) -> bool {
        self.mentioned_user_ids.contains(&user_id)
    }
}
