//! Seams between the replication engine and the chat platform.
//!
//! The engine only talks to these traits; `crate::discord` provides the
//! serenity-backed implementations.

use crate::model::{ChannelAccess, HistoryRecord, StoredMessage};
use async_trait::async_trait;

/// Cursor-paginated, most-recent-first access to channel history.
#[async_trait]
pub trait ChannelHistoryProvider: Send + Sync {
    /// Up to `limit` records strictly older than `before` (or the newest
    /// records when `before` is `None`), newest first. An empty page means the
    /// history is exhausted.
    async fn fetch_page(
        &self,
        channel_id: u64,
        before: Option<u64>,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryRecord>>;

    /// The `count` most recent records in the channel, newest first.
    async fn latest(&self, channel_id: u64, count: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        self.fetch_page(channel_id, None, count).await
    }
}

/// Platform-level permissions the bot holds in a channel.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn channel_access(&self, guild_id: u64, channel_id: u64) -> ChannelAccess;
}

/// Handle to a status message that can later be edited.
pub type StatusHandle = u64;

/// Where ingestion runs report progress to the user who started them.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn post(&self, text: &str) -> anyhow::Result<StatusHandle>;

    async fn edit(&self, handle: StatusHandle, text: &str) -> anyhow::Result<()>;
}

/// Posts replayed payloads into a channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_replay(
        &self,
        channel_id: u64,
        message: &StoredMessage,
        allow_mentions: bool,
    ) -> anyhow::Result<()>;
}
