//! In-memory fakes for the platform seams.

use crate::db::Database;
use crate::model::{ChannelAccess, GuildConfig, HistoryRecord, StoredMessage};
use crate::ports::{ChannelHistoryProvider, MessageSender, PermissionOracle, StatusHandle, StatusSink};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub const GUILD: u64 = 1;
pub const TARGET: u64 = 42;
pub const OTHER: u64 = 43;

pub fn base_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// A record whose id doubles as its age in minutes after [`base_time`].
pub fn record(id: u64, author_id: u64, content: &str) -> HistoryRecord {
    HistoryRecord {
        id,
        author_id,
        content: content.to_string(),
        timestamp: base_time() + Duration::minutes(id as i64),
        ..Default::default()
    }
}

pub fn test_db() -> Database {
    let db = Database::open(":memory:").unwrap();
    db.execute_init().unwrap();
    db
}

/// Registers [`GUILD`] with `configure` applied to its default config.
pub fn seed_guild(db: &Database, channels: &[u64], configure: impl FnOnce(&mut GuildConfig)) {
    db.ensure_guild(GUILD, "!", channels).unwrap();
    let mut config = GuildConfig::new(GUILD);
    config.target_user_id = Some(TARGET);
    configure(&mut config);
    db.save_guild_config(&config).unwrap();
}

/// Channel history held oldest-first, served newest-first like the platform.
#[derive(Default)]
pub struct FakeHistory {
    channels: Mutex<HashMap<u64, Vec<HistoryRecord>>>,
    failures_remaining: AtomicU32,
    pub fetches: AtomicU64,
}

impl FakeHistory {
    pub fn with_channel(self, channel_id: u64, records: Vec<HistoryRecord>) -> Self {
        self.push(channel_id, records);
        self
    }

    pub fn push(&self, channel_id: u64, records: Vec<HistoryRecord>) {
        let mut channels = self.channels.lock().unwrap();
        let history = channels.entry(channel_id).or_default();
        history.extend(records);
        history.sort_by_key(|r| r.id);
    }

    /// Makes the next `count` fetches fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelHistoryProvider for FakeHistory {
    async fn fetch_page(
        &self,
        channel_id: u64,
        before: Option<u64>,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("rate limited");
        }

        let channels = self.channels.lock().unwrap();
        let history = channels.get(&channel_id).cloned().unwrap_or_default();
        Ok(history
            .into_iter()
            .rev()
            .filter(|r| before.map_or(true, |b| r.id < b))
            .take(limit)
            .collect())
    }
}

/// Grants full access except on listed channels.
#[derive(Default)]
pub struct FakePermissions {
    pub denied: Vec<u64>,
}

#[async_trait]
impl PermissionOracle for FakePermissions {
    async fn channel_access(&self, _guild_id: u64, channel_id: u64) -> ChannelAccess {
        if self.denied.contains(&channel_id) {
            ChannelAccess {
                view: true,
                read_history: false,
                send: false,
            }
        } else {
            ChannelAccess::FULL
        }
    }
}

/// Records every status post and edit.
#[derive(Default)]
pub struct RecordingStatus {
    next_handle: AtomicU64,
    pub posts: Mutex<Vec<String>>,
    pub edits: Mutex<Vec<(StatusHandle, String)>>,
}

impl RecordingStatus {
    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(StatusHandle, String)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSink for RecordingStatus {
    async fn post(&self, text: &str) -> anyhow::Result<StatusHandle> {
        self.posts.lock().unwrap().push(text.to_string());
        Ok(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    async fn edit(&self, handle: StatusHandle, text: &str) -> anyhow::Result<()> {
        self.edits.lock().unwrap().push((handle, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(u64, StoredMessage, bool)>>,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_replay(
        &self,
        channel_id: u64,
        message: &StoredMessage,
        allow_mentions: bool,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id, message.clone(), allow_mentions));
        Ok(())
    }
}
