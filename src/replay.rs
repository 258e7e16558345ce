//! Uniform sampling from a guild's stored message pool and the probability
//! gate that decides how many replays an inbound message triggers.

use crate::db::Database;
use crate::error::{ReplicationError, Result};
use crate::model::{MessageKind, StoredMessage};
use crate::ports::MessageSender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Number of replays for one inbound message.
///
/// A mention and a winning draw each trigger one replay, so a single message
/// can produce two.
pub fn replay_count(mentioned: bool, probability: f64, draw: f64) -> usize {
    usize::from(mentioned) + usize::from(draw < probability)
}

#[derive(Clone)]
pub struct ReplaySampler {
    db: Database,
}

impl ReplaySampler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Uniform draw over the guild's dense index range.
    pub fn try_get_random<R: Rng>(&self, guild_id: u64, rng: &mut R) -> Result<StoredMessage> {
        let config = self
            .db
            .guild_config(guild_id)?
            .ok_or(ReplicationError::UnknownGuild(guild_id))?;
        if config.target_message_count <= 0 {
            return Err(ReplicationError::EmptyStore);
        }

        let index = rng.random_range(0..config.target_message_count);
        self.db
            .message_at(guild_id, index)?
            .ok_or(ReplicationError::EmptyStore)
    }

    pub fn get_random<R: Rng>(&self, guild_id: u64, rng: &mut R) -> StoredMessage {
        self.try_get_random(guild_id, rng)
            .unwrap_or_else(|e| sentinel(guild_id, e))
    }

    /// Uniform draw restricted to one payload kind. Candidates are narrowed
    /// before drawing, so this never retries.
    pub fn try_get_random_of_kind<R: Rng>(
        &self,
        guild_id: u64,
        kind: MessageKind,
        rng: &mut R,
    ) -> Result<StoredMessage> {
        let indices = self.db.indices_of_kind(guild_id, kind)?;
        if indices.is_empty() {
            return Err(ReplicationError::EmptyStore);
        }

        let index = indices[rng.random_range(0..indices.len())];
        self.db
            .message_at(guild_id, index)?
            .ok_or(ReplicationError::EmptyStore)
    }

    pub fn get_random_of_kind<R: Rng>(
        &self,
        guild_id: u64,
        kind: MessageKind,
        rng: &mut R,
    ) -> StoredMessage {
        self.try_get_random_of_kind(guild_id, kind, rng)
            .unwrap_or_else(|e| sentinel(guild_id, e))
    }

    /// Samples on the blocking pool with a fresh OS-seeded generator.
    pub async fn random(&self, guild_id: u64, kind: Option<MessageKind>) -> StoredMessage {
        let sampler = self.clone();
        let picked = self
            .db
            .run_blocking(move |_| {
                let mut rng = StdRng::from_os_rng();
                Ok(match kind {
                    Some(kind) => sampler.get_random_of_kind(guild_id, kind, &mut rng),
                    None => sampler.get_random(guild_id, &mut rng),
                })
            })
            .await;

        picked.unwrap_or_else(|e| sentinel(guild_id, e))
    }

    /// Sends `count` independently sampled messages. Returns how many went
    /// out; an empty pool sends nothing.
    pub async fn send_replays(
        &self,
        guild_id: u64,
        channel_id: u64,
        count: usize,
        allow_mentions: bool,
        sender: &dyn MessageSender,
    ) -> usize {
        let mut sent = 0;
        for _ in 0..count {
            let message = self.random(guild_id, None).await;
            if message.is_empty() {
                break;
            }
            match sender.send_replay(channel_id, &message, allow_mentions).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    "Failed to replay message {} in channel {}: {}",
                    message.message_id, channel_id, e
                ),
            }
        }
        sent
    }
}

fn sentinel(guild_id: u64, err: ReplicationError) -> StoredMessage {
    match err {
        ReplicationError::EmptyStore => debug!("Guild {} has nothing to replay", guild_id),
        e => warn!("Sampling guild {} failed: {}", guild_id, e),
    }
    StoredMessage::empty()
}
