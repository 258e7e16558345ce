//! Per-message handling while the bot is connected.

use super::RunRegistry;
use crate::db::Database;
use crate::error::{ReplicationError, Result};
use crate::filter::StorabilityFilter;
use crate::model::{ChannelAccess, GuildConfig, HistoryRecord, MessageCandidate, StoredMessage};
use crate::replay::replay_count;
use chrono::Utc;
use tracing::debug;

/// What observing one inbound message changed, and how many replays it earned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveOutcome {
    pub counted: bool,
    pub stored: Option<StoredMessage>,
    pub replays: usize,
    pub allow_mentions: bool,
}

#[derive(Clone)]
pub struct LiveIngest {
    db: Database,
    bot_id: u64,
    runs: RunRegistry,
}

impl LiveIngest {
    pub fn new(db: Database, bot_id: u64, runs: RunRegistry) -> Self {
        Self { db, bot_id, runs }
    }

    /// Counts, stores and gates one message seen in `channel_id`.
    ///
    /// `draw` is a uniform sample from `[0, 1)` compared against the guild's
    /// probability. Messages from bots are never counted or answered. While a
    /// read runs for the guild the message is only gated; the read owns the
    /// counters and the store until it finishes.
    pub async fn observe(
        &self,
        guild_id: u64,
        channel_id: u64,
        record: HistoryRecord,
        access: ChannelAccess,
        draw: f64,
    ) -> Result<LiveOutcome> {
        let bot_id = self.bot_id;
        let runs = self.runs.clone();
        self.db
            .run_blocking(move |db| {
                let observe = |reading: bool| {
                    observe_blocking(db, bot_id, guild_id, channel_id, &record, access, draw, reading)
                };
                match runs.while_idle(guild_id, || observe(false)) {
                    Some(outcome) => outcome,
                    None => {
                        debug!("Read in flight for guild {}, message {} only gated", guild_id, record.id);
                        observe(true)
                    }
                }
            })
            .await
            .and_then(|outcome| outcome)
    }

    /// Appends an already filtered message with the guild's next index.
    /// Refused with `AlreadyRunning` while a read is in flight for the guild.
    pub async fn notify_message_stored(
        &self,
        guild_id: u64,
        candidate: MessageCandidate,
    ) -> Result<StoredMessage> {
        let runs = self.runs.clone();
        self.db
            .run_blocking(move |db| {
                let appended = runs.while_idle(guild_id, || -> rusqlite::Result<Result<StoredMessage>> {
                    let Some(mut config) = db.guild_config(guild_id)? else {
                        return Ok(Err(ReplicationError::UnknownGuild(guild_id)));
                    };
                    append_one(db, &mut config, candidate).map(Ok)
                });
                appended.unwrap_or(Ok(Err(ReplicationError::AlreadyRunning(guild_id))))
            })
            .await
            .and_then(|stored| stored)
    }
}

/// With `reading` set the store and config are left untouched.
#[allow(clippy::too_many_arguments)]
fn observe_blocking(
    db: &Database,
    bot_id: u64,
    guild_id: u64,
    channel_id: u64,
    record: &HistoryRecord,
    access: ChannelAccess,
    draw: f64,
    reading: bool,
) -> rusqlite::Result<Result<LiveOutcome>> {
    let Some(mut config) = db.guild_config(guild_id)? else {
        return Ok(Err(ReplicationError::UnknownGuild(guild_id)));
    };
    let prefix = db.prefix(guild_id)?.unwrap_or_default();

    let mut outcome = LiveOutcome {
        allow_mentions: config.can_mention,
        ..Default::default()
    };
    if !config.enabled || record.is_command(&prefix) {
        return Ok(Ok(outcome));
    }

    if !reading {
        config.last_update = Some(Utc::now());
    }
    if access.view && !record.author_is_bot {
        let permission = db.channel_permission(guild_id, channel_id)?;

        if !reading && access.read_history && permission.can_read() {
            config.guild_message_count += 1;
            outcome.counted = true;

            let filter = StorabilityFilter::new(&config, db.disabled_substrings(guild_id)?);
            if let Some(candidate) = filter.candidate(record) {
                if db.contains_message(candidate.message_id)? {
                    debug!("Message {} already stored", candidate.message_id);
                } else {
                    outcome.stored = Some(append_one(db, &mut config, candidate)?);
                }
            }
        }

        if access.send
            && permission.can_write()
            && !db.is_user_disabled(guild_id, record.author_id)?
        {
            outcome.replays = replay_count(record.mentions(bot_id), config.probability, draw);
        }
    }

    if !reading {
        db.save_guild_config(&config)?;
    }
    Ok(Ok(outcome))
}

/// Stores one message at index `target_message_count` and persists the
/// bumped counters with it.
fn append_one(
    db: &Database,
    config: &mut GuildConfig,
    candidate: MessageCandidate,
) -> rusqlite::Result<StoredMessage> {
    let message = candidate.into_stored(config.guild_id, config.target_message_count);
    config.target_message_count += 1;
    config.recompute_probability();
    db.commit_batch(config, std::slice::from_ref(&message))?;
    debug!(
        "Stored message {} at index {} for guild {}",
        message.message_id, message.index, config.guild_id
    );
    Ok(message)
}
