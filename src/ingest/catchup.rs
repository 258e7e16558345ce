//! Sequential read of history newer than a guild's watermark.

use super::{fetch_page_with_retry, notify, IngestContext};
use crate::error::{ReplicationError, Result};
use crate::filter::StorabilityFilter;
use crate::model::{GuildConfig, MessageCandidate, StoredMessage};
use crate::ports::StatusSink;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchupSummary {
    pub channels_read: Vec<u64>,
    pub channels_skipped: Vec<u64>,
    pub processed: u64,
    pub stored: u64,
}

/// Where a channel's backward read must stop.
struct Boundary<'a> {
    watermark: Option<DateTime<Utc>>,
    known: &'a HashSet<u64>,
    prefix: &'a str,
}

pub struct IncrementalCatchup {
    ctx: IngestContext,
}

impl IncrementalCatchup {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx }
    }

    /// Appends every storable message newer than the guild's watermark,
    /// channel by channel, without touching what is already stored.
    pub async fn run(
        &self,
        guild_id: u64,
        channels: &[u64],
        status: Arc<dyn StatusSink>,
        cancel: &CancellationToken,
    ) -> Result<CatchupSummary> {
        let db = self.ctx.db.clone();
        let mut config = db
            .run_blocking(move |db| db.guild_config(guild_id))
            .await?
            .ok_or(ReplicationError::UnknownGuild(guild_id))?;

        if config.target_user_id.is_none() {
            notify(status.as_ref(), "Target user not selected").await;
            return Err(ReplicationError::ConfigurationMissing);
        }

        let (prefix, substrings, mut known) = db
            .run_blocking(move |db| {
                Ok((
                    db.prefix(guild_id)?.unwrap_or_default(),
                    db.disabled_substrings(guild_id)?,
                    db.known_message_ids(guild_id)?,
                ))
            })
            .await?;
        let filter = StorabilityFilter::new(&config, substrings);
        let watermark = config.last_update;
        debug!(
            "Catch-up for guild {}: watermark {:?}, {} known messages",
            guild_id,
            watermark,
            known.len()
        );

        let mut summary = CatchupSummary::default();
        for &channel_id in channels {
            if cancel.is_cancelled() {
                return Err(ReplicationError::Cancelled);
            }
            notify(
                status.as_ref(),
                &format!("Reading new messages in channel <#{}>", channel_id),
            )
            .await;

            let boundary = Boundary {
                watermark,
                known: &known,
                prefix: &prefix,
            };
            let read = match self.ctx.check_read_access(guild_id, channel_id).await {
                Ok(()) => self.read_channel(channel_id, &boundary, &filter, cancel).await,
                Err(e) => Err(e),
            };
            let (processed, candidates) = match read {
                Ok(read) => read,
                Err(e) if !e.is_fatal() => {
                    warn!("Skipping channel {} in guild {}: {}", channel_id, guild_id, e);
                    notify(status.as_ref(), &e.to_string()).await;
                    summary.channels_skipped.push(channel_id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if cancel.is_cancelled() {
                return Err(ReplicationError::Cancelled);
            }

            let batch = append(&mut config, processed, candidates);
            let stored = batch.len() as u64;
            known.extend(batch.iter().map(|m| m.message_id));

            let snapshot = config.clone();
            db.run_blocking(move |db| db.commit_batch(&snapshot, &batch))
                .await?;
            info!(
                "Channel {}: {} new messages, {} stored",
                channel_id, processed, stored
            );

            summary.channels_read.push(channel_id);
            summary.processed += processed;
            summary.stored += stored;
        }

        config.enabled = true;
        config.last_update = Some(Utc::now());
        let finished = config.clone();
        db.run_blocking(move |db| db.save_guild_config(&finished))
            .await?;

        info!(
            "Read new messages in guild {}: {} processed, {} stored",
            guild_id, summary.processed, summary.stored
        );
        notify(status.as_ref(), "Read all new messages").await;
        Ok(summary)
    }

    /// Pages backwards from the newest message until the boundary is hit.
    /// Returns the number of non-command messages seen and the storable ones,
    /// newest first.
    async fn read_channel(
        &self,
        channel_id: u64,
        boundary: &Boundary<'_>,
        filter: &StorabilityFilter,
        cancel: &CancellationToken,
    ) -> Result<(u64, Vec<MessageCandidate>)> {
        let settings = &self.ctx.settings;
        let mut before = None;
        let mut processed = 0u64;
        let mut candidates = Vec::new();

        loop {
            let page = fetch_page_with_retry(
                self.ctx.history.as_ref(),
                channel_id,
                before,
                settings.page_size,
                &settings.retry,
                cancel,
            )
            .await?;
            if page.is_empty() {
                return Ok((processed, candidates));
            }

            for record in &page {
                before = Some(record.id);
                if record.is_command(boundary.prefix) {
                    continue;
                }
                let seen = boundary.watermark.is_some_and(|w| record.timestamp <= w);
                if seen || boundary.known.contains(&record.id) {
                    debug!("Channel {}: reached already-read message {}", channel_id, record.id);
                    return Ok((processed, candidates));
                }

                processed += 1;
                if let Some(candidate) = filter.candidate(record) {
                    candidates.push(candidate);
                }
            }
        }
    }
}

/// Gives each candidate the next dense index and folds the counts into
/// `config`.
fn append(
    config: &mut GuildConfig,
    processed: u64,
    candidates: Vec<MessageCandidate>,
) -> Vec<StoredMessage> {
    let guild_id = config.guild_id;
    config.guild_message_count += processed as i64;
    let batch: Vec<StoredMessage> = candidates
        .into_iter()
        .map(|candidate| {
            let index = config.target_message_count;
            config.target_message_count += 1;
            candidate.into_stored(guild_id, index)
        })
        .collect();
    config.recompute_probability();
    batch
}
