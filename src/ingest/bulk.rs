//! Full-history rescan of a guild's channels.
//!
//! Each channel is read by one producer task paging through history into a
//! bounded queue, a fixed pool of workers that filter and convert the pages,
//! and a progress reporter. The queue holds at most one page per worker, so the
//! producer waits while every worker is busy. A channel's results are
//! committed in a single transaction once the producer, workers and reporter
//! have all been joined; cancellation anywhere in between drops the batch.

use super::progress::{progress_line, ProgressReporter, ScanCounters};
use super::{fetch_page_with_retry, notify, IngestContext, RetryPolicy};
use crate::error::{ReplicationError, Result};
use crate::filter::StorabilityFilter;
use crate::model::{HistoryRecord, MessageCandidate, StoredMessage};
use crate::ports::{ChannelHistoryProvider, StatusHandle, StatusSink};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type PageQueue = Arc<AsyncMutex<mpsc::Receiver<Vec<HistoryRecord>>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub channels_read: Vec<u64>,
    pub channels_skipped: Vec<u64>,
    pub processed: u64,
    pub stored: u64,
}

/// Output of one channel scan, not yet committed.
#[derive(Debug)]
struct ChannelScan {
    pages: usize,
    processed: u64,
    candidates: Vec<MessageCandidate>,
}

pub struct BulkIngestion {
    ctx: IngestContext,
}

impl BulkIngestion {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx }
    }

    /// Replaces every stored message of the guild with a fresh scan of
    /// `channels`, reading at most `max_messages` per channel.
    pub async fn run(
        &self,
        guild_id: u64,
        channels: &[u64],
        max_messages: usize,
        status: Arc<dyn StatusSink>,
        cancel: &CancellationToken,
    ) -> Result<BulkSummary> {
        let db = self.ctx.db.clone();
        let mut config = db
            .run_blocking(move |db| db.guild_config(guild_id))
            .await?
            .ok_or(ReplicationError::UnknownGuild(guild_id))?;

        if config.target_user_id.is_none() {
            notify(status.as_ref(), "Target user not selected").await;
            return Err(ReplicationError::ConfigurationMissing);
        }

        let substrings = db
            .run_blocking(move |db| db.disabled_substrings(guild_id))
            .await?;
        let filter = Arc::new(StorabilityFilter::new(&config, substrings));
        if cancel.is_cancelled() {
            return Err(ReplicationError::Cancelled);
        }

        config.guild_message_count = 0;
        config.target_message_count = 0;
        config.last_update = None;
        config.recompute_probability();
        let reset = config.clone();
        let cleared = db.run_blocking(move |db| db.reset_guild_messages(&reset)).await?;
        info!("Cleared {} stored messages for guild {}", cleared, guild_id);

        let mut summary = BulkSummary::default();
        for &channel_id in channels {
            if cancel.is_cancelled() {
                return Err(ReplicationError::Cancelled);
            }

            let handle = match status
                .post(&format!("Attempting to read messages in channel <#{}>", channel_id))
                .await
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Failed to post status for channel {}: {}", channel_id, e);
                    None
                }
            };

            let scanned = match self.ctx.check_read_access(guild_id, channel_id).await {
                Ok(()) => {
                    self.scan_channel(channel_id, max_messages, &filter, &status, handle, cancel)
                        .await
                }
                Err(e) => Err(e),
            };
            let scan = match scanned {
                Ok(scan) => scan,
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

            let base = config.target_message_count;
            let batch: Vec<StoredMessage> = scan
                .candidates
                .into_iter()
                .enumerate()
                .map(|(offset, candidate)| candidate.into_stored(guild_id, base + offset as i64))
                .collect();
            let stored = batch.len() as u64;

            config.guild_message_count += scan.processed as i64;
            config.target_message_count += stored as i64;
            config.recompute_probability();

            let snapshot = config.clone();
            db.run_blocking(move |db| db.commit_batch(&snapshot, &batch))
                .await?;
            info!(
                "Channel {}: {} pages, {} processed, {} stored",
                channel_id, scan.pages, scan.processed, stored
            );

            if let Some(handle) = handle {
                if let Err(e) = status
                    .edit(handle, &progress_line(channel_id, scan.processed))
                    .await
                {
                    warn!("Failed to update progress for channel {}: {}", channel_id, e);
                }
            }

            summary.channels_read.push(channel_id);
            summary.processed += scan.processed;
            summary.stored += stored;
        }

        config.enabled = true;
        config.last_update = Some(Utc::now());
        let finished = config.clone();
        db.run_blocking(move |db| db.save_guild_config(&finished))
            .await?;

        info!(
            "Read all messages in guild {}: {} processed, {} stored",
            guild_id, summary.processed, summary.stored
        );
        notify(status.as_ref(), "Read all messages, replication is now active").await;
        Ok(summary)
    }

    async fn scan_channel(
        &self,
        channel_id: u64,
        max_messages: usize,
        filter: &Arc<StorabilityFilter>,
        status: &Arc<dyn StatusSink>,
        handle: Option<StatusHandle>,
        cancel: &CancellationToken,
    ) -> Result<ChannelScan> {
        let settings = &self.ctx.settings;
        let workers = settings.workers.max(1);
        let scan_cancel = cancel.child_token();
        let counters = Arc::new(ScanCounters::default());
        let results = Arc::new(Mutex::new(Vec::new()));

        let reporter_stop = scan_cancel.child_token();
        let reporter = handle.map(|handle| {
            tokio::spawn(
                ProgressReporter {
                    status: status.clone(),
                    handle,
                    channel_id,
                    counters: counters.clone(),
                    increment: settings.progress_increment,
                    poll_interval: settings.progress_poll_interval,
                }
                .run(reporter_stop.clone()),
            )
        });

        let (page_tx, page_rx) = mpsc::channel(workers);
        let page_rx: PageQueue = Arc::new(AsyncMutex::new(page_rx));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(process_pages(
                worker,
                page_rx.clone(),
                filter.clone(),
                counters.clone(),
                results.clone(),
                scan_cancel.clone(),
            ));
        }

        let producer = tokio::spawn(produce_pages(
            self.ctx.history.clone(),
            channel_id,
            max_messages,
            settings.page_size,
            settings.retry.clone(),
            page_tx,
            scan_cancel.clone(),
        ));

        let produced = producer.await;
        if !matches!(produced, Ok(Ok(_))) {
            scan_cancel.cancel();
        }
        let drained = join_workers(&mut pool, &scan_cancel).await;
        reporter_stop.cancel();
        if let Some(reporter) = reporter {
            reporter.await?;
        }

        drained?;
        let pages = produced??;
        if cancel.is_cancelled() {
            return Err(ReplicationError::Cancelled);
        }

        let candidates = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        debug_assert_eq!(candidates.len() as u64, counters.stored());
        Ok(ChannelScan {
            pages,
            processed: counters.processed(),
            candidates,
        })
    }
}

/// Joins every worker. The first failure cancels `stop` so the remaining
/// workers and the reporter wind down, and is returned once all are joined.
async fn join_workers(pool: &mut JoinSet<()>, stop: &CancellationToken) -> Result<()> {
    let mut failure = None;
    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            warn!("Page worker failed: {}", e);
            stop.cancel();
            failure.get_or_insert(e);
        }
    }
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Pages backwards through a channel until it is exhausted or `max_messages`
/// records were fetched. Returns the number of pages queued.
async fn produce_pages(
    history: Arc<dyn ChannelHistoryProvider>,
    channel_id: u64,
    max_messages: usize,
    page_size: usize,
    retry: RetryPolicy,
    pages: mpsc::Sender<Vec<HistoryRecord>>,
    cancel: CancellationToken,
) -> Result<usize> {
    let mut before = None;
    let mut fetched = 0usize;
    let mut queued = 0usize;

    while fetched < max_messages {
        let limit = page_size.max(1).min(max_messages - fetched);
        let page =
            fetch_page_with_retry(history.as_ref(), channel_id, before, limit, &retry, &cancel)
                .await?;

        let Some(oldest) = page.last() else {
            break;
        };
        before = Some(oldest.id);
        fetched += page.len();
        debug!(
            "Channel {}: fetched page of {} ({} total)",
            channel_id,
            page.len(),
            fetched
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplicationError::Cancelled),
            sent = pages.send(page) => {
                if sent.is_err() {
                    // Every worker is gone; only cancellation does that.
                    return Err(ReplicationError::Cancelled);
                }
            }
        }
        queued += 1;
    }

    debug!("Channel {}: history exhausted after {} pages", channel_id, queued);
    Ok(queued)
}

/// Claims pages from the shared queue until it is closed and drained.
async fn process_pages(
    worker: usize,
    pages: PageQueue,
    filter: Arc<StorabilityFilter>,
    counters: Arc<ScanCounters>,
    results: Arc<Mutex<Vec<MessageCandidate>>>,
    cancel: CancellationToken,
) {
    loop {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            page = async { pages.lock().await.recv().await } => page,
        };
        let Some(page) = page else {
            break;
        };

        let mut kept = Vec::new();
        for record in &page {
            counters.record_processed();
            if let Some(candidate) = filter.candidate(record) {
                counters.record_stored();
                kept.push(candidate);
            }
        }
        results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(kept);
    }
    debug!("Page worker {} drained", worker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ingest::{IngestSettings, RetryPolicy};
    use crate::model::{ChannelPermission, GuildConfig};
    use crate::ports::PermissionOracle;
    use crate::testing::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Serves one page of `channel`, then cancels the run and never answers
    /// again.
    struct StallAfterFirstPage {
        inner: FakeHistory,
        channel: u64,
        cancel: CancellationToken,
        served: AtomicU64,
    }

    #[async_trait]
    impl ChannelHistoryProvider for StallAfterFirstPage {
        async fn fetch_page(
            &self,
            channel_id: u64,
            before: Option<u64>,
            limit: usize,
        ) -> anyhow::Result<Vec<HistoryRecord>> {
            if channel_id == self.channel && self.served.fetch_add(1, Ordering::SeqCst) >= 1 {
                self.cancel.cancel();
                std::future::pending::<()>().await;
            }
            self.inner.fetch_page(channel_id, before, limit).await
        }
    }

    fn settings(workers: usize, page_size: usize) -> IngestSettings {
        IngestSettings {
            workers,
            page_size,
            progress_increment: 10,
            progress_poll_interval: Duration::from_millis(1),
            retry: RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            },
        }
    }

    fn bulk(db: &Database, history: Arc<FakeHistory>, permissions: Arc<dyn PermissionOracle>) -> BulkIngestion {
        BulkIngestion::new(IngestContext {
            db: db.clone(),
            history,
            permissions,
            settings: settings(4, 3),
        })
    }

    fn full_access() -> Arc<dyn PermissionOracle> {
        Arc::new(FakePermissions::default())
    }

    fn assert_dense(db: &Database) -> Vec<StoredMessage> {
        let config = db.guild_config(GUILD).unwrap().unwrap();
        let messages = db.guild_messages(GUILD).unwrap();
        assert_eq!(messages.len() as i64, config.target_message_count);
        let indices: Vec<i64> = messages.iter().map(|m| m.index).collect();
        assert_eq!(indices, (0..config.target_message_count).collect::<Vec<_>>());
        messages
    }

    fn text_multiset(messages: &[StoredMessage]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for message in messages {
            *counts.entry(message.text.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[tokio::test]
    async fn test_five_target_messages_in_one_channel() {
        let db = test_db();
        seed_guild(&db, &[10], |c| c.can_embed = false);
        let history = Arc::new(
            FakeHistory::default()
                .with_channel(10, (1..=5).map(|id| record(id, TARGET, &format!("msg {}", id))).collect()),
        );
        let status = Arc::new(RecordingStatus::default());

        let summary = bulk(&db, history, full_access())
            .run(GUILD, &[10], 1_000, status.clone(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.stored, 5);
        let config = db.guild_config(GUILD).unwrap().unwrap();
        assert_eq!(config.target_message_count, 5);
        assert_eq!(config.guild_message_count, 5);
        assert!(config.enabled);
        assert!(config.last_update.is_some());
        assert_eq!(config.probability, 1.0);
        assert_dense(&db);
        assert!(status.posts().last().unwrap().contains("now active"));
        assert!(status
            .edits()
            .iter()
            .any(|(_, line)| line == &progress_line(10, 5)));
    }

    #[tokio::test]
    async fn test_disabled_substring_counts_but_does_not_store() {
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        db.add_disabled_substring(GUILD, "spam").unwrap();
        let history = Arc::new(FakeHistory::default().with_channel(
            10,
            vec![
                record(1, TARGET, "this is spam"),
                record(2, TARGET, "hello"),
                record(3, OTHER, "bystander"),
            ],
        ));

        bulk(&db, history, full_access())
            .run(GUILD, &[10], 1_000, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();

        let config = db.guild_config(GUILD).unwrap().unwrap();
        assert_eq!(config.guild_message_count, 3);
        assert_eq!(config.target_message_count, 1);
        let messages = assert_dense(&db);
        assert_eq!(messages[0].text, "hello");
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent_and_indices_stay_dense() {
        let db = test_db();
        seed_guild(&db, &[10, 11], |_| {});
        let mut first: Vec<HistoryRecord> = (1..=40)
            .map(|id| record(id, if id % 3 == 0 { OTHER } else { TARGET }, &format!("a{}", id)))
            .collect();
        first.push(record(41, TARGET, "a1"));
        let history = Arc::new(
            FakeHistory::default()
                .with_channel(10, first)
                .with_channel(11, (100..=130).map(|id| record(id, TARGET, &format!("b{}", id))).collect()),
        );
        let ingestion = bulk(&db, history, full_access());

        ingestion
            .run(GUILD, &[10, 11], 1_000, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();
        let first_config = db.guild_config(GUILD).unwrap().unwrap();
        let first_texts = text_multiset(&assert_dense(&db));

        ingestion
            .run(GUILD, &[10, 11], 1_000, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();
        let second_config = db.guild_config(GUILD).unwrap().unwrap();
        let second = assert_dense(&db);

        assert_eq!(first_config.target_message_count, 28 + 31);
        assert_eq!(first_config.guild_message_count, 41 + 31);
        assert_eq!(second_config.target_message_count, first_config.target_message_count);
        assert_eq!(second_config.guild_message_count, first_config.guild_message_count);
        assert_eq!(text_multiset(&second), first_texts);
    }

    #[tokio::test]
    async fn test_index_is_a_sampling_key_not_chronology() {
        // Pages are processed by whichever worker claims them first, so only
        // density and the stored set are guaranteed; chronological order of
        // indices is not.
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        let records: Vec<HistoryRecord> = (1..=60).map(|id| record(id, TARGET, &id.to_string())).collect();
        let history = Arc::new(FakeHistory::default().with_channel(10, records));

        bulk(&db, history, full_access())
            .run(GUILD, &[10], 1_000, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();

        let messages = assert_dense(&db);
        let ids: HashSet<u64> = messages.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, (1..=60).collect::<HashSet<u64>>());
    }

    #[tokio::test]
    async fn test_max_messages_caps_each_channel() {
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        let history = Arc::new(
            FakeHistory::default().with_channel(10, (1..=20).map(|id| record(id, TARGET, "x")).collect()),
        );

        let summary = bulk(&db, history, full_access())
            .run(GUILD, &[10], 7, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 7);
        let messages = assert_dense(&db);
        // Most recent first: the newest seven records were read.
        let ids: HashSet<u64> = messages.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, (14..=20).collect::<HashSet<u64>>());
    }

    #[tokio::test]
    async fn test_missing_target_aborts_without_touching_history() {
        let db = test_db();
        seed_guild(&db, &[10], |c| c.target_user_id = None);
        let mut config = db.guild_config(GUILD).unwrap().unwrap();
        config.target_message_count = 1;
        config.guild_message_count = 1;
        db.commit_batch(
            &config,
            &[StoredMessage {
                guild_id: GUILD,
                message_id: 500,
                index: 0,
                kind: crate::model::MessageKind::Raw,
                text: "kept".to_string(),
            }],
        )
        .unwrap();
        let history = Arc::new(FakeHistory::default().with_channel(10, vec![record(1, TARGET, "x")]));
        let status = Arc::new(RecordingStatus::default());

        let result = bulk(&db, history.clone(), full_access())
            .run(GUILD, &[10], 100, status.clone(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ReplicationError::ConfigurationMissing)));
        assert_eq!(status.posts(), vec!["Target user not selected".to_string()]);
        assert_eq!(history.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(db.message_count(GUILD).unwrap(), 1);
        assert_eq!(db.guild_config(GUILD).unwrap().unwrap(), config);
    }

    #[tokio::test]
    async fn test_denied_channels_are_skipped() {
        let db = test_db();
        seed_guild(&db, &[10, 11, 12], |_| {});
        db.set_channel_permission(GUILD, 12, ChannelPermission::WRITE).unwrap();
        let history = Arc::new(
            FakeHistory::default()
                .with_channel(10, vec![record(1, TARGET, "a")])
                .with_channel(11, vec![record(2, TARGET, "b")])
                .with_channel(12, vec![record(3, TARGET, "c")]),
        );
        let permissions: Arc<dyn PermissionOracle> = Arc::new(FakePermissions { denied: vec![11] });
        let status = Arc::new(RecordingStatus::default());

        let summary = bulk(&db, history, permissions)
            .run(GUILD, &[10, 11, 12], 100, status.clone(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.channels_read, vec![10]);
        assert_eq!(summary.channels_skipped, vec![11, 12]);
        assert_eq!(db.guild_config(GUILD).unwrap().unwrap().target_message_count, 1);
        let posts = status.posts();
        assert!(posts.contains(&"No permission to read in channel 11".to_string()));
        assert!(posts.contains(&"No permission to read in channel 12".to_string()));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        let history = Arc::new(
            FakeHistory::default().with_channel(10, (1..=5).map(|id| record(id, TARGET, "x")).collect()),
        );
        history.fail_next(2);

        let summary = bulk(&db, history, full_access())
            .run(GUILD, &[10], 100, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.stored, 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_only_that_channel() {
        let db = test_db();
        seed_guild(&db, &[10, 11], |_| {});
        let history = Arc::new(
            FakeHistory::default()
                .with_channel(10, vec![record(1, TARGET, "a")])
                .with_channel(11, vec![record(2, TARGET, "b")]),
        );
        history.fail_next(3);
        let status = Arc::new(RecordingStatus::default());

        let summary = bulk(&db, history, full_access())
            .run(GUILD, &[10, 11], 100, status.clone(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.channels_skipped, vec![10]);
        assert_eq!(summary.channels_read, vec![11]);
        let messages = assert_dense(&db);
        assert_eq!(messages[0].text, "b");
        assert!(status.posts().iter().any(|p| p.contains("failed after 3 attempts")));
    }

    #[tokio::test]
    async fn test_cancellation_commits_nothing_for_the_channel() {
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        let history = Arc::new(
            FakeHistory::default().with_channel(10, (1..=50).map(|id| record(id, TARGET, "x")).collect()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = bulk(&db, history, full_access())
            .run(GUILD, &[10], 100, Arc::new(RecordingStatus::default()), &cancel)
            .await;

        assert!(matches!(result, Err(ReplicationError::Cancelled)));
        assert_eq!(db.message_count(GUILD).unwrap(), 0);
        let config = db.guild_config(GUILD).unwrap().unwrap();
        assert_eq!(config.target_message_count, 0);
        assert!(!config.enabled);
    }

    #[tokio::test]
    async fn test_cancelled_scan_joins_every_task() {
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        let history = Arc::new(
            FakeHistory::default().with_channel(10, (1..=50).map(|id| record(id, TARGET, "x")).collect()),
        );
        let ingestion = bulk(&db, history, full_access());
        let filter = Arc::new(StorabilityFilter::new(&db.guild_config(GUILD).unwrap().unwrap(), Vec::new()));
        let status: Arc<dyn StatusSink> = Arc::new(RecordingStatus::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ingestion
            .scan_channel(10, 100, &filter, &status, Some(0), &cancel)
            .await;
        assert!(matches!(result, Err(ReplicationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_mid_scan_drops_the_channel() {
        let db = test_db();
        seed_guild(&db, &[10, 11], |_| {});
        let cancel = CancellationToken::new();
        let history = Arc::new(StallAfterFirstPage {
            inner: FakeHistory::default()
                .with_channel(10, vec![record(1, TARGET, "a"), record(2, TARGET, "b")])
                .with_channel(11, (100..150).map(|id| record(id, TARGET, "c")).collect()),
            channel: 11,
            cancel: cancel.clone(),
            served: AtomicU64::new(0),
        });
        let ingestion = BulkIngestion::new(IngestContext {
            db: db.clone(),
            history,
            permissions: full_access(),
            settings: settings(2, 3),
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ingestion.run(GUILD, &[10, 11], 1_000, Arc::new(RecordingStatus::default()), &cancel),
        )
        .await
        .expect("cancelled run did not return");

        assert!(matches!(result, Err(ReplicationError::Cancelled)));
        let ids: HashSet<u64> = db.guild_messages(GUILD).unwrap().iter().map(|m| m.message_id).collect();
        assert_eq!(ids, HashSet::from([1, 2]));
        let config = db.guild_config(GUILD).unwrap().unwrap();
        assert_eq!(config.target_message_count, 2);
        assert!(!config.enabled);
    }

    #[tokio::test]
    async fn test_producer_waits_for_free_workers() {
        let workers = 2;
        let history = Arc::new(
            FakeHistory::default().with_channel(10, (1..=30).map(|id| record(id, TARGET, "x")).collect()),
        );
        let (page_tx, mut page_rx) = mpsc::channel(workers);
        let cancel = CancellationToken::new();
        let producer = tokio::spawn(produce_pages(
            history.clone(),
            10,
            1_000,
            3,
            settings(workers, 3).retry,
            page_tx,
            cancel.clone(),
        ));

        // One page per worker is queued; the next one is fetched and held.
        tokio::time::timeout(Duration::from_secs(5), async {
            while history.fetches.load(Ordering::SeqCst) < workers as u64 + 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(history.fetches.load(Ordering::SeqCst), workers as u64 + 1);
        assert!(!producer.is_finished());

        let mut queued = 0;
        while page_rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, workers);

        cancel.cancel();
        let result = producer.await.unwrap();
        assert!(matches!(result, Err(ReplicationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_failed_worker_stops_the_rest() {
        let stop = CancellationToken::new();
        let mut pool = JoinSet::new();
        let waiting = stop.clone();
        pool.spawn(async move { waiting.cancelled().await });
        pool.spawn(async {
            panic!("worker bug");
        });

        let result = tokio::time::timeout(Duration::from_secs(5), join_workers(&mut pool, &stop))
            .await
            .unwrap();

        assert!(matches!(result, Err(ReplicationError::Task(_))));
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_guild_is_fatal() {
        let db = test_db();
        let result = bulk(&db, Arc::new(FakeHistory::default()), full_access())
            .run(GUILD, &[10], 100, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ReplicationError::UnknownGuild(GUILD))));
    }

    #[tokio::test]
    async fn test_auto_probability_follows_counts() {
        let db = test_db();
        seed_guild(&db, &[10], |_| {});
        let records: Vec<HistoryRecord> = (1..=40)
            .map(|id| record(id, if id <= 10 { TARGET } else { OTHER }, "x"))
            .collect();
        let history = Arc::new(FakeHistory::default().with_channel(10, records));

        bulk(&db, history, full_access())
            .run(GUILD, &[10], 100, Arc::new(RecordingStatus::default()), &CancellationToken::new())
            .await
            .unwrap();

        let config: GuildConfig = db.guild_config(GUILD).unwrap().unwrap();
        assert!((config.probability - 0.25).abs() < 1e-12);
    }
}
