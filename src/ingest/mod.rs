//! Message ingestion: full-history rescans, incremental catch-up and the live
//! per-message path.
//!
//! [`Replicator`] is the handle the rest of the bot holds; it spawns ingestion
//! runs onto the tokio runtime, keeps at most one run per guild in flight, and
//! cancels every run on [`Replicator::shutdown`].

pub mod bulk;
pub mod catchup;
pub mod live;
pub mod progress;

pub use bulk::{BulkIngestion, BulkSummary};
pub use catchup::{CatchupSummary, IncrementalCatchup};

use crate::db::Database;
use crate::error::{ReplicationError, Result};
use crate::model::HistoryRecord;
use crate::ports::{ChannelHistoryProvider, PermissionOracle, StatusSink};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bounded exponential backoff for history fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    /// Fixed size of the page worker pool, and of the page queue.
    pub workers: usize,
    pub page_size: usize,
    /// Progress edits fire only after this many more records were processed.
    pub progress_increment: u64,
    pub progress_poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            page_size: 100,
            progress_increment: 10,
            progress_poll_interval: Duration::from_millis(250),
            retry: RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(500),
            },
        }
    }
}

/// Everything an ingestion run reads from or writes to.
#[derive(Clone)]
pub struct IngestContext {
    pub db: Database,
    pub history: Arc<dyn ChannelHistoryProvider>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub settings: IngestSettings,
}

impl IngestContext {
    /// Fails with `PermissionDenied` unless both the platform and the guild
    /// config allow reading the channel's history.
    pub(crate) async fn check_read_access(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        let access = self.permissions.channel_access(guild_id, channel_id).await;
        let configured = self
            .db
            .run_blocking(move |db| db.channel_permission(guild_id, channel_id))
            .await?;

        if access.can_read() && configured.can_read() {
            Ok(())
        } else {
            Err(ReplicationError::PermissionDenied { channel: channel_id })
        }
    }
}

/// Runs `op` until it succeeds, retrying with backoff up to the policy's
/// attempt budget. Pending attempts and backoff sleeps end early on
/// cancellation.
pub(crate) async fn with_retry<T, F, Fut>(
    channel_id: u64,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = retry.attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ReplicationError::Cancelled);
        }
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplicationError::Cancelled),
            outcome = op() => outcome,
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if attempt >= attempts {
            return Err(ReplicationError::TransientFetch {
                channel: channel_id,
                attempts,
                source: err,
            });
        }

        let delay = retry.delay(attempt);
        warn!(
            "Fetch in channel {} failed (attempt {}/{}), retrying in {:?}: {}",
            channel_id, attempt, attempts, delay, err
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReplicationError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One page of history, retried per `retry`. Without a cursor this is the
/// channel's most recent page.
pub(crate) async fn fetch_page_with_retry(
    history: &dyn ChannelHistoryProvider,
    channel_id: u64,
    before: Option<u64>,
    limit: usize,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<HistoryRecord>> {
    with_retry(channel_id, retry, cancel, || match before {
        Some(before) => history.fetch_page(channel_id, Some(before), limit),
        None => history.latest(channel_id, limit),
    })
    .await
}

/// Posts a status line; delivery failures are logged and otherwise ignored.
pub(crate) async fn notify(status: &dyn StatusSink, text: &str) {
    if let Err(e) = status.post(text).await {
        warn!("Failed to post status '{}': {}", text, e);
    }
}

/// Guilds with an ingestion run in flight.
///
/// Shared between [`Replicator`] and the live path: a run works from a config
/// snapshot taken when it starts, so nothing else may append to the guild's
/// store until it finishes.
#[derive(Clone, Default)]
pub struct RunRegistry {
    running: Arc<Mutex<HashSet<u64>>>,
}

impl RunRegistry {
    pub fn is_running(&self, guild_id: u64) -> bool {
        lock(&self.running).contains(&guild_id)
    }

    /// Runs `f` unless a run is in flight for the guild. No run can be
    /// claimed for any guild while `f` executes.
    pub fn while_idle<T>(&self, guild_id: u64, f: impl FnOnce() -> T) -> Option<T> {
        let running = lock(&self.running);
        if running.contains(&guild_id) {
            None
        } else {
            Some(f())
        }
    }

    fn claim(&self, guild_id: u64) -> Result<RunGuard> {
        if !lock(&self.running).insert(guild_id) {
            return Err(ReplicationError::AlreadyRunning(guild_id));
        }
        Ok(RunGuard {
            guild_id,
            registry: self.clone(),
        })
    }
}

/// Injected handle that schedules ingestion runs.
pub struct Replicator {
    ctx: IngestContext,
    shutdown: CancellationToken,
    runs: RunRegistry,
}

impl Replicator {
    pub fn new(ctx: IngestContext) -> Self {
        Self::with_registry(ctx, RunRegistry::default())
    }

    pub fn with_registry(ctx: IngestContext, runs: RunRegistry) -> Self {
        Self {
            ctx,
            shutdown: CancellationToken::new(),
            runs,
        }
    }

    /// Registry the live path consults before touching the store.
    pub fn runs(&self) -> RunRegistry {
        self.runs.clone()
    }

    pub fn start_bulk_ingestion(
        &self,
        guild_id: u64,
        channels: Vec<u64>,
        max_messages: usize,
        status: Arc<dyn StatusSink>,
    ) -> Result<JoinHandle<Result<BulkSummary>>> {
        let guard = self.claim(guild_id)?;
        let bulk = BulkIngestion::new(self.ctx.clone());
        let cancel = self.shutdown.child_token();
        info!(
            "Starting full read of guild {} ({} channels, max {} per channel)",
            guild_id,
            channels.len(),
            max_messages
        );

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let result = bulk
                .run(guild_id, &channels, max_messages, status.clone(), &cancel)
                .await;
            if let Err(e) = &result {
                report_failure(status.as_ref(), guild_id, e).await;
            }
            result
        }))
    }

    pub fn start_incremental_catchup(
        &self,
        guild_id: u64,
        channels: Vec<u64>,
        status: Arc<dyn StatusSink>,
    ) -> Result<JoinHandle<Result<CatchupSummary>>> {
        let guard = self.claim(guild_id)?;
        let catchup = IncrementalCatchup::new(self.ctx.clone());
        let cancel = self.shutdown.child_token();
        info!("Starting catch-up read of guild {} ({} channels)", guild_id, channels.len());

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let result = catchup.run(guild_id, &channels, status.clone(), &cancel).await;
            if let Err(e) = &result {
                report_failure(status.as_ref(), guild_id, e).await;
            }
            result
        }))
    }

    pub fn is_running(&self, guild_id: u64) -> bool {
        self.runs.is_running(guild_id)
    }

    /// Cancels every in-flight run. Runs stop at their next suspension point
    /// without committing the channel they were reading.
    pub fn shutdown(&self) {
        info!("Cancelling in-flight read operations");
        self.shutdown.cancel();
    }

    fn claim(&self, guild_id: u64) -> Result<RunGuard> {
        if self.shutdown.is_cancelled() {
            return Err(ReplicationError::Cancelled);
        }
        self.runs.claim(guild_id)
    }
}

struct RunGuard {
    guild_id: u64,
    registry: RunRegistry,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.registry.running).remove(&self.guild_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn report_failure(status: &dyn StatusSink, guild_id: u64, err: &ReplicationError) {
    match err {
        // Already reported to the user by the run itself.
        ReplicationError::ConfigurationMissing => {}
        ReplicationError::Cancelled => info!("Read operation for guild {} cancelled", guild_id),
        _ => {
            error!("Read operation for guild {} failed: {}", guild_id, err);
            notify(status, &format!("An error has occurred while reading messages: {}", err)).await;
        }
    }
}
