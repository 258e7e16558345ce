use crate::ingest::{IngestSettings, RetryPolicy};
use dotenvy::dotenv;
use humantime::parse_duration;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub default_prefix: String,
    pub status_message: String,
    pub dev_guild_id: Option<u64>,

    // Bulk ingestion
    pub ingest_workers: usize,
    pub ingest_page_size: usize,
    pub progress_increment: u64,
    pub progress_poll_interval: Duration,
    pub default_max_messages: usize,

    // History fetch retries
    pub fetch_retry_attempts: u32,
    pub fetch_retry_backoff: Duration,
}

/// Discord returns at most this many messages per history request.
pub const DISCORD_PAGE_LIMIT: usize = 100;

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/replicator.db".to_string()),
            default_prefix: env::var("DEFAULT_PREFIX").unwrap_or_else(|_| "!".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Listening closely".to_string()),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            ingest_workers: parsed_or("INGEST_WORKERS", 8usize).max(1),
            ingest_page_size: parsed_or("INGEST_PAGE_SIZE", DISCORD_PAGE_LIMIT)
                .clamp(1, DISCORD_PAGE_LIMIT),
            progress_increment: parsed_or("PROGRESS_INCREMENT", 10u64).max(1),
            progress_poll_interval: duration_or("PROGRESS_POLL_INTERVAL", "250ms")?,
            default_max_messages: parsed_or("DEFAULT_MAX_MESSAGES", 1_000_000usize),
            fetch_retry_attempts: parsed_or("FETCH_RETRY_ATTEMPTS", 3u32).max(1),
            fetch_retry_backoff: duration_or("FETCH_RETRY_BACKOFF", "500ms")?,
        })
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            workers: self.ingest_workers,
            page_size: self.ingest_page_size,
            progress_increment: self.progress_increment,
            progress_poll_interval: self.progress_poll_interval,
            retry: RetryPolicy {
                attempts: self.fetch_retry_attempts,
                backoff: self.fetch_retry_backoff,
            },
        }
    }
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn duration_or(key: &str, default: &str) -> anyhow::Result<Duration> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    parse_duration(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} must be a duration like '250ms' or '2s': {}", key, e))
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("database_url", &self.database_url)
            .field("default_prefix", &self.default_prefix)
            .field("status_message", &self.status_message)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("ingest_workers", &self.ingest_workers)
            .field("ingest_page_size", &self.ingest_page_size)
            .field("progress_increment", &self.progress_increment)
            .field("progress_poll_interval", &self.progress_poll_interval)
            .field("default_max_messages", &self.default_max_messages)
            .field("fetch_retry_attempts", &self.fetch_retry_attempts)
            .field("fetch_retry_backoff", &self.fetch_retry_backoff)
            .finish()
    }
}
