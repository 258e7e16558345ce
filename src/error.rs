//! Error types for the replication engine.

use thiserror::Error;

/// Result type alias using the engine's error type.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while ingesting or replaying messages.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// No target user has been selected for the guild.
    #[error("Target user not selected")]
    ConfigurationMissing,

    /// The bot or the guild configuration forbids reading a channel.
    #[error("No permission to read in channel {channel}")]
    PermissionDenied { channel: u64 },

    /// Fetching a page of history kept failing after retries.
    #[error("Fetching history in channel {channel} failed after {attempts} attempts: {source}")]
    TransientFetch {
        channel: u64,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The store rejected a read or write.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// The guild has no stored messages to sample from.
    #[error("No stored messages")]
    EmptyStore,

    /// The guild was never registered with the store.
    #[error("Server config does not exist for guild {0}")]
    UnknownGuild(u64),

    /// Another ingestion run is already in flight for the guild.
    #[error("A read operation is already running for guild {0}")]
    AlreadyRunning(u64),

    /// The service is shutting down.
    #[error("Operation cancelled")]
    Cancelled,

    /// A spawned task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ReplicationError {
    /// Whether the error must abort the whole multi-channel operation.
    ///
    /// Permission denials and exhausted fetch retries only affect the channel
    /// they occurred in; everything else surfaces to the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ReplicationError::PermissionDenied { .. } | ReplicationError::TransientFetch { .. }
        )
    }
}
