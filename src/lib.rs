pub mod commands;
pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod model;
pub mod ports;
pub mod replay;

#[cfg(test)]
mod testing;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub replicator: Arc<ingest::Replicator>,
    pub sampler: replay::ReplaySampler,
    pub live: ingest::live::LiveIngest,
    pub sender: Arc<dyn ports::MessageSender>,
    pub permissions: Arc<dyn ports::PermissionOracle>,
    /// Bot's own user ID, used to detect mentions
    pub bot_id: u64,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
