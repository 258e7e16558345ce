use super::guild_id;
use crate::discord::{text_channels, ChannelStatus};
use crate::error::ReplicationError;
use crate::ports::StatusSink;
use crate::{Context, Error};
use std::sync::Arc;
use tracing::info;

/// Read channel history into the replay pool
#[poise::command(
    slash_command,
    subcommands("all", "update"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn read(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn status_sink(ctx: &Context<'_>) -> Arc<dyn StatusSink> {
    Arc::new(ChannelStatus::new(
        ctx.serenity_context().http.clone(),
        ctx.channel_id(),
    ))
}

/// Forget stored messages and reread every channel
#[poise::command(slash_command)]
pub async fn all(
    ctx: Context<'_>,
    #[description = "Most messages to read per channel"]
    #[min = 1]
    max_messages: Option<usize>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let channels = text_channels(ctx.cache(), guild_id);
    let max_messages = max_messages.unwrap_or(ctx.data().config.default_max_messages);
    let count = channels.len();

    info!(
        "Full read requested by {} in guild {}",
        ctx.author().name,
        guild_id
    );
    match ctx
        .data()
        .replicator
        .start_bulk_ingestion(guild_id, channels, max_messages, status_sink(&ctx))
    {
        Ok(_) => {
            ctx.say(format!(
                "📚 Reading up to {} messages in each of {} channels...",
                max_messages, count
            ))
            .await?;
        }
        Err(ReplicationError::AlreadyRunning(_)) => {
            ctx.say("❌ A read operation is already running in this server.").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Read only messages sent since the last read
#[poise::command(slash_command)]
pub async fn update(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let channels = text_channels(ctx.cache(), guild_id);
    let count = channels.len();

    match ctx
        .data()
        .replicator
        .start_incremental_catchup(guild_id, channels, status_sink(&ctx))
    {
        Ok(_) => {
            ctx.say(format!("📥 Reading new messages in {} channels...", count))
                .await?;
        }
        Err(ReplicationError::AlreadyRunning(_)) => {
            ctx.say("❌ A read operation is already running in this server.").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
