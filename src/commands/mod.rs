pub mod channels;
pub mod embed;
pub mod mention;
pub mod prefix;
pub mod probability;
pub mod read;
pub mod reply;
pub mod substrings;
pub mod target;
pub mod users;

use crate::error::ReplicationError;
use crate::model::GuildConfig;
use crate::{Context, Error};

/// Registered slash commands.
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        read::read(),
        reply::reply(),
        probability::probability(),
        target::target(),
        substrings::substrings(),
        users::users(),
        channels::channels(),
        mention::mention(),
        embed::embed(),
        prefix::prefix(),
    ]
}

pub(crate) fn guild_id(ctx: &Context<'_>) -> Result<u64, Error> {
    Ok(ctx.guild_id().ok_or("Must be run in a guild")?.get())
}

pub(crate) async fn load_config(ctx: &Context<'_>, guild_id: u64) -> Result<GuildConfig, Error> {
    let config = ctx
        .data()
        .db
        .run_blocking(move |db| db.guild_config(guild_id))
        .await?
        .ok_or(ReplicationError::UnknownGuild(guild_id))?;
    Ok(config)
}

pub(crate) async fn save_config(ctx: &Context<'_>, config: GuildConfig) -> Result<(), Error> {
    ctx.data()
        .db
        .run_blocking(move |db| db.save_guild_config(&config))
        .await?;
    Ok(())
}

/// Config edits would be overwritten by a read in flight, so they wait for it.
pub(crate) async fn ensure_idle(ctx: &Context<'_>, guild_id: u64) -> Result<bool, Error> {
    if ctx.data().replicator.is_running(guild_id) {
        ctx.say("❌ A read operation is running in this server, try again once it finishes.")
            .await?;
        return Ok(false);
    }
    Ok(true)
}
