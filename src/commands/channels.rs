use super::guild_id;
use crate::model::ChannelPermission;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Control where the bot reads from and replies in
#[poise::command(
    slash_command,
    subcommands("set", "get"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn channels(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn describe(channel_id: u64, permission: ChannelPermission) -> String {
    let yes_no = |allowed: bool| if allowed { "yes" } else { "no" };
    format!(
        "📺 <#{}>: read **{}**, write **{}**",
        channel_id,
        yes_no(permission.can_read()),
        yes_no(permission.can_write())
    )
}

/// Allow or forbid reading and replying in a channel
#[poise::command(slash_command)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Channel to configure"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
    #[description = "Store messages read from this channel"] read: bool,
    #[description = "Reply in this channel"] write: bool,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let channel_id = channel.id.get();
    let mut permission = ChannelPermission::NONE;
    if read {
        permission = permission | ChannelPermission::READ;
    }
    if write {
        permission = permission | ChannelPermission::WRITE;
    }

    ctx.data()
        .db
        .run_blocking(move |db| db.set_channel_permission(guild_id, channel_id, permission))
        .await?;
    info!(
        "Guild {} channel {} permission set to {:?}",
        guild_id, channel_id, permission
    );

    ctx.say(describe(channel_id, permission)).await?;
    Ok(())
}

/// Show what the bot may do in a channel
#[poise::command(slash_command)]
pub async fn get(
    ctx: Context<'_>,
    #[description = "Channel to inspect"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let channel_id = channel.id.get();
    let permission = ctx
        .data()
        .db
        .run_blocking(move |db| db.channel_permission(guild_id, channel_id))
        .await?;

    ctx.say(describe(channel_id, permission)).await?;
    Ok(())
}
