use super::guild_id;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Choose which users the bot never replies to
#[poise::command(
    slash_command,
    subcommands("disable", "enable", "list"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn users(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Stop replying to a user's messages
#[poise::command(slash_command)]
pub async fn disable(
    ctx: Context<'_>,
    #[description = "User the bot should ignore"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let user_id = user.id.get();
    let added = ctx
        .data()
        .db
        .run_blocking(move |db| db.add_disabled_user(guild_id, user_id))
        .await?;

    if added {
        info!("Guild {} disabled replies to user {}", guild_id, user_id);
        ctx.say(format!("🔇 No longer replying to **{}**.", user.name)).await?;
    } else {
        ctx.say(format!("**{}** is already disabled.", user.name)).await?;
    }
    Ok(())
}

/// Reply to a disabled user again
#[poise::command(slash_command)]
pub async fn enable(
    ctx: Context<'_>,
    #[description = "Previously disabled user"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let user_id = user.id.get();
    let removed = ctx
        .data()
        .db
        .run_blocking(move |db| db.remove_disabled_user(guild_id, user_id))
        .await?;

    if removed {
        ctx.say(format!("🔊 Replying to **{}** again.", user.name)).await?;
    } else {
        ctx.say(format!("❌ **{}** was not disabled.", user.name)).await?;
    }
    Ok(())
}

/// List users the bot does not reply to
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let users = ctx
        .data()
        .db
        .run_blocking(move |db| db.disabled_users(guild_id))
        .await?;

    let reply = if users.is_empty() {
        "No users are disabled.".to_string()
    } else {
        let lines: Vec<String> = users.iter().map(|id| format!("- <@{}>", id)).collect();
        format!("**Disabled users**\n{}", lines.join("\n"))
    };
    ctx.send(
        poise::CreateReply::default()
            .content(reply)
            .allowed_mentions(serenity::CreateAllowedMentions::new()),
    )
    .await?;
    Ok(())
}
