use super::{ensure_idle, guild_id, load_config, save_config};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Choose whose messages get replicated
#[poise::command(
    slash_command,
    subcommands("set", "get"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn target(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the target user
#[poise::command(slash_command)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "User whose messages are stored and replayed"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    if !ensure_idle(&ctx, guild_id).await? {
        return Ok(());
    }

    let mut config = load_config(&ctx, guild_id).await?;
    config.target_user_id = Some(user.id.get());
    save_config(&ctx, config).await?;
    info!("Guild {} now targets user {}", guild_id, user.id);

    ctx.say(format!(
        "🎯 Target set to **{}**. Run `/read all` to rebuild the stored messages.",
        user.name
    ))
    .await?;
    Ok(())
}

/// Show the target user
#[poise::command(slash_command)]
pub async fn get(ctx: Context<'_>) -> Result<(), Error> {
    let config = load_config(&ctx, guild_id(&ctx)?).await?;
    let reply = match config.target_user_id {
        Some(id) => format!(
            "🎯 Target is <@{}> with {} stored messages.",
            id, config.target_message_count
        ),
        None => "Target user not selected".to_string(),
    };
    ctx.send(
        poise::CreateReply::default()
            .content(reply)
            .allowed_mentions(serenity::CreateAllowedMentions::new()),
    )
    .await?;
    Ok(())
}
