use super::{ensure_idle, guild_id, load_config, save_config};
use crate::{Context, Error};
use tracing::info;

/// View or change how often the bot replies on its own
#[poise::command(
    slash_command,
    subcommands("get", "set", "auto"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn probability(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn describe(probability: f64, auto: bool) -> String {
    format!(
        "🎲 Reply probability is **{:.2}%** ({})",
        probability * 100.0,
        if auto { "updated automatically" } else { "fixed" }
    )
}

/// Show the current reply probability
#[poise::command(slash_command)]
pub async fn get(ctx: Context<'_>) -> Result<(), Error> {
    let config = load_config(&ctx, guild_id(&ctx)?).await?;
    ctx.say(describe(config.probability, config.auto_update_probability))
        .await?;
    Ok(())
}

/// Fix the reply probability, turning off automatic updates
#[poise::command(slash_command)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Chance to reply to any message, from 0 to 1"]
    #[min = 0]
    #[max = 1]
    value: f64,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    if !ensure_idle(&ctx, guild_id).await? {
        return Ok(());
    }

    let mut config = load_config(&ctx, guild_id).await?;
    config.set_fixed_probability(value);
    let reply = describe(config.probability, false);
    save_config(&ctx, config).await?;
    info!("Guild {} probability fixed at {}", guild_id, value);

    ctx.say(reply).await?;
    Ok(())
}

/// Derive the probability from how much the target user talks
#[poise::command(slash_command)]
pub async fn auto(
    ctx: Context<'_>,
    #[description = "Whether to update the probability automatically"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    if !ensure_idle(&ctx, guild_id).await? {
        return Ok(());
    }

    let mut config = load_config(&ctx, guild_id).await?;
    config.set_auto_probability(enabled);
    let reply = describe(config.probability, enabled);
    save_config(&ctx, config).await?;

    ctx.say(reply).await?;
    Ok(())
}
