use super::{ensure_idle, guild_id, load_config, save_config};
use crate::{Context, Error};
use tracing::info;

/// Allow replayed messages to ping users and roles
#[poise::command(slash_command, required_permissions = "MANAGE_GUILD", guild_only)]
pub async fn mention(
    ctx: Context<'_>,
    #[description = "Whether replays may mention; omit to show the setting"] enabled: Option<bool>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let Some(enabled) = enabled else {
        let config = load_config(&ctx, guild_id).await?;
        ctx.say(describe(config.can_mention)).await?;
        return Ok(());
    };
    if !ensure_idle(&ctx, guild_id).await? {
        return Ok(());
    }

    let mut config = load_config(&ctx, guild_id).await?;
    config.can_mention = enabled;
    save_config(&ctx, config).await?;
    info!("Guild {} mentions {}", guild_id, if enabled { "allowed" } else { "suppressed" });

    ctx.say(describe(enabled)).await?;
    Ok(())
}

fn describe(enabled: bool) -> &'static str {
    if enabled {
        "🔔 Replayed messages may mention users and roles."
    } else {
        "🔕 Replayed messages never mention anyone."
    }
}
