use super::{ensure_idle, guild_id, load_config, save_config};
use crate::{Context, Error};
use tracing::info;

/// Store messages that carry attachments or embeds
#[poise::command(slash_command, required_permissions = "MANAGE_GUILD", guild_only)]
pub async fn embed(
    ctx: Context<'_>,
    #[description = "Whether such messages are stored; omit to show the setting"] enabled: Option<bool>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let Some(enabled) = enabled else {
        let config = load_config(&ctx, guild_id).await?;
        ctx.say(describe(config.can_embed)).await?;
        return Ok(());
    };
    if !ensure_idle(&ctx, guild_id).await? {
        return Ok(());
    }

    let mut config = load_config(&ctx, guild_id).await?;
    config.can_embed = enabled;
    save_config(&ctx, config).await?;
    info!("Guild {} can_embed set to {}", guild_id, enabled);

    ctx.say(format!(
        "{} Run `/read all` to apply this to messages already stored.",
        describe(enabled)
    ))
    .await?;
    Ok(())
}

fn describe(enabled: bool) -> &'static str {
    if enabled {
        "🖼️ Messages with attachments or embeds are stored."
    } else {
        "🚫 Messages with attachments or embeds are skipped."
    }
}
