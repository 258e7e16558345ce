use super::{guild_id, load_config};
use crate::model::MessageKind;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// Reply with a random stored message
#[poise::command(slash_command, guild_only)]
pub async fn reply(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let config = load_config(&ctx, guild_id).await?;

    // Interaction responses cannot carry stickers.
    let message = ctx
        .data()
        .sampler
        .random(guild_id, Some(MessageKind::Raw))
        .await;
    if message.is_empty() {
        ctx.say("❌ No messages stored yet. Run `/read all` first.").await?;
        return Ok(());
    }

    let mentions = if config.can_mention {
        serenity::CreateAllowedMentions::new()
            .all_users(true)
            .all_roles(true)
            .everyone(true)
    } else {
        serenity::CreateAllowedMentions::new()
    };
    ctx.send(
        poise::CreateReply::default()
            .content(message.text)
            .allowed_mentions(mentions),
    )
    .await?;
    Ok(())
}
