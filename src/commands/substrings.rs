use super::guild_id;
use crate::{Context, Error};

/// Keep messages containing a substring out of the replay pool
#[poise::command(
    slash_command,
    subcommands("add", "remove", "list"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn substrings(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Stop storing messages that contain a substring
#[poise::command(slash_command)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Text that disqualifies a message"] substring: String,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    if substring.is_empty() {
        ctx.say("❌ The substring cannot be empty.").await?;
        return Ok(());
    }

    let value = substring.clone();
    let added = ctx
        .data()
        .db
        .run_blocking(move |db| db.add_disabled_substring(guild_id, &value))
        .await?;
    if added {
        ctx.say(format!("✅ Messages containing `{}` will no longer be stored.", substring))
            .await?;
    } else {
        ctx.say(format!("`{}` is already disabled.", substring)).await?;
    }
    Ok(())
}

/// Allow a disabled substring again
#[poise::command(slash_command)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Previously disabled text"] substring: String,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let value = substring.clone();
    let removed = ctx
        .data()
        .db
        .run_blocking(move |db| db.remove_disabled_substring(guild_id, &value))
        .await?;
    if removed {
        ctx.say(format!("✅ `{}` is allowed again.", substring)).await?;
    } else {
        ctx.say(format!("❌ `{}` was not disabled.", substring)).await?;
    }
    Ok(())
}

/// List disabled substrings
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let substrings = ctx
        .data()
        .db
        .run_blocking(move |db| db.disabled_substrings(guild_id))
        .await?;

    if substrings.is_empty() {
        ctx.say("No substrings are disabled.").await?;
    } else {
        let lines: Vec<String> = substrings.iter().map(|s| format!("- `{}`", s)).collect();
        ctx.say(format!("**Disabled substrings**\n{}", lines.join("\n")))
            .await?;
    }
    Ok(())
}
