use super::guild_id;
use crate::{Context, Error};
use tracing::info;

/// Longest prefix accepted, in characters.
const MAX_PREFIX_LEN: usize = 8;

/// Show or change the prefix that marks messages as bot commands
#[poise::command(slash_command, required_permissions = "MANAGE_GUILD", guild_only)]
pub async fn prefix(
    ctx: Context<'_>,
    #[description = "New prefix; omit to show the current one"] prefix: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let Some(prefix) = prefix else {
        let current = ctx
            .data()
            .db
            .run_blocking(move |db| db.prefix(guild_id))
            .await?
            .unwrap_or_default();
        ctx.say(format!("Command prefix is `{}`.", current)).await?;
        return Ok(());
    };

    if let Err(reason) = validate(&prefix) {
        ctx.say(format!("❌ {}", reason)).await?;
        return Ok(());
    }
    let value = prefix.clone();
    ctx.data()
        .db
        .run_blocking(move |db| db.set_prefix(guild_id, &value))
        .await?;
    info!("Guild {} prefix set to {:?}", guild_id, prefix);

    ctx.say(format!(
        "✅ Messages starting with `{}` are now treated as commands.",
        prefix
    ))
    .await?;
    Ok(())
}

fn validate(prefix: &str) -> Result<(), String> {
    if prefix.trim().is_empty() {
        return Err("The prefix cannot be empty.".to_string());
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err("The prefix cannot contain spaces.".to_string());
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(format!("The prefix can be at most {} characters.", MAX_PREFIX_LEN));
    }
    Ok(())
}
