use poise::serenity_prelude as serenity;
use replicator::db::Database;
use replicator::discord::{SerenityHistory, SerenityPermissions, SerenitySender};
use replicator::ingest::live::LiveIngest;
use replicator::ingest::{IngestContext, Replicator};
use replicator::model::HistoryRecord;
use replicator::ports::PermissionOracle;
use replicator::replay::ReplaySampler;
use replicator::{commands, config::Config, Data, Error};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();
    debug!("Loaded configuration: {:?}", config);

    let db = Database::new(&config)?;
    db.execute_init()?;

    // Filled once the framework is ready so shutdown can reach in-flight reads.
    let replicator_slot: Arc<OnceLock<Arc<Replicator>>> = Arc::new(OnceLock::new());
    let slot = replicator_slot.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    if let Err(e) = handle_event(ctx, event, data).await {
                        error!("Event handler error: {}", e);
                    }
                    Ok(())
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot is ready as {}", ready.user.name);
                match config.dev_guild_id {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            serenity::GuildId::new(guild_id),
                        )
                        .await?
                    }
                    None => poise::builtins::register_globally(ctx, &framework.options().commands).await?,
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let permissions: Arc<dyn PermissionOracle> =
                    Arc::new(SerenityPermissions::new(ctx.cache.clone()));
                let replicator = Arc::new(Replicator::new(IngestContext {
                    db: db.clone(),
                    history: Arc::new(SerenityHistory::new(ctx.http.clone())),
                    permissions: permissions.clone(),
                    settings: config.ingest_settings(),
                }));
                let _ = slot.set(replicator.clone());

                let bot_id = ready.user.id.get();
                Ok(Data {
                    sampler: ReplaySampler::new(db.clone()),
                    live: LiveIngest::new(db.clone(), bot_id, replicator.runs()),
                    sender: Arc::new(SerenitySender::new(ctx.http.clone())),
                    permissions,
                    replicator,
                    config,
                    db,
                    bot_id,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            if let Some(replicator) = replicator_slot.get() {
                replicator.shutdown();
            }
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn handle_event(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildCreate { guild, .. } => {
            let guild_id = guild.id.get();
            let channels: Vec<u64> = guild.channels.keys().map(|id| id.get()).collect();
            let prefix = data.config.default_prefix.clone();
            let created = data
                .db
                .run_blocking(move |db| db.ensure_guild(guild_id, &prefix, &channels))
                .await?;
            if created {
                info!("Joined server {} ({})", guild.name, guild_id);
            } else {
                debug!("Server {} ({}) became available", guild.name, guild_id);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            // An outage is not a departure.
            if !incomplete.unavailable {
                let guild_id = incomplete.id.get();
                data.db.run_blocking(move |db| db.remove_guild(guild_id)).await?;
                info!("Left server {}", guild_id);
            }
        }
        serenity::FullEvent::Message { new_message } => {
            let Some(guild_id) = new_message.guild_id else {
                return Ok(());
            };
            if new_message.author.id.get() == data.bot_id {
                return Ok(());
            }

            let guild_id = guild_id.get();
            let channel_id = new_message.channel_id.get();
            let access = data.permissions.channel_access(guild_id, channel_id).await;
            let draw: f64 = rand::random();
            let outcome = data
                .live
                .observe(guild_id, channel_id, HistoryRecord::from(new_message), access, draw)
                .await?;

            if outcome.replays > 0 {
                let sent = data
                    .sampler
                    .send_replays(
                        guild_id,
                        channel_id,
                        outcome.replays,
                        outcome.allow_mentions,
                        data.sender.as_ref(),
                    )
                    .await;
                debug!("Replayed {} messages in channel {}", sent, channel_id);
            }
        }
        _ => {}
    }
    Ok(())
}
