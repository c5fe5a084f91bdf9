use anyhow::Result;
use clap::Parser;
use guild_scribe::{avatar, config, db, gateway, ingest};
use serenity::prelude::GatewayIntents;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/scribe.db", cfg.app.data_dir));

    // A store failure here is the only error allowed to halt the process.
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    // Avatar sync worker: ingestion enqueues and returns, the worker drains.
    let (sync_tx, sync_rx) = tokio::sync::mpsc::channel(cfg.app.sync_queue_depth);
    let engine = Arc::new(avatar::AvatarSync::new(
        PathBuf::from(&cfg.app.cache_dir),
        Arc::new(avatar::HttpFetcher::new()),
    ));
    tokio::spawn(engine.run(sync_rx));

    let ingestor = ingest::Ingestor::new(pool, &cfg.discord, sync_tx);
    let handler = gateway::Handler::new(ingestor, cfg.discord.guild_id);

    info!("starting discord gateway");
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::Client::builder(&cfg.discord.bot_token, intents)
        .event_handler(handler)
        .await?;
    client.start().await?;

    Ok(())
}
