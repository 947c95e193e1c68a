use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod voice;

use crate::audio::{player::AudioPlayer, transcode::Transcoder};
use crate::bot::{handlers::SoundLoader, SoundBot};
use crate::cache::SoundCache;
use crate::config::Config;
use crate::sources::YtDlpRetriever;
use crate::voice::songbird_sink::SongbirdConnector;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("soundqueue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("🎵 Starting soundqueue v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let songbird = Songbird::serenity();
    let connector = SongbirdConnector::new(
        songbird.clone(),
        config.opus_bitrate,
        config.voice_buffer_frames,
    );
    let player = AudioPlayer::new(Arc::new(connector), config.playback_settings());

    let retriever = YtDlpRetriever::new(
        config.scratch_dir.clone(),
        Duration::from_secs(config.max_song_duration),
    );
    let cache = SoundCache::with_limits(config.sound_cache_size, config.sound_cache_ttl);
    let loader = SoundLoader::new(
        Arc::new(retriever),
        Transcoder::new(config.transcode_settings()),
        cache,
    );

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = SoundBot::new(config.clone(), player.clone(), loader);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    sources::verify_dependencies().await?;
    println!("OK");
    Ok(())
}
