//! # Bot Module
//!
//! Discord glue around the playback core.
//!
//! [`SoundBot`] implements Serenity's [`EventHandler`]:
//!
//! - `ready`: sets the activity status and starts hourly maintenance
//! - `guild_create` / `guild_delete`: register (and greet) and forget rooms
//! - `message`: prefix commands (see [`handlers`])
//! - `voice_state_update`: stops a room when the bot is kicked from voice

use serenity::{
    all::{
        ActivityData, ChannelId, Context, EventHandler, Guild, GuildId, Message, Ready,
        UnavailableGuild, VoiceState,
    },
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub mod handlers;

use crate::{audio::player::AudioPlayer, cache::SoundCache, config::Config};
use handlers::SoundLoader;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);
const GREETING: &str = "Lucio, coming at you!";

pub struct SoundBot {
    config: Arc<Config>,
    player: AudioPlayer,
    loader: Arc<SoundLoader>,
    maintenance_started: AtomicBool,
}

impl SoundBot {
    pub fn new(config: Arc<Config>, player: AudioPlayer, loader: SoundLoader) -> Self {
        Self {
            config,
            player,
            loader: Arc::new(loader),
            maintenance_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for SoundBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::playing(self.config.status_text.clone())));

        // ready fires again on every reconnect
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let cache = self.loader.cache().clone();
            tokio::spawn(async move {
                maintenance_tasks(cache).await;
            });
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        self.player.register_room(guild.id);
        debug!("🏠 Room ready for guild {} ({})", guild.id, guild.name);

        let Some(channel_id) = greeting_channel(guild.id, guild.channels.keys().copied()) else {
            return;
        };
        if let Err(e) = channel_id.say(&ctx.http, GREETING).await {
            warn!("Could not greet guild {}: {}", guild.id, e);
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            // Outage: the guild comes back with a fresh guild_create
            let drained = self.player.stop(incomplete.id);
            warn!("⚠️ Guild {} became unavailable ({} plays discarded)", incomplete.id, drained);
        } else {
            self.player.forget_room(incomplete.id);
            info!("👋 Removed from guild {}", incomplete.id);
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if let Err(e) = handlers::handle_message(&ctx, &msg, self).await {
            error!("Error handling message {}: {:?}", msg.id, e);
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        // Our own teardown also clears the voice state; only react while a session runs
        if self.player.is_active(guild_id) {
            info!("🔌 Bot disconnected from voice in guild {}", guild_id);
            self.player.stop(guild_id);
        }
    }
}

/// The guild's original default channel, which shares the guild's id.
fn greeting_channel(
    guild_id: GuildId,
    mut channels: impl Iterator<Item = ChannelId>,
) -> Option<ChannelId> {
    channels.find(|channel| channel.get() == guild_id.get())
}

/// Hourly housekeeping: expire cached sounds and check external tools.
async fn maintenance_tasks(cache: SoundCache) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        cache.cleanup_old_entries();

        if let Err(e) = crate::sources::verify_dependencies().await {
            warn!("Dependency check failed: {:?}", e);
        }

        info!("🧹 Maintenance tasks completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_greeting_goes_to_default_channel() {
        let guild = GuildId::new(10);
        let channels = [ChannelId::new(3), ChannelId::new(10), ChannelId::new(7)];
        assert_eq!(greeting_channel(guild, channels.into_iter()), Some(ChannelId::new(10)));

        // Newer guilds have no channel sharing their id; stay quiet there
        let channels = [ChannelId::new(3), ChannelId::new(7)];
        assert_eq!(greeting_channel(guild, channels.into_iter()), None);
    }
}
