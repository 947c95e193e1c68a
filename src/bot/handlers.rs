use anyhow::Result;
use dashmap::DashMap;
use serenity::all::{ChannelId, Context, GuildId, Message, UserId};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::SoundBot;
use crate::{
    audio::{player::EnqueueOutcome, queue::Play, transcode::Transcoder},
    cache::{CachedSound, SoundCache},
    error::LoadError,
    sources::{ytdlp::remove_scratch, MediaRetriever, ResolvedMedia},
};

/// A recognized subcommand of the prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Play(Option<&'a str>),
    Skip,
    Stop,
    Queue,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// The message does not start with the prefix
    Ignored,
    /// Prefix alone
    Missing,
    Unknown(&'a str),
    Command(Command<'a>),
}

/// Splits `<prefix> <subcommand> [argument...]`.
///
/// The prefix and subcommand are case-insensitive. Everything after the
/// subcommand is kept as a single argument so searches can contain spaces.
pub fn parse_command<'a>(prefix: &str, content: &'a str) -> Parsed<'a> {
    let content = content.trim();
    let (head, rest) = split_word(content);
    if !head.eq_ignore_ascii_case(prefix) {
        return Parsed::Ignored;
    }

    let (name, argument) = split_word(rest);
    if name.is_empty() {
        return Parsed::Missing;
    }
    let argument = Some(argument).filter(|a| !a.is_empty());

    let command = match name.to_ascii_lowercase().as_str() {
        "play" => Command::Play(argument),
        "skip" => Command::Skip,
        "stop" => Command::Stop,
        "queue" => Command::Queue,
        "help" => Command::Help,
        _ => return Parsed::Unknown(name),
    };
    Parsed::Command(command)
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim()),
        None => (s, ""),
    }
}

type LoadResult = Result<CachedSound, Arc<LoadError>>;

/// Resolved media turned into a sound, via the cache when possible.
pub struct SoundLoader {
    retriever: Arc<dyn MediaRetriever>,
    transcoder: Transcoder,
    cache: SoundCache,
    /// Loads in progress, keyed by media id
    in_flight: DashMap<String, Arc<OnceCell<LoadResult>>>,
}

impl SoundLoader {
    pub fn new(retriever: Arc<dyn MediaRetriever>, transcoder: Transcoder, cache: SoundCache) -> Self {
        Self {
            retriever,
            transcoder,
            cache,
            in_flight: DashMap::new(),
        }
    }

    pub fn retriever(&self) -> &dyn MediaRetriever {
        self.retriever.as_ref()
    }

    pub fn cache(&self) -> &SoundCache {
        &self.cache
    }

    /// Fetches and transcodes `media`. Concurrent requests for the same id
    /// share one download and its outcome.
    pub async fn load(&self, media: &ResolvedMedia) -> LoadResult {
        if let Some(cached) = self.cache.lookup(&media.id) {
            return Ok(cached);
        }

        let job = self.in_flight.entry(media.id.clone()).or_default().clone();
        let result = job
            .get_or_init(|| async { self.fetch_and_transcode(media).await.map_err(Arc::new) })
            .await
            .clone();
        self.in_flight
            .remove_if(&media.id, |_, current| Arc::ptr_eq(current, &job));
        result
    }

    /// The scratch download is removed whether or not transcoding succeeds.
    async fn fetch_and_transcode(&self, media: &ResolvedMedia) -> Result<CachedSound, LoadError> {
        let path = self.retriever.fetch(media).await?;
        let transcoded = self.transcoder.transcode_file(&path).await;
        remove_scratch(&path).await;

        let cached = CachedSound {
            title: media.title.clone(),
            sound: transcoded?,
        };
        self.cache.put(media.id.clone(), cached.clone());
        Ok(cached)
    }
}

/// Entry point for every guild text message.
pub async fn handle_message(ctx: &Context, msg: &Message, bot: &SoundBot) -> Result<()> {
    if msg.author.bot {
        return Ok(());
    }
    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };

    match parse_command(&bot.config.command_prefix, &msg.content) {
        Parsed::Ignored => Ok(()),
        Parsed::Missing => reply(ctx, msg.channel_id, "I didn't catch that!").await,
        Parsed::Unknown(name) => {
            debug!("Unknown command `{}` from {}", name, msg.author.id);
            reply(ctx, msg.channel_id, "I don't know that command!").await
        }
        Parsed::Command(command) => {
            info!("🎮 {:?} from {} in guild {}", command, msg.author.id, guild_id);
            match command {
                Command::Play(argument) => handle_play(ctx, msg, bot, guild_id, argument).await,
                Command::Skip => handle_skip(ctx, msg, bot, guild_id).await,
                Command::Stop => handle_stop(ctx, msg, bot, guild_id).await,
                Command::Queue => handle_queue(ctx, msg, bot, guild_id).await,
                Command::Help => handle_help(ctx, msg, bot).await,
            }
        }
    }
}

async fn handle_play(
    ctx: &Context,
    msg: &Message,
    bot: &SoundBot,
    guild_id: GuildId,
    argument: Option<&str>,
) -> Result<()> {
    let Some(locator) = argument else {
        return reply(ctx, msg.channel_id, "You gotta tell me a video to play!").await;
    };

    let media = match bot.loader.retriever().resolve(locator).await {
        Ok(media) => media,
        Err(e) => {
            warn!("❌ Could not resolve `{}`: {}", locator, e);
            return reply(ctx, msg.channel_id, "Couldn't find any video from that!").await;
        }
    };

    reply(ctx, msg.channel_id, &format!("Queuing `{}`!", media.title)).await?;

    let loaded = match bot.loader.load(&media).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("❌ Could not load `{}`: {}", media.title, e);
            let text = match e.as_ref() {
                LoadError::Fetch(_) => format!("Ran into an error downloading `{}`!", media.title),
                LoadError::Transcode(_) => {
                    format!("Ran into an error converting `{}` to audio!", media.title)
                }
            };
            return reply(ctx, msg.channel_id, &text).await;
        }
    };

    let Some(channel_id) = current_voice_channel(ctx, guild_id, msg.author.id) else {
        warn!(
            "Failed to find a voice channel for {} in guild {}",
            msg.author.id, guild_id
        );
        return reply(ctx, msg.channel_id, "Join a voice channel first!").await;
    };

    let play = Play::new(guild_id, channel_id, msg.author.id, loaded.title, loaded.sound);
    match bot.player.enqueue(play) {
        EnqueueOutcome::Started => {}
        EnqueueOutcome::Queued { position } => {
            debug!("`{}` is number {} in guild {}", media.title, position, guild_id);
        }
        EnqueueOutcome::Dropped => {
            debug!("Queue full in guild {}, `{}` dropped", guild_id, media.title);
        }
    }
    Ok(())
}

async fn handle_skip(ctx: &Context, msg: &Message, bot: &SoundBot, guild_id: GuildId) -> Result<()> {
    reply(ctx, msg.channel_id, "Skipping this video!").await?;
    if !bot.player.skip(guild_id) {
        debug!("Nothing to skip in guild {}", guild_id);
    }
    Ok(())
}

async fn handle_stop(ctx: &Context, msg: &Message, bot: &SoundBot, guild_id: GuildId) -> Result<()> {
    reply(ctx, msg.channel_id, "Skipping all video!").await?;
    let drained = bot.player.stop(guild_id);
    debug!("Stop in guild {} discarded {} plays", guild_id, drained);
    Ok(())
}

async fn handle_queue(ctx: &Context, msg: &Message, bot: &SoundBot, guild_id: GuildId) -> Result<()> {
    reply(ctx, msg.channel_id, &queue_status(bot.player.is_active(guild_id), bot.player.queued(guild_id)))
        .await
}

async fn handle_help(ctx: &Context, msg: &Message, bot: &SoundBot) -> Result<()> {
    reply(ctx, msg.channel_id, &help_text(&bot.config.command_prefix)).await
}

fn queue_status(active: bool, queued: usize) -> String {
    if active {
        format!("{} queued after the current sound.", queued)
    } else {
        "Nothing is playing.".to_string()
    }
}

fn help_text(prefix: &str) -> String {
    format!(
        "`{p} play <url or search>` queue a video's audio\n\
        `{p} skip` skip the current video\n\
        `{p} stop` skip everything\n\
        `{p} queue` show what's waiting",
        p = prefix
    )
}

/// The requester's voice channel in this guild, from the gateway cache.
fn current_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

async fn reply(ctx: &Context, channel_id: ChannelId, text: &str) -> Result<()> {
    if let Err(e) = channel_id.say(&ctx.http, text).await {
        warn!("Could not send message to channel {}: {}", channel_id, e);
    }
    Ok(())
}
