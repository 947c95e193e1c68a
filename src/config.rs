use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{
    player::PlaybackSettings,
    streamer::StreamTiming,
    sound::FRAME_DURATION,
    transcode::{EncoderProfile, TranscodeSettings},
};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,
    pub status_text: String,

    // Audio
    pub max_queue_size: usize,
    pub opus_bitrate: u32,
    pub encoder_profile: EncoderProfile,
    pub transcode_handoff: usize,
    pub max_concurrent_transcodes: usize,
    pub voice_buffer_frames: usize,

    // Timing
    pub settle_delay: Duration,
    pub preroll_delay: Duration,
    pub linger_delay: Duration,

    // Cache
    pub scratch_dir: PathBuf,
    pub sound_cache_size: usize,
    pub sound_cache_ttl: Duration,

    // Limits
    pub max_song_duration: u64, // seconds
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.scratch_dir).with_context(|| {
            format!("creating scratch dir {}", config.scratch_dir.display())
        })?;

        Ok(config)
    }

    /// Builds and validates a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let text = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: text("COMMAND_PREFIX", "!m"),
            status_text: text("STATUS_TEXT", "Why are you so angry?"),

            max_queue_size: parse_var(&var, "MAX_QUEUE_SIZE", 6)?,
            opus_bitrate: parse_var(&var, "OPUS_BITRATE", 64_000)?,
            encoder_profile: parse_var(&var, "ENCODER_PROFILE", EncoderProfile::Music)?,
            transcode_handoff: parse_var(&var, "TRANSCODE_HANDOFF", 16)?,
            max_concurrent_transcodes: parse_var(
                &var,
                "MAX_CONCURRENT_TRANSCODES",
                num_cpus::get(),
            )?,
            voice_buffer_frames: parse_var(&var, "VOICE_BUFFER_FRAMES", 4)?,

            settle_delay: duration_var(&var, "SETTLE_DELAY", Duration::from_millis(125))?,
            preroll_delay: duration_var(&var, "PREROLL_DELAY", Duration::from_millis(32))?,
            linger_delay: duration_var(&var, "LINGER_DELAY", Duration::from_millis(250))?,

            scratch_dir: text("SCRATCH_DIR", "/tmp/soundqueue").into(),
            sound_cache_size: parse_var(&var, "SOUND_CACHE_SIZE", 32)?,
            sound_cache_ttl: duration_var(&var, "SOUND_CACHE_TTL", Duration::from_secs(3600))?,

            max_song_duration: parse_var(&var, "MAX_SONG_DURATION", 3600)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Opus bitrate must lie within 8kbps..=510kbps
    /// - Queue, handoff, cache and buffer sizes must be > 0
    /// - The command prefix must be a single word
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.transcode_handoff == 0 {
            anyhow::bail!("Transcode handoff must be greater than 0");
        }

        if self.max_concurrent_transcodes == 0 {
            anyhow::bail!("Max concurrent transcodes must be greater than 0");
        }

        if self.voice_buffer_frames == 0 {
            anyhow::bail!("Voice buffer must hold at least one frame");
        }

        if self.sound_cache_size == 0 {
            anyhow::bail!("Sound cache size must be greater than 0");
        }

        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.command_prefix.split_whitespace().count() != 1 {
            anyhow::bail!("Command prefix must be a single word, got: {:?}", self.command_prefix);
        }

        Ok(())
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            queue_capacity: self.max_queue_size,
            timing: StreamTiming {
                settle_delay: self.settle_delay,
                preroll_delay: self.preroll_delay,
                frame_interval: FRAME_DURATION,
            },
            linger_delay: self.linger_delay,
        }
    }

    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            bitrate: self.opus_bitrate,
            profile: self.encoder_profile,
            handoff_capacity: self.transcode_handoff,
            max_concurrent: self.max_concurrent_transcodes,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the bot token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix `{}`\n  \
            Audio: {}kbps {:?}, handoff {}, {} parallel transcodes\n  \
            Timing: settle {}, preroll {}, linger {}\n  \
            Cache: {} sounds for {}, scratch {}\n  \
            Limits: {} queue, {}s max duration",
            self.command_prefix,
            self.opus_bitrate / 1000,
            self.encoder_profile,
            self.transcode_handoff,
            self.max_concurrent_transcodes,
            humantime::format_duration(self.settle_delay),
            humantime::format_duration(self.preroll_delay),
            humantime::format_duration(self.linger_delay),
            self.sound_cache_size,
            humantime::format_duration(self.sound_cache_ttl),
            self.scratch_dir.display(),
            self.max_queue_size,
            self.max_song_duration,
        )
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {} `{}`: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn duration_var<F>(var: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => humantime::parse_duration(raw.trim())
            .with_context(|| format!("invalid {} `{}`", key, raw)),
        None => Ok(default),
    }
}
