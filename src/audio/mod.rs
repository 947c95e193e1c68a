//! # Audio Module
//!
//! Per-guild playback core of the bot.
//!
//! ## Architecture
//!
//! ### [`transcode`] - Transcode Pipeline
//! - ffmpeg decodes media to 48 kHz stereo s16le
//! - Fixed 960-sample chunks cross a bounded channel to the Opus encoder
//! - The resulting [`sound::Sound`] is sealed and immutable
//!
//! ### [`player`] - Sequencer
//! - One bounded FIFO queue and one skip signal per guild
//! - `enqueue` bootstraps a session, queues, or drops on overflow
//! - `skip` cancels the current play, `stop` also discards the queue
//!
//! ### [`driver`] / [`streamer`] - Session loop
//! - Joins voice, streams plays back to back, lingers, disconnects
//! - Frames are paced at 20 ms with settle/pre-roll delays before audio
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz
//! - **Channels**: Stereo
//! - **Frame**: 960 samples per channel (20 ms)
//! - **Encoding**: Opus at 64kbps (configurable)
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let player = AudioPlayer::new(connector, PlaybackSettings::default());
//! let sound = transcoder.transcode_file(&path).await?;
//!
//! player.enqueue(Play::new(guild_id, channel_id, user_id, "title", sound));
//! player.skip(guild_id);
//! player.stop(guild_id);
//! ```

mod driver;
pub mod player;
pub mod queue;
pub mod signal;
pub mod sound;
pub mod streamer;
pub mod transcode;
