use chrono::Utc;
use serenity::model::id::GuildId;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    player::AudioPlayer,
    queue::{Play, RoomQueue},
    signal::SkipSignal,
    streamer::{FrameStreamer, StreamOutcome},
};
use crate::voice::VoiceSink;

/// Drives one room from its first play until the queue runs dry.
///
/// Acquiring → Streaming → Advancing → (Streaming | Idle). Runs as its own
/// task; the streamer runs inline so a room never streams two plays at once.
pub(super) struct SessionDriver {
    pub player: AudioPlayer,
    pub guild_id: GuildId,
    pub queue: RoomQueue,
    pub skip: SkipSignal,
    pub cancel: CancellationToken,
}

impl SessionDriver {
    pub async fn run(self, first: Play) {
        let guild_id = self.guild_id;
        let mut next = first;

        loop {
            debug!("🔌 Acquiring voice for guild {} (channel {})", guild_id, next.channel_id);

            let mut sink = match self.player.connector().join(guild_id, next.channel_id).await {
                Ok(sink) => sink,
                Err(e) => {
                    error!("❌ Failed to play `{}` in guild {}: {}", next.title, guild_id, e);
                    // Removing the session lets a fresh enqueue retry from scratch
                    self.player.end_session(guild_id, false);
                    return;
                }
            };

            self.play_until_idle(sink.as_mut(), next).await;

            // The session stays registered until the call is gone. Plays that
            // arrive meanwhile queue here instead of joining the departing call.
            sink.disconnect().await;

            if self.cancel.is_cancelled() {
                self.player.end_session(guild_id, false);
                break;
            }
            if self.player.end_session(guild_id, true) {
                break;
            }
            match self.queue.pop() {
                Some(play) => {
                    debug!("🔁 Plays arrived during teardown in guild {}, rejoining", guild_id);
                    next = play;
                }
                None => {
                    self.player.end_session(guild_id, false);
                    break;
                }
            }
        }

        info!("💤 Session for guild {} ended", guild_id);
    }

    /// Streams until the queue stays empty for the linger delay or the
    /// session is cancelled. The caller disconnects afterwards.
    async fn play_until_idle(&self, sink: &mut dyn VoiceSink, first: Play) {
        let settings = self.player.settings();
        let streamer = FrameStreamer::new(settings.timing, &self.skip, &self.cancel);
        let mut next = Some(first);

        loop {
            while let Some(play) = next.take() {
                self.stream_chain(&streamer, sink, play).await;
                if self.cancel.is_cancelled() {
                    return;
                }
                next = self.queue.pop();
            }

            // Queue is empty: linger so quick re-queues reuse the connection
            tokio::select! {
                _ = time::sleep(settings.linger_delay) => {}
                _ = self.cancel.cancelled() => {}
            }

            if self.cancel.is_cancelled() {
                return;
            }
            next = self.queue.pop();
            if next.is_none() {
                return;
            }
            debug!("🔁 Plays arrived while lingering in guild {}", self.guild_id);
        }
    }

    /// Streams a play and its follow-ups. A skip, cancel or send failure ends the whole chain.
    async fn stream_chain(&self, streamer: &FrameStreamer<'_>, sink: &mut dyn VoiceSink, play: Play) {
        let mut current = Some(play);

        while let Some(mut play) = current {
            current = play.follow_up.take().map(|next| *next);

            let waited = Utc::now().signed_duration_since(play.requested_at);
            info!(
                "🎵 Playing `{}` in guild {} for {} (queued {}ms)",
                play.title,
                self.guild_id,
                play.requested_by,
                waited.num_milliseconds()
            );

            match streamer.stream(sink, &play).await {
                Ok(StreamOutcome::Completed { frames }) => {
                    debug!("✅ Finished `{}` ({} frames)", play.title, frames);
                }
                Ok(StreamOutcome::Skipped { frames }) => {
                    info!("⏭️ Skipped `{}` after {} frames", play.title, frames);
                    return;
                }
                Ok(StreamOutcome::Cancelled { frames }) => {
                    debug!("⏹️ Cancelled `{}` after {} frames", play.title, frames);
                    return;
                }
                Err(e) => {
                    warn!("❌ Streaming `{}` in guild {} failed: {}", play.title, self.guild_id, e);
                    return;
                }
            }
        }
    }
}
