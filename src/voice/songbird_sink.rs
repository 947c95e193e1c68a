use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{tracks::TrackHandle, Call, Songbird};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{dca, VoiceConnector, VoiceSink};
use crate::error::{JoinError, SendError};

/// Joins voice channels through the songbird manager registered with serenity.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    bitrate: u32,
    buffer_frames: usize,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, bitrate: u32, buffer_frames: usize) -> Self {
        Self {
            manager,
            bitrate,
            buffer_frames: buffer_frames.max(1),
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn VoiceSink>, JoinError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| JoinError::Failed {
                guild: guild_id,
                channel: channel_id,
                reason: e.to_string(),
            })?;

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);

        Ok(Box::new(SongbirdSink {
            manager: self.manager.clone(),
            call,
            guild_id,
            channel_id,
            bitrate: self.bitrate,
            buffer_frames: self.buffer_frames,
            feed: None,
        }))
    }
}

/// Open track fed frame by frame while the sink is speaking.
struct ActiveFeed {
    frames: flume::Sender<Bytes>,
    track: TrackHandle,
}

pub struct SongbirdSink {
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    guild_id: GuildId,
    channel_id: ChannelId,
    bitrate: u32,
    buffer_frames: usize,
    feed: Option<ActiveFeed>,
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn change_channel(&mut self, channel_id: ChannelId) -> Result<(), JoinError> {
        // Joining again inside the same guild moves the existing call
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| JoinError::Failed {
                guild: self.guild_id,
                channel: channel_id,
                reason: e.to_string(),
            })?;

        debug!(
            "🔀 Moved from channel {} to {} in guild {}",
            self.channel_id, channel_id, self.guild_id
        );
        self.channel_id = channel_id;
        Ok(())
    }

    async fn set_speaking(&mut self, speaking: bool) {
        if speaking {
            if self.feed.is_some() {
                return;
            }
            let (frames, rx) = flume::bounded(self.buffer_frames);
            let input = dca::live_input(rx, self.bitrate);
            let track = self.call.lock().await.play_input(input);
            self.feed = Some(ActiveFeed { frames, track });
        } else if let Some(feed) = self.feed.take() {
            // Closing the sender ends the DCA stream once buffered frames are played
            drop(feed.frames);
        }
    }

    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SendError> {
        let feed = self.feed.as_ref().ok_or(SendError::NotSpeaking)?;
        feed.frames
            .send_async(frame)
            .await
            .map_err(|_| SendError::Closed)
    }

    async fn disconnect(&mut self) {
        if let Some(feed) = self.feed.take() {
            let _ = feed.track.stop();
        }

        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("Error leaving voice in guild {}: {:?}", self.guild_id, e);
        } else {
            info!("👋 Disconnected from voice in guild {}", self.guild_id);
        }
    }
}
