//! In-memory voice connection that records everything sent to it.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::time::{self, Instant};

use super::{VoiceConnector, VoiceSink};
use crate::error::{JoinError, SendError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Joined(GuildId, ChannelId),
    ChangedChannel(ChannelId),
    Speaking(bool),
    Frame(Bytes),
    Disconnected(GuildId),
}

/// Like songbird, every sink of a guild shares one call: a disconnect from
/// any of them leaves voice for the whole guild.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    events: Arc<Mutex<Vec<(Instant, SinkEvent)>>>,
    connected: Arc<Mutex<HashSet<GuildId>>>,
    orphaned_frames: Arc<Mutex<usize>>,
    /// Frame index (global) at which `send_frame` starts failing
    fail_sends_after: Option<usize>,
    disconnect_delay: Duration,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sends_after(frames: usize) -> Self {
        Self {
            fail_sends_after: Some(frames),
            ..Self::default()
        }
    }

    /// Leaving voice takes this long before the call is gone
    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }

    /// Frames sent while the guild had no live call
    pub fn frames_while_disconnected(&self) -> usize {
        *self.orphaned_frames.lock()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed_events(&self) -> Vec<(Instant, SinkEvent)> {
        self.events.lock().clone()
    }

    /// Frames received, in order
    pub fn frames(&self) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Frame(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Number of frames received per play tag (first byte of each frame), in arrival order
    pub fn frames_per_tag(&self) -> Vec<(u8, usize)> {
        let mut runs: Vec<(u8, usize)> = Vec::new();
        for frame in self.frames() {
            match runs.last_mut() {
                Some((tag, count)) if *tag == frame[0] => *count += 1,
                _ => runs.push((frame[0], 1)),
            }
        }
        runs
    }

    pub fn joins(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Joined(..)))
            .count()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().push((Instant::now(), event));
    }
}

#[async_trait]
impl VoiceConnector for RecordingConnector {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn VoiceSink>, JoinError> {
        self.connected.lock().insert(guild_id);
        self.record(SinkEvent::Joined(guild_id, channel_id));
        Ok(Box::new(RecordingSink {
            log: self.clone(),
            guild_id,
            channel_id,
        }))
    }
}

pub struct RecordingSink {
    log: RecordingConnector,
    guild_id: GuildId,
    channel_id: ChannelId,
}

#[async_trait]
impl VoiceSink for RecordingSink {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn change_channel(&mut self, channel_id: ChannelId) -> Result<(), JoinError> {
        self.channel_id = channel_id;
        self.log.record(SinkEvent::ChangedChannel(channel_id));
        Ok(())
    }

    async fn set_speaking(&mut self, speaking: bool) {
        self.log.record(SinkEvent::Speaking(speaking));
    }

    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SendError> {
        if let Some(limit) = self.log.fail_sends_after {
            if self.log.frames().len() >= limit {
                return Err(SendError::Closed);
            }
        }
        if !self.log.connected.lock().contains(&self.guild_id) {
            *self.log.orphaned_frames.lock() += 1;
        }
        self.log.record(SinkEvent::Frame(frame));
        Ok(())
    }

    async fn disconnect(&mut self) {
        if !self.log.disconnect_delay.is_zero() {
            time::sleep(self.log.disconnect_delay).await;
        }
        self.log.connected.lock().remove(&self.guild_id);
        self.log.record(SinkEvent::Disconnected(self.guild_id));
    }
}
