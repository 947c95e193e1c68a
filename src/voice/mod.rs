//! # Voice Module
//!
//! The narrow seam between the playback core and a live voice connection.
//!
//! - [`VoiceConnector`] acquires a connection for a guild
//! - [`VoiceSink`] is that connection: it can move between channels, toggle
//!   speaking and accept pre-encoded Opus frames
//!
//! The production implementation lives in [`songbird_sink`] and feeds frames to
//! the songbird driver as a live DCA stream ([`dca`]).

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};

use crate::error::{JoinError, SendError};

pub mod dca;
pub mod songbird_sink;

#[cfg(test)]
pub(crate) mod testing;

/// Acquires voice connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn VoiceSink>, JoinError>;
}

/// A connected voice output for one guild.
#[async_trait]
pub trait VoiceSink: Send {
    /// Channel the connection currently targets
    fn channel_id(&self) -> ChannelId;

    async fn change_channel(&mut self, channel_id: ChannelId) -> Result<(), JoinError>;

    async fn set_speaking(&mut self, speaking: bool);

    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SendError>;

    async fn disconnect(&mut self);
}
