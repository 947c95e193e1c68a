//! Error types for the playback core.
//!
//! Every failure is scoped to one room session or one transcode job; none of
//! them is allowed to take the process down.

use serenity::model::id::{ChannelId, GuildId};
use std::{process::ExitStatus, time::Duration};
use thiserror::Error;

/// Media could not be located from the user's locator.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// Nothing matched the locator
    #[error("no media found for `{0}`")]
    NotFound(String),

    /// The retrieval tool could not be started
    #[error("media retriever unavailable: {0}")]
    Unavailable(#[source] std::io::Error),

    /// The retrieval tool answered with something we could not read
    #[error("unreadable media info: {0}")]
    Malformed(String),

    /// Media is longer than the configured limit
    #[error("`{title}` is too long ({duration:?} > {limit:?})")]
    TooLong {
        title: String,
        duration: Duration,
        limit: Duration,
    },
}

/// Downloading resolved media to scratch storage failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("could not start download: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("download of `{id}` failed: {reason}")]
    Download { id: String, reason: String },

    #[error("download of `{id}` produced no file")]
    Missing { id: String },
}

/// Converting media into a Frame Buffer failed. Partial buffers are discarded.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("could not start decoder: {0}")]
    DecoderStart(#[source] std::io::Error),

    #[error("decoder exited abnormally: {0}")]
    DecoderExit(ExitStatus),

    #[error("failed reading decoded samples: {0}")]
    Read(#[source] std::io::Error),

    #[error("opus encoder error: {0}")]
    Encoder(String),

    #[error("encode stage aborted: {0}")]
    Stage(#[from] tokio::task::JoinError),

    #[error("transcoder is shutting down")]
    Closed,
}

impl From<audiopus::Error> for TranscodeError {
    fn from(e: audiopus::Error) -> Self {
        TranscodeError::Encoder(e.to_string())
    }
}

/// Acquiring or moving the voice connection failed.
#[derive(Error, Debug)]
pub enum JoinError {
    #[error("failed to join channel {channel} in guild {guild}: {reason}")]
    Failed {
        guild: GuildId,
        channel: ChannelId,
        reason: String,
    },
}

/// Delivering audio to the voice connection failed. Fatal to the current stream only.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("voice connection closed")]
    Closed,

    #[error("frame sent while not speaking")]
    NotSpeaking,

    #[error("could not move to channel {channel}: {source}")]
    ChannelChange {
        channel: ChannelId,
        #[source]
        source: JoinError,
    },
}

/// Turning resolved media into a playable sound failed.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}
