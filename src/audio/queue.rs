use chrono::{DateTime, Utc};
use flume::{Receiver, Sender, TrySendError};
use serenity::model::id::{ChannelId, GuildId, UserId};

use super::sound::Sound;

/// One request to stream a sound into a voice channel.
#[derive(Debug, Clone)]
pub struct Play {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub requested_by: UserId,
    pub title: String,
    pub sound: Sound,
    pub requested_at: DateTime<Utc>,
    /// Streamed right after this one, before the room queue advances
    pub follow_up: Option<Box<Play>>,
}

impl Play {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        requested_by: UserId,
        title: impl Into<String>,
        sound: Sound,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            requested_by,
            title: title.into(),
            sound,
            requested_at: Utc::now(),
            follow_up: None,
        }
    }

    /// Appends `next` to the end of this play's follow-up chain.
    #[allow(dead_code)]
    pub fn then(mut self, next: Play) -> Self {
        let tail = match self.follow_up.take() {
            Some(existing) => (*existing).then(next),
            None => next,
        };
        self.follow_up = Some(Box::new(tail));
        self
    }

    /// Number of plays in the chain, this one included
    #[allow(dead_code)]
    pub fn chain_len(&self) -> usize {
        1 + self.follow_up.as_ref().map_or(0, |p| p.chain_len())
    }
}

/// Bounded FIFO of pending plays for one room.
///
/// Cloning yields another handle onto the same queue.
#[derive(Debug, Clone)]
pub struct RoomQueue {
    tx: Sender<Play>,
    rx: Receiver<Play>,
}

impl RoomQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Appends without blocking. A full queue drops the play and returns it.
    pub fn push(&self, play: Play) -> Result<usize, Play> {
        match self.tx.try_send(play) {
            Ok(()) => Ok(self.tx.len()),
            Err(TrySendError::Full(play)) | Err(TrySendError::Disconnected(play)) => Err(play),
        }
    }

    pub fn pop(&self) -> Option<Play> {
        self.rx.try_recv().ok()
    }

    /// Removes every pending play and returns how many were discarded.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}
