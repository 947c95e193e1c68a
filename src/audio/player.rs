use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::{
    driver::SessionDriver,
    queue::{Play, RoomQueue},
    signal::SkipSignal,
    streamer::StreamTiming,
};
use crate::voice::VoiceConnector;

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Pending plays a room may hold besides the one streaming
    pub queue_capacity: usize,
    pub timing: StreamTiming,
    /// Idle time before an emptied session disconnects
    pub linger_delay: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 6,
            timing: StreamTiming::default(),
            linger_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The room was idle; a session was started for this play
    Started,
    /// Appended behind the current play at this queue position
    Queued { position: usize },
    /// The room queue was full and the play was discarded
    Dropped,
}

/// Live playback state of one room.
struct Session {
    queue: RoomQueue,
    skip: SkipSignal,
    cancel: CancellationToken,
}

/// Per-guild playback sequencer.
///
/// Owns the guild → skip signal and guild → session maps. Lookups and
/// inserts go through `DashMap` entries, so check-then-create is atomic per
/// guild. Each session is driven by one task spawned on the tracker.
#[derive(Clone)]
pub struct AudioPlayer {
    rooms: Arc<DashMap<GuildId, SkipSignal>>,
    sessions: Arc<DashMap<GuildId, Session>>,
    connector: Arc<dyn VoiceConnector>,
    settings: Arc<PlaybackSettings>,
    tasks: TaskTracker,
    closing: CancellationToken,
}

impl AudioPlayer {
    pub fn new(connector: Arc<dyn VoiceConnector>, settings: PlaybackSettings) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
            connector,
            settings: Arc::new(settings),
            tasks: TaskTracker::new(),
            closing: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    pub(super) fn connector(&self) -> &dyn VoiceConnector {
        self.connector.as_ref()
    }

    /// Makes the room known. Idempotent; returns the room's skip signal.
    pub fn register_room(&self, guild_id: GuildId) -> SkipSignal {
        self.rooms.entry(guild_id).or_default().clone()
    }

    /// Stops any session in the room and forgets it.
    pub fn forget_room(&self, guild_id: GuildId) {
        if let Some(session) = self.sessions.get(&guild_id) {
            session.queue.drain();
            session.cancel.cancel();
        }
        self.rooms.remove(&guild_id);
        debug!("🗑️ Forgot guild {}", guild_id);
    }

    /// Hands a play to its room: starts a session when idle, queues it
    /// otherwise, or drops it when the queue is full.
    pub fn enqueue(&self, play: Play) -> EnqueueOutcome {
        let guild_id = play.guild_id;

        if self.closing.is_cancelled() {
            warn!("Player shutting down, dropping `{}` for guild {}", play.title, guild_id);
            return EnqueueOutcome::Dropped;
        }

        let skip = self.register_room(guild_id);

        let (queue, cancel) = match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => {
                if entry.get().cancel.is_cancelled() {
                    debug!("Session in guild {} is closing, dropping `{}`", guild_id, play.title);
                    return EnqueueOutcome::Dropped;
                }
                return match entry.get().queue.push(play) {
                    Ok(position) => {
                        info!("➕ Queued in guild {} at position {}", guild_id, position);
                        EnqueueOutcome::Queued { position }
                    }
                    Err(dropped) => {
                        debug!("📥 Queue full in guild {}, dropping `{}`", guild_id, dropped.title);
                        EnqueueOutcome::Dropped
                    }
                };
            }
            Entry::Vacant(entry) => {
                let session = Session {
                    queue: RoomQueue::new(self.settings.queue_capacity),
                    skip: skip.clone(),
                    cancel: self.closing.child_token(),
                };
                let handles = (session.queue.clone(), session.cancel.clone());
                entry.insert(session);
                handles
            }
        };

        info!("▶️ Starting playback session in guild {}", guild_id);
        let driver = SessionDriver {
            player: self.clone(),
            guild_id,
            queue,
            skip,
            cancel,
        };
        self.tasks.spawn(driver.run(play));
        EnqueueOutcome::Started
    }

    /// Cancels the current play only. Returns false when the room is idle.
    pub fn skip(&self, guild_id: GuildId) -> bool {
        // The session guard is held while signalling so teardown cannot interleave
        match self.sessions.get(&guild_id) {
            Some(session) => {
                session.skip.trigger();
                info!("⏭️ Skip requested in guild {}", guild_id);
                true
            }
            None => {
                debug!("Skip ignored, guild {} is idle", guild_id);
                false
            }
        }
    }

    /// Discards every pending play, then cancels the current one.
    /// Returns how many pending plays were discarded.
    pub fn stop(&self, guild_id: GuildId) -> usize {
        match self.sessions.get(&guild_id) {
            Some(session) => {
                let drained = session.queue.drain();
                session.skip.trigger();
                info!("⏹️ Stop requested in guild {} ({} pending discarded)", guild_id, drained);
                drained
            }
            None => {
                debug!("Stop ignored, guild {} is idle", guild_id);
                0
            }
        }
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    /// Plays waiting behind the current one
    pub fn queued(&self, guild_id: GuildId) -> usize {
        self.sessions
            .get(&guild_id)
            .map(|s| s.queue.len())
            .unwrap_or(0)
    }

    /// Removes the room's session. With `require_empty`, only when nothing is
    /// queued. Clears any skip left pending by the finished session.
    pub(super) fn end_session(&self, guild_id: GuildId, require_empty: bool) -> bool {
        self.sessions
            .remove_if(&guild_id, |_, session| {
                let removable = !require_empty || session.queue.is_empty();
                if removable {
                    session.skip.take();
                }
                removable
            })
            .is_some()
    }

    /// Cancels every session and waits for their drivers to disconnect.
    pub async fn shutdown(&self) {
        info!("⏹️ Shutting down {} playback sessions", self.sessions.len());
        self.closing.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
