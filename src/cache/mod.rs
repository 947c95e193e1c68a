//! # Cache Module
//!
//! In-memory cache of transcoded sounds.
//!
//! Transcoding is the expensive part of serving a request, so finished
//! [`Sound`]s are kept by media id. A repeated request gets a clone of the
//! cached sound, which shares the same immutable frame buffer.
//!
//! ## Features
//!
//! - **LRU Eviction**: the least recently used sound goes first
//! - **TTL Support**: entries expire after `SOUND_CACHE_TTL`
//! - **Thread Safety**: concurrent access from command handlers
//!
//! ## Configuration
//!
//! ```env
//! SOUND_CACHE_SIZE=32     # Maximum number of cached sounds
//! SOUND_CACHE_TTL=1h      # Time-to-live (humantime)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let cache = SoundCache::with_limits(32, Duration::from_secs(3600));
//! cache.put("dQw4w9WgXcQ", CachedSound { title, sound });
//!
//! if let Some(cached) = cache.lookup("dQw4w9WgXcQ") {
//!     player.enqueue(Play::new(guild, channel, user, cached.title, cached.sound));
//! }
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::sound::Sound;

/// Transcoded sounds keyed by media id.
pub type SoundCache = LRUCache<String, CachedSound>;

#[derive(Debug, Clone)]
pub struct CachedSound {
    /// Display title at the time of caching
    pub title: String,
    pub sound: Sound,
}

impl SoundCache {
    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        LRUCache::new(capacity).with_ttl(ttl)
    }

    pub fn lookup(&self, media_id: &str) -> Option<CachedSound> {
        let hit = self.get(&media_id.to_string());
        if hit.is_some() {
            debug!("💾 Sound cache hit for {}", media_id);
        }
        hit
    }

    pub fn put(&self, media_id: impl Into<String>, cached: CachedSound) {
        self.insert(media_id.into(), cached);
    }

    /// Removes expired sounds. Called from the hourly maintenance task.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Sound cache cleanup: removed {} expired entries", removed);
        }
        let metrics = self.metrics();
        debug!(
            "💾 Sound cache: {} entries, {:.0}% hit rate, {} evictions, {} expired",
            self.len(),
            metrics.hit_rate() * 100.0,
            metrics.evictions,
            metrics.expired_removals
        );
    }
}
