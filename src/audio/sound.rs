use bytes::Bytes;
use std::{sync::Arc, time::Duration};

/// Output sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48_000;
/// Stereo
pub const CHANNELS: usize = 2;
/// Samples per channel in one 20 ms frame at 48 kHz
pub const FRAME_SIZE: usize = 960;
/// Interleaved samples in one frame
pub const FRAME_SAMPLES: usize = FRAME_SIZE * CHANNELS;
/// Upper bound for one encoded frame
pub const MAX_FRAME_BYTES: usize = FRAME_SAMPLES * 2;
/// Playback length of one frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Default Opus bitrate (bits per second)
pub const DEFAULT_BITRATE: u32 = 64_000;

/// A fully transcoded, immutable sequence of Opus frames.
///
/// A `Sound` only exists once every frame has been encoded, so holding one
/// means it is loaded. Cloning shares the same frames.
#[derive(Debug, Clone)]
pub struct Sound {
    frames: Arc<[Bytes]>,
}

impl Sound {
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total playback length (frame count × 20 ms)
    pub fn duration(&self) -> Duration {
        FRAME_DURATION * self.frames.len() as u32
    }

    /// True when both values point at the same frame storage
    #[allow(dead_code)]
    pub fn shares_frames(&self, other: &Sound) -> bool {
        Arc::ptr_eq(&self.frames, &other.frames)
    }
}

impl From<Vec<Bytes>> for Sound {
    fn from(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

/// Write side of a [`Sound`]. Frames are appended in playback order.
#[derive(Debug, Default)]
pub struct SoundBuilder {
    frames: Vec<Bytes>,
}

impl SoundBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Bytes) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Seals the buffer. Nothing can be appended afterwards.
    pub fn finish(self) -> Sound {
        Sound::from(self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_counts_frames() {
        let sound = Sound::from(vec![Bytes::from_static(b"a"); 150]);
        assert_eq!(sound.duration(), Duration::from_secs(3));
        assert_eq!(sound.len(), 150);
    }

    #[test]
    fn test_builder_keeps_order_and_clones_share() {
        let mut builder = SoundBuilder::new();
        for i in 0..4u8 {
            builder.push(Bytes::from(vec![i]));
        }
        let sound = builder.finish();
        let order: Vec<u8> = sound.frames().iter().map(|f| f[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);

        let shared = sound.clone();
        assert!(shared.shares_frames(&sound));
        assert!(!Sound::from(vec![]).shares_frames(&sound));
    }
}
