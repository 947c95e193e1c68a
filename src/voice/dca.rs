//! Live DCA stream built from Opus frames as they arrive.
//!
//! Layout: `DCA1`, i32 LE metadata length, JSON metadata, then for every
//! frame an i16 LE length followed by the Opus packet. songbird probes this
//! container and passes the packets through without re-encoding.

use bytes::Bytes;
use flume::Receiver;
use serde_json::json;
use songbird::input::{AudioStream, Input, LiveInput};
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::{io::MediaSource, probe::Hint};

use crate::audio::sound::{CHANNELS, FRAME_SIZE, SAMPLE_RATE};

const MAGIC: &[u8; 4] = b"DCA1";

/// Header bytes for a stream of 48 kHz stereo frames at `bitrate`.
pub fn header(bitrate: u32) -> Vec<u8> {
    let metadata = json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SIZE,
            "abr": bitrate,
            "vbr": true,
            "channels": CHANNELS,
        },
        "info": null,
        "origin": null,
        "extra": null,
    })
    .to_string()
    .into_bytes();

    let mut out = Vec::with_capacity(8 + metadata.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    out.extend_from_slice(&metadata);
    out
}

/// Blocking reader over a frame channel. Ends when every sender is dropped.
pub struct FrameFeed {
    frames: Receiver<Bytes>,
    pending: Vec<u8>,
    cursor: usize,
}

impl FrameFeed {
    pub fn new(frames: Receiver<Bytes>, bitrate: u32) -> Self {
        Self {
            frames,
            pending: header(bitrate),
            cursor: 0,
        }
    }

    fn refill(&mut self) -> io::Result<bool> {
        let Ok(frame) = self.frames.recv() else {
            return Ok(false);
        };
        let len = i16::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "opus frame too large"))?;

        self.pending.clear();
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending.extend_from_slice(&frame);
        self.cursor = 0;
        Ok(true)
    }
}

impl Read for FrameFeed {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.cursor >= self.pending.len() && !self.refill()? {
            return Ok(0);
        }

        let available = &self.pending[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

impl Seek for FrameFeed {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live frame feed is not seekable",
        ))
    }
}

impl MediaSource for FrameFeed {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Wraps a frame channel as a songbird input.
pub fn live_input(frames: Receiver<Bytes>, bitrate: u32) -> Input {
    let mut hint = Hint::new();
    hint.with_extension("dca");

    let source: Box<dyn MediaSource> = Box::new(FrameFeed::new(frames, bitrate));
    Input::Live(
        LiveInput::Raw(AudioStream {
            input: source,
            hint: Some(hint),
        }),
        None,
    )
}
