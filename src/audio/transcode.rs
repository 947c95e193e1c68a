//! Media → Opus frame conversion.
//!
//! The decode stage reads raw interleaved s16le PCM one frame at a time and
//! hands each chunk over a bounded flume channel to the encode stage, which
//! compresses chunks in arrival order. The buffer is only sealed after the
//! decode side has closed the channel and the encode task has drained and
//! returned.

use async_trait::async_trait;
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{path::Path, process::Stdio, str::FromStr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, ChildStdout, Command},
    sync::Semaphore,
};
use tracing::{debug, info, warn};

use super::sound::{Sound, SoundBuilder, CHANNELS, FRAME_SAMPLES, MAX_FRAME_BYTES, SAMPLE_RATE};
use crate::error::TranscodeError;

/// Signal-vs-music tuning of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderProfile {
    Music,
    Voice,
}

impl FromStr for EncoderProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "music" | "audio" => Ok(Self::Music),
            "voice" | "voip" => Ok(Self::Voice),
            other => anyhow::bail!("unknown encoder profile `{}` (expected music or voice)", other),
        }
    }
}

impl From<EncoderProfile> for Application {
    fn from(profile: EncoderProfile) -> Self {
        match profile {
            EncoderProfile::Music => Application::Audio,
            EncoderProfile::Voice => Application::Voip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub bitrate: u32,
    pub profile: EncoderProfile,
    /// Raw chunks allowed in flight between decode and encode
    pub handoff_capacity: usize,
    /// Transcode jobs allowed to run at once
    pub max_concurrent: usize,
}

/// Source of raw PCM chunks, each exactly [`FRAME_SAMPLES`] long.
#[async_trait]
pub trait PcmSource: Send {
    /// Next full chunk, or `None` at end of input.
    async fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, TranscodeError>;

    /// Called once after the last chunk was read.
    async fn finish(&mut self) -> Result<(), TranscodeError> {
        Ok(())
    }
}

/// Compresses one PCM chunk into one frame.
pub trait FrameEncoder: Send + 'static {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, TranscodeError>;
}

/// Reads little-endian interleaved i16 samples from any async byte stream.
pub struct PcmReader<R> {
    reader: R,
    bytes: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> PcmReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            bytes: vec![0; FRAME_SAMPLES * 2],
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> PcmSource for PcmReader<R> {
    async fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, TranscodeError> {
        match self.reader.read_exact(&mut self.bytes).await {
            Ok(_) => Ok(Some(
                self.bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            )),
            // A short trailing chunk is end of input, not an error
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(TranscodeError::Read(e)),
        }
    }
}

/// ffmpeg child process decoding a local file to 48 kHz stereo s16le.
pub struct FfmpegDecoder {
    child: Child,
    pcm: PcmReader<ChildStdout>,
}

impl FfmpegDecoder {
    pub fn spawn(path: &Path) -> Result<Self, TranscodeError> {
        let mut child = Command::new("ffmpeg")
            .arg("-i")
            .arg(path)
            .args(["-loglevel", "error", "-f", "s16le"])
            .arg("-ar")
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::DecoderStart)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TranscodeError::DecoderStart(std::io::Error::other("ffmpeg stdout not captured"))
        })?;

        Ok(Self {
            child,
            pcm: PcmReader::new(stdout),
        })
    }
}

#[async_trait]
impl PcmSource for FfmpegDecoder {
    async fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, TranscodeError> {
        self.pcm.read_chunk().await
    }

    async fn finish(&mut self) -> Result<(), TranscodeError> {
        let status = self.child.wait().await.map_err(TranscodeError::Read)?;
        if status.success() {
            Ok(())
        } else {
            Err(TranscodeError::DecoderExit(status))
        }
    }
}

/// libopus encoder producing one packet per 20 ms chunk.
pub struct OpusFrameEncoder {
    encoder: Encoder,
    out: Vec<u8>,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32, profile: EncoderProfile) -> Result<Self, TranscodeError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, profile.into())?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))?;
        Ok(Self {
            encoder,
            out: vec![0; MAX_FRAME_BYTES],
        })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, TranscodeError> {
        let len = self.encoder.encode(pcm, &mut self.out)?;
        Ok(Bytes::copy_from_slice(&self.out[..len]))
    }
}

/// Runs the decode and encode stages against each other and returns the sealed sound.
pub async fn run_pipeline<S, E>(
    mut source: S,
    mut encoder: E,
    handoff_capacity: usize,
) -> Result<Sound, TranscodeError>
where
    S: PcmSource,
    E: FrameEncoder,
{
    let (tx, rx) = flume::bounded::<Vec<i16>>(handoff_capacity.max(1));

    // libopus is CPU-bound, so encoding stays off the async workers
    let encode_stage = tokio::task::spawn_blocking(move || {
        let mut builder = SoundBuilder::new();
        while let Ok(pcm) = rx.recv() {
            builder.push(encoder.encode(&pcm)?);
        }
        Ok::<_, TranscodeError>(builder)
    });

    let decoded = decode_into(&mut source, &tx).await;
    // Closing the handoff is what lets the encode stage terminate
    drop(tx);
    let encoded = encode_stage.await?;

    let chunks = decoded?;
    let builder = encoded?;
    source.finish().await?;

    debug!("🎚️ Transcoded {} chunks into {} frames", chunks, builder.len());
    Ok(builder.finish())
}

async fn decode_into<S: PcmSource>(
    source: &mut S,
    tx: &flume::Sender<Vec<i16>>,
) -> Result<usize, TranscodeError> {
    let mut chunks = 0;
    while let Some(pcm) = source.read_chunk().await? {
        if tx.send_async(pcm).await.is_err() {
            // Encode stage is gone; its error is reported when it is joined
            break;
        }
        chunks += 1;
    }
    Ok(chunks)
}

/// Entry point used by the command layer: local file in, sound out.
#[derive(Clone)]
pub struct Transcoder {
    settings: TranscodeSettings,
    permits: Arc<Semaphore>,
}

impl Transcoder {
    pub fn new(settings: TranscodeSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self { settings, permits }
    }

    pub async fn transcode_file(&self, path: &Path) -> Result<Sound, TranscodeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TranscodeError::Closed)?;

        info!("🎛️ Transcoding {}", path.display());
        let decoder = FfmpegDecoder::spawn(path)?;
        let encoder = OpusFrameEncoder::new(self.settings.bitrate, self.settings.profile)?;

        match run_pipeline(decoder, encoder, self.settings.handoff_capacity).await {
            Ok(sound) => {
                info!(
                    "✅ Transcoded {} ({} frames, {:?})",
                    path.display(),
                    sound.len(),
                    sound.duration()
                );
                Ok(sound)
            }
            Err(e) => {
                warn!("❌ Transcode of {} failed: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sound::FRAME_DURATION;
    use std::time::Duration;

    /// Emits the chunk's first sample and its position so order can be checked.
    struct TaggingEncoder {
        count: u32,
    }

    impl FrameEncoder for TaggingEncoder {
        fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, TranscodeError> {
            assert_eq!(pcm.len(), FRAME_SAMPLES);
            self.count += 1;
            let mut frame = self.count.to_le_bytes().to_vec();
            frame.extend_from_slice(&pcm[0].to_le_bytes());
            Ok(Bytes::from(frame))
        }
    }

    /// Remembers which thread each chunk was encoded on.
    struct ThreadRecordingEncoder {
        threads: Arc<std::sync::Mutex<Vec<std::thread::ThreadId>>>,
    }

    impl FrameEncoder for ThreadRecordingEncoder {
        fn encode(&mut self, _pcm: &[i16]) -> Result<Bytes, TranscodeError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(Bytes::from_static(&[0]))
        }
    }

    struct FailingEncoder;

    impl FrameEncoder for FailingEncoder {
        fn encode(&mut self, _pcm: &[i16]) -> Result<Bytes, TranscodeError> {
            Err(TranscodeError::Encoder("boom".into()))
        }
    }

    /// Yields `good` chunks then a read error.
    struct BrokenSource {
        good: usize,
    }

    #[async_trait]
    impl PcmSource for BrokenSource {
        async fn read_chunk(&mut self) -> Result<Option<Vec<i16>>, TranscodeError> {
            if self.good == 0 {
                return Err(TranscodeError::Read(std::io::Error::other("pipe broke")));
            }
            self.good -= 1;
            Ok(Some(vec![0; FRAME_SAMPLES]))
        }
    }

    fn silence(duration: Duration) -> Vec<u8> {
        let samples = (duration.as_secs_f64() * SAMPLE_RATE as f64) as usize * CHANNELS;
        vec![0; samples * 2]
    }

    #[tokio::test]
    async fn test_silent_input_duration_matches() {
        let source_duration = Duration::from_millis(2_510);
        let bytes = silence(source_duration);

        let sound = run_pipeline(
            PcmReader::new(bytes.as_slice()),
            TaggingEncoder { count: 0 },
            4,
        )
        .await
        .unwrap();

        let diff = if sound.duration() > source_duration {
            sound.duration() - source_duration
        } else {
            source_duration - sound.duration()
        };
        assert!(diff <= FRAME_DURATION, "off by {:?}", diff);
        assert_eq!(sound.len(), 125);
    }

    #[tokio::test]
    async fn test_frames_keep_source_order() {
        let mut bytes = Vec::new();
        for marker in 0..10i16 {
            for _ in 0..FRAME_SAMPLES {
                bytes.extend_from_slice(&marker.to_le_bytes());
            }
        }

        let sound = run_pipeline(PcmReader::new(bytes.as_slice()), TaggingEncoder { count: 0 }, 2)
            .await
            .unwrap();

        let markers: Vec<i16> = sound
            .frames()
            .iter()
            .map(|f| i16::from_le_bytes([f[4], f[5]]))
            .collect();
        assert_eq!(markers, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_short_trailing_chunk_is_end_of_input() {
        let mut bytes = vec![0u8; FRAME_SAMPLES * 2 * 3];
        bytes.extend_from_slice(&[1u8; 100]);

        let sound = run_pipeline(PcmReader::new(bytes.as_slice()), TaggingEncoder { count: 0 }, 1)
            .await
            .unwrap();
        assert_eq!(sound.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_input_gives_empty_sound() {
        let sound = run_pipeline(PcmReader::new(&b""[..]), TaggingEncoder { count: 0 }, 1)
            .await
            .unwrap();
        assert!(sound.is_empty());
    }

    #[tokio::test]
    async fn test_encoding_runs_off_the_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let threads = Arc::new(std::sync::Mutex::new(Vec::new()));
        let bytes = vec![0u8; FRAME_SAMPLES * 2 * 4];

        let sound = run_pipeline(
            PcmReader::new(bytes.as_slice()),
            ThreadRecordingEncoder {
                threads: threads.clone(),
            },
            2,
        )
        .await
        .unwrap();

        assert_eq!(sound.len(), 4);
        let threads = threads.lock().unwrap();
        assert_eq!(threads.len(), 4);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let result = run_pipeline(BrokenSource { good: 5 }, TaggingEncoder { count: 0 }, 2).await;
        assert!(matches!(result, Err(TranscodeError::Read(_))));
    }

    #[tokio::test]
    async fn test_encoder_failure_is_fatal() {
        let bytes = silence(Duration::from_secs(1));
        let result = run_pipeline(PcmReader::new(bytes.as_slice()), FailingEncoder, 2).await;
        assert!(matches!(result, Err(TranscodeError::Encoder(_))));
    }

    #[tokio::test]
    async fn test_opus_encodes_silence() {
        let bytes = silence(Duration::from_secs(1));
        let encoder = OpusFrameEncoder::new(64_000, EncoderProfile::Music).unwrap();

        let sound = run_pipeline(PcmReader::new(bytes.as_slice()), encoder, 8)
            .await
            .unwrap();

        assert_eq!(sound.len(), 50);
        assert!(sound
            .frames()
            .iter()
            .all(|f| !f.is_empty() && f.len() <= MAX_FRAME_BYTES));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("Music".parse::<EncoderProfile>().unwrap(), EncoderProfile::Music);
        assert_eq!("voip".parse::<EncoderProfile>().unwrap(), EncoderProfile::Voice);
        assert!("loud".parse::<EncoderProfile>().is_err());
    }
}
