use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{queue::Play, signal::SkipSignal, sound::FRAME_DURATION};
use crate::{error::SendError, voice::VoiceSink};

/// Delays the voice gateway needs around the start of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTiming {
    /// Wait after moving to another channel
    pub settle_delay: Duration,
    /// Wait before the first frame
    pub preroll_delay: Duration,
    /// Pace between frames
    pub frame_interval: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(125),
            preroll_delay: Duration::from_millis(32),
            frame_interval: FRAME_DURATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every frame was sent
    Completed { frames: usize },
    /// A skip was observed before the frame at index `frames`
    Skipped { frames: usize },
    /// The session is shutting down
    Cancelled { frames: usize },
}

/// Paces one play's frames into a sink.
pub struct FrameStreamer<'a> {
    timing: StreamTiming,
    skip: &'a SkipSignal,
    cancel: &'a CancellationToken,
}

impl<'a> FrameStreamer<'a> {
    pub fn new(timing: StreamTiming, skip: &'a SkipSignal, cancel: &'a CancellationToken) -> Self {
        Self {
            timing,
            skip,
            cancel,
        }
    }

    pub async fn stream(
        &self,
        sink: &mut dyn VoiceSink,
        play: &Play,
    ) -> Result<StreamOutcome, SendError> {
        if sink.channel_id() != play.channel_id {
            sink.change_channel(play.channel_id)
                .await
                .map_err(|source| SendError::ChannelChange {
                    channel: play.channel_id,
                    source,
                })?;
            time::sleep(self.timing.settle_delay).await;
        }
        time::sleep(self.timing.preroll_delay).await;

        sink.set_speaking(true).await;
        let result = self.send_frames(sink, play).await;
        sink.set_speaking(false).await;
        result
    }

    async fn send_frames(
        &self,
        sink: &mut dyn VoiceSink,
        play: &Play,
    ) -> Result<StreamOutcome, SendError> {
        let mut ticker = time::interval(self.timing.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for (sent, frame) in play.sound.frames().iter().enumerate() {
            ticker.tick().await;

            if self.cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled { frames: sent });
            }
            if self.skip.take() {
                debug!("⏭️ Skip observed in guild {} after {} frames", play.guild_id, sent);
                return Ok(StreamOutcome::Skipped { frames: sent });
            }

            sink.send_frame(frame.clone()).await?;
        }

        Ok(StreamOutcome::Completed {
            frames: play.sound.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::queue::tests::tagged_play,
        voice::{
            testing::{RecordingConnector, SinkEvent},
            VoiceConnector,
        },
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, GuildId};
    use tokio::time::Instant;

    async fn sink_in(connector: &RecordingConnector, channel: u64) -> Box<dyn VoiceSink> {
        connector
            .join(GuildId::new(1), ChannelId::new(channel))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_all_frames_with_pacing() {
        let connector = RecordingConnector::new();
        let mut sink = sink_in(&connector, 10).await;
        let skip = SkipSignal::new();
        let cancel = CancellationToken::new();
        let streamer = FrameStreamer::new(StreamTiming::default(), &skip, &cancel);

        let started = Instant::now();
        let outcome = streamer
            .stream(sink.as_mut(), &tagged_play(1, 10, 1, 5))
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { frames: 5 });
        // preroll + four frame intervals after the first immediate tick
        assert_eq!(started.elapsed(), Duration::from_millis(32 + 4 * 20));

        let events = connector.events();
        assert_eq!(events.first(), Some(&SinkEvent::Joined(GuildId::new(1), ChannelId::new(10))));
        assert_eq!(events[1], SinkEvent::Speaking(true));
        assert_eq!(events.last(), Some(&SinkEvent::Speaking(false)));
        assert_eq!(connector.frames_per_tag(), vec![(1, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_change_settles_first() {
        let connector = RecordingConnector::new();
        let mut sink = sink_in(&connector, 10).await;
        let skip = SkipSignal::new();
        let cancel = CancellationToken::new();
        let streamer = FrameStreamer::new(StreamTiming::default(), &skip, &cancel);

        let started = Instant::now();
        streamer
            .stream(sink.as_mut(), &tagged_play(1, 20, 1, 1))
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(125 + 32));
        assert_eq!(sink.channel_id(), ChannelId::new(20));
        assert_eq!(connector.events()[1], SinkEvent::ChangedChannel(ChannelId::new(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_skip_stops_before_first_frame() {
        let connector = RecordingConnector::new();
        let mut sink = sink_in(&connector, 10).await;
        let skip = SkipSignal::new();
        let cancel = CancellationToken::new();
        skip.trigger();

        let outcome = FrameStreamer::new(StreamTiming::default(), &skip, &cancel)
            .stream(sink.as_mut(), &tagged_play(1, 10, 1, 5))
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Skipped { frames: 0 });
        assert!(connector.frames().is_empty());
        assert!(!skip.is_pending());
        assert_eq!(connector.events().last(), Some(&SinkEvent::Speaking(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_mid_stream() {
        let connector = RecordingConnector::new();
        let mut sink = sink_in(&connector, 10).await;
        let skip = SkipSignal::new();
        let cancel = CancellationToken::new();

        let trigger = skip.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(32 + 95)).await;
            trigger.trigger();
        });

        let outcome = FrameStreamer::new(StreamTiming::default(), &skip, &cancel)
            .stream(sink.as_mut(), &tagged_play(1, 10, 1, 50))
            .await
            .unwrap();

        // frames go out at 32, 52, 72, 92, 112 ms; the skip lands at 127
        assert_eq!(outcome, StreamOutcome::Skipped { frames: 5 });
        assert_eq!(connector.frames().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_clears_speaking() {
        let connector = RecordingConnector::failing_sends_after(2);
        let mut sink = sink_in(&connector, 10).await;
        let skip = SkipSignal::new();
        let cancel = CancellationToken::new();

        let result = FrameStreamer::new(StreamTiming::default(), &skip, &cancel)
            .stream(sink.as_mut(), &tagged_play(1, 10, 1, 5))
            .await;

        assert!(matches!(result, Err(SendError::Closed)));
        assert_eq!(connector.frames().len(), 2);
        assert_eq!(connector.events().last(), Some(&SinkEvent::Speaking(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_stream() {
        let connector = RecordingConnector::new();
        let mut sink = sink_in(&connector, 10).await;
        let skip = SkipSignal::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = FrameStreamer::new(StreamTiming::default(), &skip, &cancel)
            .stream(sink.as_mut(), &tagged_play(1, 10, 1, 5))
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled { frames: 0 });
    }
}
