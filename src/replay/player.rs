// src/replay/player.rs
//! Timing-faithful trace playback
//!
//! Every frame is published at `playback_start + frame.offset`. Deadlines are
//! always computed from the fixed start instant, so publish latency and
//! per-frame processing never accumulate into drift. Waiting is done in
//! short slices raced against the cancellation token.

use crate::filter::TopicFilter;
use crate::observability::{FRAMES_PUBLISHED, FRAMES_SKIPPED, PLAYBACK_LOOPS};
use crate::replay::info::format_duration;
use crate::replay::publisher::Publisher;
use crate::trace::TraceReader;
use crate::utils::config::PlayerConfig;
use crate::utils::errors::{FormatError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Playback state machine
///
/// `Idle → Playing → EndOfTrace → (Playing | Stopped)`; cancellation moves
/// to `Stopped` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    EndOfTrace,
    Stopped,
}

/// Player settings
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// Start over from the first frame at the end of the trace
    pub loop_playback: bool,

    /// Suppress progress lines
    pub quiet: bool,

    /// Longest uninterrupted sleep while waiting for a deadline
    pub poll_interval: Duration,

    /// Minimum spacing between progress lines
    pub progress_interval: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self::from_config(&PlayerConfig::default(), false, false)
    }
}

impl PlayerSettings {
    pub fn from_config(config: &PlayerConfig, loop_playback: bool, quiet: bool) -> Self {
        Self {
            loop_playback,
            quiet,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        }
    }

    pub fn with_loop(mut self) -> Self {
        self.loop_playback = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Frames handed to the publisher
    pub published: u64,

    /// Frames skipped by the topic filter
    pub skipped: u64,

    /// Restarts from the first frame
    pub loops: u64,
}

/// Replays a trace through a [`Publisher`]
pub struct Player<P> {
    publisher: P,
    filter: TopicFilter,
    settings: PlayerSettings,
    state: PlayerState,
    stats: PlaybackStats,
    last_progress: Option<Instant>,
}

impl<P: Publisher> Player<P> {
    pub fn new(publisher: P, filter: TopicFilter, settings: PlayerSettings) -> Self {
        Self {
            publisher,
            filter,
            settings,
            state: PlayerState::Idle,
            stats: PlaybackStats::default(),
            last_progress: None,
        }
    }

    /// Play `reader` until the end of the trace (or forever when looping)
    /// or until `cancel` fires
    ///
    /// The player is `Stopped` when this returns, whatever the outcome.
    pub async fn run(
        &mut self,
        reader: &mut TraceReader,
        cancel: &CancellationToken,
    ) -> Result<PlaybackStats> {
        let result = self.play(reader, cancel).await;
        self.state = PlayerState::Stopped;

        match result {
            Ok(()) => {
                info!(
                    "Playback finished: {} published, {} skipped, {} loops",
                    self.stats.published, self.stats.skipped, self.stats.loops
                );
                Ok(self.stats.clone())
            }
            Err(e) => {
                error!("Playback failed: {}", e);
                Err(e)
            }
        }
    }

    async fn play(&mut self, reader: &mut TraceReader, cancel: &CancellationToken) -> Result<()> {
        let header = reader.header();
        info!(
            "Playing {} ({} messages, {})",
            reader.path().display(),
            header.frame_count,
            format_duration(header.duration)
        );

        self.state = PlayerState::Playing;
        let mut playback_start = Instant::now();
        let mut published_this_pass = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!("Playback cancelled");
                return Ok(());
            }

            let Some(frame) = reader.next_frame()? else {
                self.state = PlayerState::EndOfTrace;

                if !self.settings.loop_playback {
                    info!("End of trace");
                    return Ok(());
                }
                if published_this_pass == 0 {
                    warn!("No frames passed the topic filter, not looping");
                    return Ok(());
                }

                reader.restart();
                playback_start = Instant::now();
                published_this_pass = 0;
                self.stats.loops += 1;
                metrics::counter!(PLAYBACK_LOOPS).increment(1);
                self.state = PlayerState::Playing;
                debug!("Restarting playback (loop {})", self.stats.loops);
                continue;
            };

            if !self.filter.matches(&frame.topic) {
                self.stats.skipped += 1;
                metrics::counter!(FRAMES_SKIPPED).increment(1);
                continue;
            }

            let deadline = playback_start
                .checked_add(frame.offset_duration())
                .ok_or(FormatError::OffsetOutOfRange {
                    index: reader.frames_read().saturating_sub(1),
                    offset: frame.offset,
                })?;
            if !self
                .wait_until(deadline, playback_start, header.duration, cancel)
                .await
            {
                info!("Playback cancelled");
                return Ok(());
            }

            debug!(
                "Publishing {} ({} bytes) at {:.3}s",
                frame.topic,
                frame.payload.len(),
                frame.offset
            );
            self.publisher.publish(&frame.topic, frame.payload).await?;

            self.stats.published += 1;
            published_this_pass += 1;
            metrics::counter!(FRAMES_PUBLISHED).increment(1);
        }
    }

    /// Sleep until `deadline` in cancellable slices
    ///
    /// Returns false if cancelled first.
    async fn wait_until(
        &mut self,
        deadline: Instant,
        playback_start: Instant,
        total_secs: f64,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            if !self.settings.quiet {
                self.report_progress(now, playback_start, total_secs);
            }

            let wake = deadline.min(now + self.settings.poll_interval);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn report_progress(&mut self, now: Instant, playback_start: Instant, total_secs: f64) {
        if let Some(last) = self.last_progress {
            if now.duration_since(last) < self.settings.progress_interval {
                return;
            }
        }
        self.last_progress = Some(now);

        let elapsed = now.duration_since(playback_start).as_secs_f64();
        let percent = if total_secs > 0.0 {
            (elapsed * 100.0 / total_secs).min(100.0)
        } else {
            100.0
        };

        info!(
            "{} of {} ({:.2} %)",
            format_duration(elapsed),
            format_duration(total_secs),
            percent
        );
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn into_publisher(self) -> P {
        self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::format::encode_frame;
    use crate::trace::TraceWriter;
    use crate::utils::errors::BagError;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use tempfile::{tempdir, TempDir};

    /// Captures the instant each publish call was issued
    #[derive(Default)]
    struct CapturePublisher {
        published: Mutex<Vec<(Instant, String, Bytes)>>,
        latency: Duration,
    }

    impl CapturePublisher {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Default::default()
            }
        }

        /// Publish times in milliseconds since `t0`
        fn times_ms(&self, t0: Instant) -> Vec<u128> {
            self.published
                .lock()
                .iter()
                .map(|(at, _, _)| at.duration_since(t0).as_millis())
                .collect()
        }

        fn topics(&self) -> Vec<String> {
            self.published.lock().iter().map(|(_, t, _)| t.clone()).collect()
        }
    }

    impl Publisher for CapturePublisher {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
            self.published
                .lock()
                .push((Instant::now(), topic.to_string(), payload));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(())
        }
    }

    struct FailingPublisher;

    impl Publisher for FailingPublisher {
        async fn publish(&self, topic: &str, _payload: Bytes) -> Result<()> {
            Err(BagError::Publish(format!("broker rejected {}", topic)))
        }
    }

    fn write_trace(frames: &[(&str, f64)]) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("play.mqtt");
        let writer = TraceWriter::create(&path).unwrap();
        let t0 = std::time::Instant::now();
        for (topic, offset) in frames {
            writer
                .append(topic, b"payload", t0 + Duration::from_secs_f64(*offset))
                .unwrap();
        }
        writer.close().unwrap();
        (dir, path)
    }

    fn open(path: &Path) -> TraceReader {
        TraceReader::open(path).unwrap()
    }

    fn assert_near(actual: &[u128], expected: &[u128]) {
        assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
        for (a, e) in actual.iter().zip(expected) {
            assert!(a.abs_diff(*e) <= 2, "{:?} vs {:?}", actual, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_at_recorded_offsets() {
        let (_dir, path) = write_trace(&[("a/1", 0.0), ("a/2", 0.5), ("b/1", 1.2)]);
        let mut reader = open(&path);

        // Publish latency must not push later frames back
        let publisher = CapturePublisher::with_latency(Duration::from_millis(30));
        let mut player = Player::new(&publisher, TopicFilter::allow_all(), PlayerSettings::default());

        let t0 = Instant::now();
        let stats = player.run(&mut reader, &CancellationToken::new()).await.unwrap();

        assert_eq!(stats.published, 3);
        assert_near(&publisher.times_ms(t0), &[0, 500, 1200]);
        assert_near(&[t0.elapsed().as_millis()], &[1230]);
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_frames_consume_no_time() {
        let (_dir, path) = write_trace(&[("a/1", 0.0), ("a/2", 0.5), ("b/1", 1.2)]);
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let filter = TopicFilter::new(["a/#"], Vec::<String>::new()).unwrap();
        let mut player = Player::new(&publisher, filter, PlayerSettings::default().quiet());

        let t0 = Instant::now();
        let stats = player.run(&mut reader, &CancellationToken::new()).await.unwrap();

        assert_eq!(stats.published, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(publisher.topics(), vec!["a/1", "a/2"]);
        assert_near(&publisher.times_ms(t0), &[0, 500]);
        assert!(t0.elapsed() < Duration::from_millis(510));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_resets_start() {
        let (_dir, path) = write_trace(&[("a", 0.0), ("b", 0.3)]);
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let mut player = Player::new(
            &publisher,
            TopicFilter::allow_all(),
            PlayerSettings::default().with_loop(),
        );

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.cancel();
        });

        let t0 = Instant::now();
        let stats = player.run(&mut reader, &cancel).await.unwrap();

        // Each pass starts where the previous one ended, not at t0 + n * 0.3
        assert_near(&publisher.times_ms(t0), &[0, 300, 300, 600, 600, 900, 900]);
        assert_eq!(stats.loops, 3);
        assert_eq!(publisher.topics()[..4], ["a", "b", "a", "b"]);
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_long_wait() {
        let (_dir, path) = write_trace(&[("a", 0.0), ("b", 3600.0)]);
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let mut player = Player::new(&publisher, TopicFilter::allow_all(), PlayerSettings::default());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let t0 = Instant::now();
        let stats = player.run(&mut reader, &cancel).await.unwrap();

        assert_eq!(stats.published, 1);
        assert!(t0.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_with_nothing_to_play_stops() {
        let (_dir, path) = write_trace(&[("a", 0.0), ("b", 0.1)]);
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let filter = TopicFilter::new(Vec::<String>::new(), ["#"]).unwrap();
        let mut player = Player::new(&publisher, filter, PlayerSettings::default().with_loop());

        let stats = player.run(&mut reader, &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.loops, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let (_dir, path) = write_trace(&[("a", 0.0)]);
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let mut player = Player::new(&publisher, TopicFilter::allow_all(), PlayerSettings::default());
        assert_eq!(player.state(), PlayerState::Idle);

        player.run(&mut reader, &CancellationToken::new()).await.unwrap();
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_error_stops_playback() {
        let (_dir, path) = write_trace(&[("a", 0.0), ("b", 0.1)]);
        let mut reader = open(&path);

        let mut player = Player::new(FailingPublisher, TopicFilter::allow_all(), PlayerSettings::default());
        let result = player.run(&mut reader, &CancellationToken::new()).await;

        assert!(matches!(result, Err(BagError::Publish(_))));
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_past_clock_range_is_an_error() {
        // Fits a Duration, but not an Instant offset from now
        let dir = tempdir().unwrap();
        let path = dir.path().join("far.mqtt");
        let mut bytes = crate::trace::TraceHeader {
            frame_count: 2,
            duration: 1.8e19,
        }
        .encode()
        .to_vec();
        encode_frame(&mut bytes, 0.0, b"a", b"1").unwrap();
        encode_frame(&mut bytes, 1.8e19, b"b", b"2").unwrap();
        std::fs::write(&path, &bytes).unwrap();
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let mut player = Player::new(&publisher, TopicFilter::allow_all(), PlayerSettings::default());
        let err = player
            .run(&mut reader, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BagError::Format(FormatError::OffsetOutOfRange { index: 1, .. })
        ));
        assert_eq!(publisher.topics(), vec!["a"]);
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_trace_surfaces_format_error() {
        let (_dir, path) = write_trace(&[("a", 0.0), ("b", 0.1)]);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        let mut reader = open(&path);

        let publisher = CapturePublisher::default();
        let mut player = Player::new(&publisher, TopicFilter::allow_all(), PlayerSettings::default());
        let err = player
            .run(&mut reader, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_format());
        assert_eq!(publisher.topics(), vec!["a"]);
    }
}
