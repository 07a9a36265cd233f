// src/recording/recorder.rs
//! Bridges inbound broker events to a trace writer
//!
//! Events are filtered by topic and appended in arrival order. Recording
//! stops on cancellation or when the event channel closes; the trace is then
//! closed exactly once, whichever way the loop ended.

use crate::filter::TopicFilter;
use crate::observability::{FRAMES_FILTERED, FRAMES_RECORDED};
use crate::recording::event_queue::{EventReceiver, MessageEvent};
use crate::trace::TraceWriter;
use crate::utils::errors::{BagError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recorder statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderStats {
    /// Events taken off the channel
    pub received: u64,

    /// Frames appended to the trace
    pub recorded: u64,

    /// Events discarded by the topic filter
    pub filtered: u64,

    /// Events the writer refused (topic not encodable)
    pub rejected: u64,

    /// Events lost before reaching the recorder because the queue was full
    pub dropped: u64,

    /// Final trace duration in seconds
    pub duration: f64,
}

/// Records filtered events into a trace
pub struct Recorder {
    filter: TopicFilter,
    writer: TraceWriter,
    stats: RecorderStats,
}

impl Recorder {
    pub fn new(filter: TopicFilter, writer: TraceWriter) -> Self {
        Self {
            filter,
            writer,
            stats: RecorderStats::default(),
        }
    }

    /// Record until `cancel` fires or the channel closes
    ///
    /// The writer is closed before returning, also when recording failed.
    pub async fn run(
        mut self,
        mut events: EventReceiver,
        cancel: CancellationToken,
    ) -> Result<RecorderStats> {
        info!("Recording to {}", self.writer.path().display());

        let outcome = self.pump(&mut events, &cancel).await;
        events.close();

        let queue = events.stats();
        self.stats.dropped = queue.drop_count;
        info!(
            "Event queue: {} pushed, {} popped, {} dropped ({:.2}% drop rate)",
            queue.push_count,
            queue.pop_count,
            queue.drop_count,
            queue.drop_rate()
        );
        if queue.drop_count > 0 {
            warn!(
                "{} messages were dropped because recording fell behind",
                queue.drop_count
            );
        }

        let closed = self.writer.close();
        match (outcome, closed) {
            (Ok(()), Ok(header)) => {
                self.stats.duration = header.duration;
                info!(
                    "Logged {} messages ({} filtered, {} rejected)",
                    self.stats.recorded, self.stats.filtered, self.stats.rejected
                );
                Ok(self.stats)
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    error!("Failed to finalize trace after error: {}", close_err);
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
        }
    }

    async fn pump(&mut self, events: &mut EventReceiver, cancel: &CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Recording stopped");
                    return Ok(());
                }
                event = events.recv() => event,
            };

            match event {
                Some(event) => self.handle(event)?,
                None => {
                    warn!("Event channel closed, ending recording");
                    return Ok(());
                }
            }
        }
    }

    fn handle(&mut self, event: MessageEvent) -> Result<()> {
        self.stats.received += 1;

        if !self.filter.matches(&event.topic) {
            self.stats.filtered += 1;
            metrics::counter!(FRAMES_FILTERED).increment(1);
            return Ok(());
        }

        match self
            .writer
            .append(&event.topic, &event.payload, event.received_at)
        {
            Ok(offset) => {
                self.stats.recorded += 1;
                metrics::counter!(FRAMES_RECORDED).increment(1);
                debug!(
                    "Recorded {} ({} bytes) at {:.3}s",
                    event.topic,
                    event.payload.len(),
                    offset
                );
                Ok(())
            }
            Err(BagError::TopicEncoding(topic)) => {
                self.stats.rejected += 1;
                warn!("Skipping message on {:?}: topic is not ISO-8859-15", topic);
                Ok(())
            }
            Err(e) => {
                error!("Failed to record message on {}: {}", event.topic, e);
                Err(e)
            }
        }
    }

    /// Statistics so far
    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::event_queue::event_channel;
    use crate::trace::TraceReader;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_records_until_channel_closes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.mqtt");
        let recorder = Recorder::new(TopicFilter::allow_all(), TraceWriter::create(&path).unwrap());

        let (tx, rx) = event_channel(8);
        let t0 = Instant::now();
        tx.push(MessageEvent::at("a/1", "hello", t0)).await.unwrap();
        tx.push(MessageEvent::at("a/2", "world", t0 + Duration::from_millis(500)))
            .await
            .unwrap();
        tx.push(MessageEvent::at("b/1", "x", t0 + Duration::from_millis(1200)))
            .await
            .unwrap();
        drop(tx);

        let stats = recorder.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.recorded, 3);
        assert!((stats.duration - 1.2).abs() < 1e-9);

        let reader = TraceReader::open(&path).unwrap();
        assert_eq!(reader.header().frame_count, 3);
        assert!((reader.header().duration - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_filter_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.mqtt");
        let filter = TopicFilter::new(["sensors/#"], ["sensors/debug/#"]).unwrap();
        let recorder = Recorder::new(filter, TraceWriter::create(&path).unwrap());

        let (tx, rx) = event_channel(8);
        for topic in ["sensors/temp", "sensors/debug/raw", "other", "sensors/hum"] {
            tx.push(MessageEvent::new(topic, "v")).await.unwrap();
        }
        drop(tx);

        let stats = recorder.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.filtered, 2);

        let topics: Vec<String> = TraceReader::open(&path)
            .unwrap()
            .map(|f| f.unwrap().topic)
            .collect();
        assert_eq!(topics, vec!["sensors/temp", "sensors/hum"]);
    }

    #[tokio::test]
    async fn test_cancel_finalizes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.mqtt");
        let recorder = Recorder::new(TopicFilter::allow_all(), TraceWriter::create(&path).unwrap());

        let (tx, rx) = event_channel(8);
        tx.push(MessageEvent::new("a", "1")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(recorder.run(rx, cancel.clone()));

        // Let the recorder drain the queued event, then stop it while the
        // sender is still alive
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.recorded, 1);
        assert!(tx.is_closed());
        assert_eq!(TraceReader::open(&path).unwrap().header().frame_count, 1);
    }

    #[tokio::test]
    async fn test_unencodable_topic_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.mqtt");
        let recorder = Recorder::new(TopicFilter::allow_all(), TraceWriter::create(&path).unwrap());

        let (tx, rx) = event_channel(8);
        tx.push(MessageEvent::new("房间/温度", "21")).await.unwrap();
        tx.push(MessageEvent::new("room/temp", "21")).await.unwrap();
        drop(tx);

        let stats = recorder.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.recorded, 1);
    }

    #[tokio::test]
    async fn test_dropped_events_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.mqtt");
        let recorder = Recorder::new(TopicFilter::allow_all(), TraceWriter::create(&path).unwrap());

        let (tx, rx) = event_channel(2);
        for i in 0..3 {
            let _ = tx.try_push(MessageEvent::new("a", format!("{}", i)));
        }
        drop(tx);

        let stats = recorder.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(TraceReader::open(&path).unwrap().header().frame_count, 2);
    }

    #[tokio::test]
    async fn test_empty_recording() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.mqtt");
        let recorder = Recorder::new(TopicFilter::allow_all(), TraceWriter::create(&path).unwrap());

        let (tx, rx) = event_channel(8);
        drop(tx);

        let stats = recorder.run(rx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats, RecorderStats::default());

        let header = TraceReader::open(&path).unwrap().header();
        assert_eq!(header.frame_count, 0);
        assert_eq!(header.duration, 0.0);
    }
}
