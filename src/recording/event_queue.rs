// src/recording/event_queue.rs
//! Bounded channel between the broker client and the recorder
//!
//! The broker client's delivery loop pushes [`MessageEvent`]s; the recorder
//! pulls them in its own task. Counters are shared by both halves.

use crate::observability::EVENTS_DROPPED;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// One inbound message as delivered by the broker
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub topic: String,
    pub payload: Bytes,

    /// Stamped when the message reached this process
    pub received_at: Instant,
}

impl MessageEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::at(topic, payload, Instant::now())
    }

    pub fn at(topic: impl Into<String>, payload: impl Into<Bytes>, received_at: Instant) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

/// Create a bounded event channel
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(Counters::default());

    (
        EventSender {
            tx,
            counters: Arc::clone(&counters),
        },
        EventReceiver {
            rx,
            counters,
            capacity,
        },
    )
}

/// Producer half, cloneable
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<MessageEvent>,
    counters: Arc<Counters>,
}

impl EventSender {
    /// Push an event, waiting for room
    ///
    /// Returns the event back if the receiver is gone.
    pub async fn push(&self, event: MessageEvent) -> Result<(), MessageEvent> {
        match self.tx.send(event).await {
            Ok(()) => {
                self.counters.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendError(event)) => Err(event),
        }
    }

    /// Push without waiting; a full channel drops the event
    pub fn try_push(&self, event: MessageEvent) -> Result<(), MessageEvent> {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(EVENTS_DROPPED).increment(1);
                Err(event)
            }
            Err(mpsc::error::TrySendError::Closed(event)) => Err(event),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::collect(&self.counters, self.tx.max_capacity(), self.tx.capacity())
    }
}

/// Consumer half
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<MessageEvent>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl EventReceiver {
    /// Next event, or `None` once every sender is gone and the queue is drained
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        let event = self.rx.recv().await?;
        self.counters.popped.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Next event if one is buffered, without waiting
    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        let event = self.rx.try_recv().ok()?;
        self.counters.popped.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Stop accepting new events; buffered ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn stats(&self) -> QueueStats {
        let pushed = self.counters.pushed.load(Ordering::Relaxed);
        let popped = self.counters.popped.load(Ordering::Relaxed);
        QueueStats {
            push_count: pushed,
            pop_count: popped,
            drop_count: self.counters.dropped.load(Ordering::Relaxed),
            current_size: pushed.saturating_sub(popped) as usize,
            capacity: self.capacity,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Total events accepted
    pub push_count: u64,

    /// Total events handed to the recorder
    pub pop_count: u64,

    /// Total events dropped on a full queue
    pub drop_count: u64,

    /// Events currently buffered
    pub current_size: usize,

    pub capacity: usize,
}

impl QueueStats {
    fn collect(counters: &Counters, max_capacity: usize, free: usize) -> Self {
        Self {
            push_count: counters.pushed.load(Ordering::Relaxed),
            pop_count: counters.popped.load(Ordering::Relaxed),
            drop_count: counters.dropped.load(Ordering::Relaxed),
            current_size: max_capacity - free,
            capacity: max_capacity,
        }
    }

    /// Calculate fill percentage
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Dropped events as a percentage of all offered events
    pub fn drop_rate(&self) -> f64 {
        let offered = self.push_count + self.drop_count;
        if offered == 0 {
            0.0
        } else {
            (self.drop_count as f64 / offered as f64) * 100.0
        }
    }
}
