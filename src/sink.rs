//! Data consumers for notification samples.
//!
//! The dispatch loop pushes every notification into a [`SampleSink`]. Sinks
//! are push-only: the loop never waits on them, so a sink must keep up with
//! the poll interval.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::protocol::samples::DecodedSample;
use crate::utils::hex_preview;

/// What the dispatch loop hands to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// A payload that matched its schema.
    Sample {
        /// Characteristic value handle the notification came from.
        handle: u16,
        /// The decoded sample.
        sample: DecodedSample,
        /// When the notification was delivered.
        timestamp: DateTime<Utc>,
    },
    /// A payload that did not match its schema, or came from a handle
    /// without one, passed on unmodified.
    Undecoded {
        /// Characteristic value handle the notification came from.
        handle: u16,
        /// The raw payload.
        payload: Bytes,
        /// When the notification was delivered.
        timestamp: DateTime<Utc>,
    },
}

impl SinkEvent {
    /// Handle of the characteristic that produced the event.
    pub fn handle(&self) -> u16 {
        match self {
            Self::Sample { handle, .. } | Self::Undecoded { handle, .. } => *handle,
        }
    }

    /// The decoded sample, if any.
    pub fn sample(&self) -> Option<&DecodedSample> {
        match self {
            Self::Sample { sample, .. } => Some(sample),
            Self::Undecoded { .. } => None,
        }
    }

    /// Check if the payload was passed on undecoded.
    pub fn is_undecoded(&self) -> bool {
        matches!(self, Self::Undecoded { .. })
    }
}

/// Receives decoded samples and undecoded payloads from the dispatch loop.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSink: Send {
    /// Consume one event.
    fn push(&mut self, event: SinkEvent);
}

impl<F> SampleSink for F
where
    F: FnMut(SinkEvent) + Send,
{
    fn push(&mut self, event: SinkEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SampleSink for ChannelSink {
    fn push(&mut self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("Sample receiver dropped, discarding event");
        }
    }
}

/// Keeps only the most recent event, for consumers that poll a current value.
#[derive(Debug)]
pub struct LatestValueSink {
    tx: watch::Sender<Option<SinkEvent>>,
}

impl LatestValueSink {
    /// Create a sink and a receiver observing its latest value.
    pub fn new() -> (Self, watch::Receiver<Option<SinkEvent>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Get another receiver for the latest value.
    pub fn subscribe(&self) -> watch::Receiver<Option<SinkEvent>> {
        self.tx.subscribe()
    }
}

impl SampleSink for LatestValueSink {
    fn push(&mut self, event: SinkEvent) {
        self.tx.send_replace(Some(event));
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl SampleSink for LogSink {
    fn push(&mut self, event: SinkEvent) {
        match &event {
            SinkEvent::Sample { sample, .. } => info!("{}", sample),
            SinkEvent::Undecoded {
                handle, payload, ..
            } => info!(
                "Notification received from handle {:#06x}, data: {}",
                handle,
                hex_preview(payload)
            ),
        }
    }
}
