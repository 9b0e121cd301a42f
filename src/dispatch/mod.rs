//! Notification dispatch loop.
//!
//! Once notifications are enabled the session sits in a single `Listening`
//! state: each iteration makes exactly one bounded wait on the stack, hands
//! any notification to the sink, then lets the [`RateSchedule`] issue its
//! configuration write before the next wait begins.

pub mod schedule;

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::ble::connection::Connection;
use crate::ble::services::{CharacteristicRef, ServiceTree};
use crate::ble::stack::{BleStack, NotificationEvent, StackError};
use crate::ble::writer::AttributeWriter;
use crate::error::{Error, Result};
use crate::protocol::samples::SampleSchema;
use crate::shutdown::ShutdownSignal;
use crate::sink::{SampleSink, SinkEvent};
use crate::utils::hex_preview;

pub use schedule::{RateSchedule, ScheduleCursor, ScheduleMode, ScheduledWrite, TriggerCounter};

/// Default bound on a single wait for notifications.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Counters of one dispatch loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopStats {
    /// Completed poll waits, with or without a notification.
    pub iterations: u64,
    /// Notifications delivered.
    pub events: u64,
    /// Notifications forwarded as decoded samples.
    pub decoded: u64,
    /// Notifications forwarded undecoded.
    pub undecoded: u64,
    /// Scheduled writes that succeeded.
    pub writes: u64,
    /// Scheduled writes that failed without ending the loop.
    pub write_failures: u64,
}

/// Why the dispatch loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoopExit {
    /// The shutdown signal fired.
    Cancelled,
    /// The configured iteration bound was reached.
    Completed,
}

/// The receive loop of a session.
pub struct DispatchLoop<'a, S: ?Sized> {
    stack: &'a S,
    tree: &'a ServiceTree,
    connection: &'a Connection,
    schemas: HashMap<u16, SampleSchema>,
    schedule: RateSchedule,
    config_char: Option<CharacteristicRef>,
    write_with_response: bool,
    poll_interval: Duration,
    max_iterations: Option<u64>,
}

impl<'a, S: BleStack + ?Sized> DispatchLoop<'a, S> {
    /// Create a loop over a resolved, subscribed connection.
    pub fn new(stack: &'a S, tree: &'a ServiceTree, connection: &'a Connection) -> Self {
        Self {
            stack,
            tree,
            connection,
            schemas: HashMap::new(),
            schedule: RateSchedule::default(),
            config_char: None,
            write_with_response: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_iterations: None,
        }
    }

    /// Decode notifications from `handle` with `schema`.
    ///
    /// Notifications from handles without a schema are forwarded undecoded.
    pub fn register_schema(mut self, handle: u16, schema: SampleSchema) -> Self {
        self.schemas.insert(handle, schema);
        self
    }

    /// Issue `schedule` writes to `config_char`.
    pub fn with_schedule(mut self, schedule: RateSchedule, config_char: CharacteristicRef) -> Self {
        self.schedule = schedule;
        self.config_char = Some(config_char);
        self
    }

    /// Use acknowledged writes for scheduled commands.
    pub fn with_write_response(mut self, with_response: bool) -> Self {
        self.write_with_response = with_response;
        self
    }

    /// Bound each wait for notifications.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Stop normally after this many iterations.
    pub fn with_max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run until shutdown, the iteration bound, or a transport error.
    ///
    /// The shutdown signal interrupts a pending wait, so it is observed
    /// within one poll interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] when the stack reports a transport
    /// error while waiting or the link drops during a scheduled write.
    pub async fn run<K>(
        &self,
        sink: &mut K,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(LoopExit, LoopStats)>
    where
        K: SampleSink + ?Sized,
    {
        self.tree.ensure_current(self.connection)?;
        if !self.schedule.is_empty() {
            if let Some(reference) = self.config_char {
                self.tree.find_characteristic(reference)?;
            }
        }

        let mut stats = LoopStats::default();
        let mut cursor = self.schedule.cursor();

        info!(
            "Listening for notifications on link {} (poll interval {:?})",
            self.connection.link_id(),
            self.poll_interval
        );

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("Dispatch loop cancelled after {} iterations", stats.iterations);
                    return Ok((LoopExit::Cancelled, stats));
                }
                outcome = self.stack.wait_for_notification(self.poll_interval) => outcome,
            };

            match outcome {
                Ok(Some(event)) => {
                    stats.events += 1;
                    self.forward(event, sink, &mut stats);
                }
                Ok(None) => {}
                Err(source) => {
                    error!(
                        "Transport error on link {}: {}",
                        self.connection.link_id(),
                        source
                    );
                    return Err(Error::ConnectionLost {
                        source: Some(source),
                    });
                }
            }

            stats.iterations += 1;

            if let Some(entry) = cursor.poll(stats.iterations, stats.events) {
                self.issue(entry, &mut stats).await?;
            }

            if let Some(max) = self.max_iterations {
                if stats.iterations >= max {
                    info!("Dispatch loop completed after {} iterations", stats.iterations);
                    return Ok((LoopExit::Completed, stats));
                }
            }
        }
    }

    fn forward<K>(&self, event: NotificationEvent, sink: &mut K, stats: &mut LoopStats)
    where
        K: SampleSink + ?Sized,
    {
        trace!(
            "Notification from {:#06x}: {}",
            event.source_handle,
            hex_preview(&event.raw_payload)
        );

        let decoded = self
            .schemas
            .get(&event.source_handle)
            .and_then(|schema| schema.decode(&event.raw_payload));

        let sink_event = match decoded {
            Some(sample) => {
                stats.decoded += 1;
                SinkEvent::Sample {
                    handle: event.source_handle,
                    sample,
                    timestamp: event.timestamp,
                }
            }
            None => {
                stats.undecoded += 1;
                debug!(
                    "Undecoded {}-byte payload from {:#06x}",
                    event.raw_payload.len(),
                    event.source_handle
                );
                SinkEvent::Undecoded {
                    handle: event.source_handle,
                    payload: event.raw_payload,
                    timestamp: event.timestamp,
                }
            }
        };

        sink.push(sink_event);
    }

    async fn issue(&self, entry: &ScheduledWrite, stats: &mut LoopStats) -> Result<()> {
        let Some(reference) = self.config_char else {
            return Ok(());
        };

        info!(
            "Iteration {}: writing scheduled payload {} to {}",
            stats.iterations,
            hex_preview(&entry.payload),
            reference
        );

        let result = AttributeWriter::new(self.stack)
            .write(
                self.tree,
                self.connection,
                reference,
                &entry.payload,
                self.write_with_response,
            )
            .await;

        match result {
            Ok(_) => {
                stats.writes += 1;
                Ok(())
            }
            Err(Error::WriteError {
                source: StackError::Disconnected,
                ..
            }) => Err(Error::ConnectionLost {
                source: Some(StackError::Disconnected),
            }),
            Err(Error::NotConnected) => Err(Error::ConnectionLost { source: None }),
            Err(e) => {
                warn!("Scheduled write failed: {}", e);
                stats.write_failures += 1;
                Ok(())
            }
        }
    }
}
