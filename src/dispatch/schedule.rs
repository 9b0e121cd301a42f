//! Threshold-driven configuration writes.
//!
//! A [`RateSchedule`] is an ordered table of `(threshold, payload)` entries.
//! The dispatch loop consults it after every iteration; each entry fires at
//! most once, in table order.

use crate::error::{Error, Result};
use crate::protocol::commands::SampleRate;

/// Which loop counter drives the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TriggerCounter {
    /// Poll-wait iterations, whether or not a notification arrived.
    #[default]
    Iterations,
    /// Delivered notifications.
    Events,
}

/// How thresholds are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScheduleMode {
    /// Thresholds count from the start of the loop.
    #[default]
    Absolute,
    /// The counter resets after each write; thresholds count from the previous write.
    Relative,
}

/// One configuration write of a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScheduledWrite {
    /// Counter value at which the write fires.
    pub threshold: u64,
    /// Raw payload for the configuration characteristic.
    pub payload: Vec<u8>,
}

/// Ordered table of configuration writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateSchedule {
    /// Entries in firing order.
    pub entries: Vec<ScheduledWrite>,
    /// Counter compared against the thresholds.
    pub counter: TriggerCounter,
    /// Threshold interpretation.
    pub mode: ScheduleMode,
}

impl RateSchedule {
    /// An empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// The 1 s / 10 s / 20 s sample-rate ramp at iterations 50, 100 and 200.
    pub fn sample_rate_ramp() -> Self {
        Self::new()
            .with_rate(50, SampleRate::OneSecond)
            .with_rate(100, SampleRate::TenSeconds)
            .with_rate(200, SampleRate::TwentySeconds)
    }

    /// Append a raw write.
    pub fn with_entry(mut self, threshold: u64, payload: impl Into<Vec<u8>>) -> Self {
        self.entries.push(ScheduledWrite {
            threshold,
            payload: payload.into(),
        });
        self
    }

    /// Append a sample-rate change.
    pub fn with_rate(self, threshold: u64, rate: SampleRate) -> Self {
        self.with_entry(threshold, rate.payload())
    }

    /// Set the driving counter.
    pub fn counting(mut self, counter: TriggerCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Set the threshold interpretation.
    pub fn with_mode(mut self, mode: ScheduleMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check if the schedule has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check thresholds.
    ///
    /// Zero thresholds never fire; in absolute mode thresholds must be
    /// strictly increasing or later entries would fire immediately.
    pub fn validate(&self) -> Result<()> {
        if let Some(entry) = self.entries.iter().find(|e| e.threshold == 0) {
            return Err(Error::InvalidConfig {
                name: "rate_schedule.threshold".to_string(),
                value: entry.threshold.to_string(),
            });
        }
        if self.mode == ScheduleMode::Absolute {
            if let Some(pair) = self
                .entries
                .windows(2)
                .find(|pair| pair[1].threshold <= pair[0].threshold)
            {
                return Err(Error::InvalidConfig {
                    name: "rate_schedule.threshold".to_string(),
                    value: format!("{} after {}", pair[1].threshold, pair[0].threshold),
                });
            }
        }
        Ok(())
    }

    /// Start tracking progress through the schedule.
    pub fn cursor(&self) -> ScheduleCursor<'_> {
        ScheduleCursor {
            schedule: self,
            next: 0,
            baseline: 0,
        }
    }
}

/// Progress of one loop run through a [`RateSchedule`].
#[derive(Debug)]
pub struct ScheduleCursor<'a> {
    schedule: &'a RateSchedule,
    next: usize,
    baseline: u64,
}

impl<'a> ScheduleCursor<'a> {
    /// Return the entry due at these counter values, if any, and advance past it.
    pub fn poll(&mut self, iterations: u64, events: u64) -> Option<&'a ScheduledWrite> {
        let entry = self.schedule.entries.get(self.next)?;
        let value = match self.schedule.counter {
            TriggerCounter::Iterations => iterations,
            TriggerCounter::Events => events,
        };
        let elapsed = match self.schedule.mode {
            ScheduleMode::Absolute => value,
            ScheduleMode::Relative => value.saturating_sub(self.baseline),
        };
        if elapsed < entry.threshold {
            return None;
        }

        self.next += 1;
        self.baseline = value;
        Some(entry)
    }

    /// Number of entries already fired.
    pub fn fired(&self) -> usize {
        self.next
    }

    /// Check if every entry has fired.
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.schedule.entries.len()
    }
}
