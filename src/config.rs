//! Session configuration.

use std::time::Duration;

use crate::ble::advertising::AddressType;
use crate::ble::services::CharacteristicRef;
use crate::ble::subscriber::{CccdVerification, NotifyMode};
use crate::ble::uuids::ENVIRONMENTAL_CHAR_UUID;
use crate::dispatch::schedule::RateSchedule;
use crate::dispatch::DEFAULT_POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::protocol::samples::SampleSchema;
use crate::selector::{ByIndex, DeviceSelector, NameSubstring, StrongestSignal};

/// Default scan duration.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything a session needs to know about its target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Select the first device whose name contains this substring.
    pub target_device_name_substring: Option<String>,
    /// Select the device at this position in the scan results.
    pub device_index: Option<usize>,
    /// Characteristic to enable notifications on.
    #[cfg_attr(feature = "serde", serde(alias = "notification_char_handle"))]
    pub notification_char: CharacteristicRef,
    /// Characteristic that receives scheduled configuration writes.
    #[cfg_attr(feature = "serde", serde(alias = "config_char_handle"))]
    pub config_char: Option<CharacteristicRef>,
    /// Configuration writes issued from the dispatch loop.
    pub rate_schedule: RateSchedule,
    /// How long to scan.
    pub scan_duration: Duration,
    /// How long to wait for the connection.
    pub connect_timeout: Duration,
    /// Override the advertised address type.
    pub address_type: Option<AddressType>,
    /// Bound on each wait for notifications.
    pub poll_interval: Duration,
    /// Notifications or indications.
    pub notify_mode: NotifyMode,
    /// CCCD readback policy.
    pub cccd_verification: CccdVerification,
    /// Use acknowledged writes for scheduled commands.
    pub write_with_response: bool,
    /// Payload layout of the notification characteristic.
    pub sample_schema: SampleSchema,
    /// Stop normally after this many loop iterations.
    pub max_iterations: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_device_name_substring: None,
            device_index: None,
            notification_char: CharacteristicRef::Uuid(ENVIRONMENTAL_CHAR_UUID),
            config_char: None,
            rate_schedule: RateSchedule::default(),
            scan_duration: DEFAULT_SCAN_DURATION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            address_type: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify_mode: NotifyMode::default(),
            cccd_verification: CccdVerification::default(),
            write_with_response: false,
            sample_schema: SampleSchema::Environmental,
            max_iterations: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration targeting a notification characteristic.
    pub fn new(notification_char: impl Into<CharacteristicRef>) -> Self {
        Self {
            notification_char: notification_char.into(),
            ..Self::default()
        }
    }

    /// Select the target by name substring.
    pub fn with_target_name(mut self, substring: impl Into<String>) -> Self {
        self.target_device_name_substring = Some(substring.into());
        self
    }

    /// Select the target by scan position.
    pub fn with_device_index(mut self, index: usize) -> Self {
        self.device_index = Some(index);
        self
    }

    /// Set the characteristic to subscribe to.
    pub fn with_notification_char(mut self, reference: impl Into<CharacteristicRef>) -> Self {
        self.notification_char = reference.into();
        self
    }

    /// Set the characteristic scheduled writes go to.
    pub fn with_config_char(mut self, reference: impl Into<CharacteristicRef>) -> Self {
        self.config_char = Some(reference.into());
        self
    }

    /// Set the configuration write schedule.
    pub fn with_rate_schedule(mut self, schedule: RateSchedule) -> Self {
        self.rate_schedule = schedule;
        self
    }

    /// Set the scan duration.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Force an address type instead of the advertised one.
    pub fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = Some(address_type);
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set notifications or indications.
    pub fn with_notify_mode(mut self, mode: NotifyMode) -> Self {
        self.notify_mode = mode;
        self
    }

    /// Set the CCCD readback policy.
    pub fn with_cccd_verification(mut self, verification: CccdVerification) -> Self {
        self.cccd_verification = verification;
        self
    }

    /// Use acknowledged writes for scheduled commands.
    pub fn with_write_response(mut self, with_response: bool) -> Self {
        self.write_with_response = with_response;
        self
    }

    /// Set the payload layout.
    pub fn with_sample_schema(mut self, schema: SampleSchema) -> Self {
        self.sample_schema = schema;
        self
    }

    /// Stop after a number of iterations.
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Build the selector described by this configuration.
    ///
    /// Name substring wins over index; with neither, the strongest signal is
    /// chosen.
    pub fn selector(&self) -> Box<dyn DeviceSelector> {
        match (&self.target_device_name_substring, self.device_index) {
            (Some(name), _) => Box::new(NameSubstring::new(name.clone())),
            (None, Some(index)) => Box::new(ByIndex(index)),
            (None, None) => Box::new(StrongestSignal::default()),
        }
    }

    /// Check the configuration for inconsistencies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", format!("{:?}", self.poll_interval)));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", format!("{:?}", self.connect_timeout)));
        }
        if self.scan_duration.is_zero() {
            return Err(invalid("scan_duration", format!("{:?}", self.scan_duration)));
        }
        if self.target_device_name_substring.is_some() && self.device_index.is_some() {
            return Err(invalid(
                "device_index",
                "set together with target_device_name_substring".to_string(),
            ));
        }
        if self.max_iterations == Some(0) {
            return Err(invalid("max_iterations", "0".to_string()));
        }

        self.rate_schedule.validate()?;
        if !self.rate_schedule.is_empty() && self.config_char.is_none() {
            return Err(invalid(
                "config_char",
                "missing for non-empty rate_schedule".to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(name: &str, value: String) -> Error {
    Error::InvalidConfig {
        name: name.to_string(),
        value,
    }
}
