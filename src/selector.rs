//! Choosing the target peripheral from scan results.

use tracing::debug;

use crate::ble::advertising::AdvertisedDevice;

/// Picks one device out of a scan.
///
/// Returning `None` aborts the session with
/// [`Error::DeviceNotFound`](crate::Error::DeviceNotFound).
#[cfg_attr(test, mockall::automock)]
pub trait DeviceSelector: Send + Sync {
    /// Choose a device, or none.
    fn select(&self, devices: &[AdvertisedDevice]) -> Option<AdvertisedDevice>;

    /// Describe the selection criteria for error messages.
    fn describe(&self) -> String;
}

/// Selects the first device whose name contains a substring.
///
/// Devices without a matching local name are also matched against every
/// text-valued advertising field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameSubstring(pub String);

impl NameSubstring {
    /// Match on `substring`.
    pub fn new(substring: impl Into<String>) -> Self {
        Self(substring.into())
    }

    fn matches(&self, device: &AdvertisedDevice) -> bool {
        let needle = self.0.as_str();
        if device.name.as_deref().map(|n| n.contains(needle)).unwrap_or(false) {
            return true;
        }
        device.text_fields().any(|(_, value)| value.contains(needle))
    }
}

impl DeviceSelector for NameSubstring {
    fn select(&self, devices: &[AdvertisedDevice]) -> Option<AdvertisedDevice> {
        let found = devices.iter().find(|d| self.matches(d)).cloned();
        if let Some(device) = &found {
            debug!("Found device: {}, address: {}", device.display_name(), device.address);
        }
        found
    }

    fn describe(&self) -> String {
        format!("name contains {:?}", self.0)
    }
}

/// Selects the device at a position in the scan results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByIndex(pub usize);

impl DeviceSelector for ByIndex {
    fn select(&self, devices: &[AdvertisedDevice]) -> Option<AdvertisedDevice> {
        devices.get(self.0).cloned()
    }

    fn describe(&self) -> String {
        format!("device #{}", self.0)
    }
}

/// Selects the device with the strongest signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrongestSignal {
    /// Ignore devices below this RSSI (dBm).
    pub min_rssi: Option<i16>,
}

impl DeviceSelector for StrongestSignal {
    fn select(&self, devices: &[AdvertisedDevice]) -> Option<AdvertisedDevice> {
        devices
            .iter()
            .filter(|d| self.min_rssi.map(|min| d.rssi >= min).unwrap_or(true))
            .max_by_key(|d| d.rssi)
            .cloned()
    }

    fn describe(&self) -> String {
        match self.min_rssi {
            Some(min) => format!("strongest signal at or above {} dBm", min),
            None => "strongest signal".to_string(),
        }
    }
}
