//! BLE scanning functionality.
//!
//! Runs a time-bounded scan and folds the raw advertisement stream into one
//! [`AdvertisedDevice`] per address.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::BDAddr;
use tracing::{debug, info, trace};

use crate::ble::advertising::{AddressType, AdvertisedDevice, AdvertisementReport};
use crate::ble::stack::BleStack;
use crate::error::{Error, Result};

/// Optional constraints applied to scan results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Keep only devices whose local name contains this substring.
    pub name_substring: Option<String>,
    /// Keep only devices at or above this signal strength (dBm).
    pub min_rssi: Option<i16>,
    /// Keep only devices with this address type.
    pub address_type: Option<AddressType>,
}

impl ScanFilter {
    /// Filter by local-name substring.
    pub fn with_name(mut self, substring: impl Into<String>) -> Self {
        self.name_substring = Some(substring.into());
        self
    }

    /// Filter by minimum RSSI.
    pub fn with_min_rssi(mut self, rssi: i16) -> Self {
        self.min_rssi = Some(rssi);
        self
    }

    /// Filter by address type.
    pub fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = Some(address_type);
        self
    }

    /// Check whether a device passes the filter.
    pub fn matches(&self, device: &AdvertisedDevice) -> bool {
        if let Some(substring) = &self.name_substring {
            let named = device
                .name
                .as_ref()
                .map(|n| n.contains(substring.as_str()))
                .unwrap_or(false);
            if !named {
                return false;
            }
        }
        if let Some(min) = self.min_rssi {
            if device.rssi < min {
                return false;
            }
        }
        if let Some(address_type) = self.address_type {
            if device.address_type != address_type {
                return false;
            }
        }
        true
    }
}

/// Fold advertisement reports into one device per address.
///
/// Devices keep the order in which their address was first seen; the data of
/// the most recent report for an address wins. A later report without a
/// local name keeps the name learnt earlier.
pub fn deduplicate(reports: impl IntoIterator<Item = AdvertisementReport>) -> Vec<AdvertisedDevice> {
    let mut index: HashMap<BDAddr, usize> = HashMap::new();
    let mut devices: Vec<AdvertisedDevice> = Vec::new();

    for report in reports {
        let update = AdvertisedDevice::from_report(report);
        match index.get(&update.address) {
            Some(&i) => {
                let existing = &mut devices[i];
                let name = update.name.clone().or_else(|| existing.name.take());
                *existing = AdvertisedDevice { name, ..update };
            }
            None => {
                index.insert(update.address, devices.len());
                devices.push(update);
            }
        }
    }

    devices
}

/// Time-bounded advertisement scanner.
pub struct Scanner<'a, S: ?Sized> {
    stack: &'a S,
}

impl<'a, S: BleStack + ?Sized> Scanner<'a, S> {
    /// Create a scanner on top of a stack.
    pub fn new(stack: &'a S) -> Self {
        Self { stack }
    }

    /// Scan for `duration` and return one entry per advertising address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanFailure`] if the adapter is unavailable or the
    /// scan cannot run.
    pub async fn scan(
        &self,
        duration: Duration,
        filter: Option<&ScanFilter>,
    ) -> Result<Vec<AdvertisedDevice>> {
        info!("Starting BLE scan for {:?}", duration);

        let reports = self
            .stack
            .scan(duration)
            .await
            .map_err(|source| Error::ScanFailure { source })?;

        trace!("Scan produced {} advertisement reports", reports.len());

        let devices: Vec<_> = deduplicate(reports)
            .into_iter()
            .filter(|device| filter.map(|f| f.matches(device)).unwrap_or(true))
            .collect();

        for device in &devices {
            debug!(
                "Device {} ({}), RSSI={} dBm, name={:?}",
                device.address, device.address_type, device.rssi, device.name
            );
        }

        info!("Scan complete: {} devices", devices.len());

        Ok(devices)
    }
}
