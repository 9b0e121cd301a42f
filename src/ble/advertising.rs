//! Advertising data model.
//!
//! An [`AdvertisementReport`] is one advertisement as the stack saw it; an
//! [`AdvertisedDevice`] is the de-duplicated per-address snapshot the scanner
//! hands to a device selector.

use std::collections::BTreeMap;

use btleplug::api::BDAddr;
use bytes::Bytes;

/// Advertising data (AD) structure types from the Bluetooth assigned numbers.
pub mod ad_type {
    /// Flags.
    pub const FLAGS: u8 = 0x01;
    /// Incomplete list of 16-bit service UUIDs.
    pub const INCOMPLETE_SERVICE_UUIDS_16: u8 = 0x02;
    /// Complete list of 16-bit service UUIDs.
    pub const COMPLETE_SERVICE_UUIDS_16: u8 = 0x03;
    /// Complete list of 128-bit service UUIDs.
    pub const COMPLETE_SERVICE_UUIDS_128: u8 = 0x07;
    /// Shortened local name.
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    /// Complete local name.
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    /// TX power level.
    pub const TX_POWER_LEVEL: u8 = 0x0A;
    /// Service data, 16-bit UUID.
    pub const SERVICE_DATA_16: u8 = 0x16;
    /// Manufacturer specific data.
    pub const MANUFACTURER_DATA: u8 = 0xFF;

    /// Human-readable description of an AD type.
    pub fn describe(tag: u8) -> &'static str {
        match tag {
            FLAGS => "Flags",
            INCOMPLETE_SERVICE_UUIDS_16 => "Incomplete 16b Services",
            COMPLETE_SERVICE_UUIDS_16 => "Complete 16b Services",
            COMPLETE_SERVICE_UUIDS_128 => "Complete 128b Services",
            SHORTENED_LOCAL_NAME => "Short Local Name",
            COMPLETE_LOCAL_NAME => "Complete Local Name",
            TX_POWER_LEVEL => "Tx Power",
            SERVICE_DATA_16 => "16b Service Data",
            MANUFACTURER_DATA => "Manufacturer",
            _ => "Unknown",
        }
    }
}

/// Bluetooth device address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AddressType {
    /// IEEE-assigned public address.
    #[default]
    Public,
    /// Random (static or private) address.
    Random,
}

impl From<btleplug::api::AddressType> for AddressType {
    fn from(value: btleplug::api::AddressType) -> Self {
        match value {
            btleplug::api::AddressType::Public => Self::Public,
            btleplug::api::AddressType::Random => Self::Random,
        }
    }
}

impl std::fmt::Display for AddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// AD structures of one advertisement, keyed by AD type.
pub type AdvertisedFields = BTreeMap<u8, Bytes>;

/// One advertisement report delivered by the stack during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementReport {
    /// Advertiser address.
    pub address: BDAddr,
    /// Advertiser address type.
    pub address_type: AddressType,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// AD structures carried by the advertisement.
    pub fields: AdvertisedFields,
}

/// Snapshot of an advertising peripheral, one per address per scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedDevice {
    /// Device address.
    pub address: BDAddr,
    /// Device address type.
    pub address_type: AddressType,
    /// Local name, if one was advertised.
    pub name: Option<String>,
    /// Signal strength of the most recent advertisement, in dBm.
    pub rssi: i16,
    /// AD structures of the most recent advertisement.
    pub advertised_fields: AdvertisedFields,
}

impl AdvertisedDevice {
    /// Build a snapshot from a single report.
    pub fn from_report(report: AdvertisementReport) -> Self {
        let name = local_name(&report.fields);
        Self {
            address: report.address,
            address_type: report.address_type,
            name,
            rssi: report.rssi,
            advertised_fields: report.fields,
        }
    }

    /// Get the raw value of an AD structure.
    pub fn field(&self, tag: u8) -> Option<&[u8]> {
        self.advertised_fields.get(&tag).map(|v| &v[..])
    }

    /// Get the manufacturer specific data as (company id, payload).
    pub fn manufacturer_data(&self) -> Option<(u16, &[u8])> {
        let data = self.field(ad_type::MANUFACTURER_DATA)?;
        if data.len() < 2 {
            return None;
        }
        Some((u16::from_le_bytes([data[0], data[1]]), &data[2..]))
    }

    /// Get the advertised TX power level in dBm.
    pub fn tx_power(&self) -> Option<i8> {
        self.field(ad_type::TX_POWER_LEVEL)
            .and_then(|v| v.first())
            .map(|b| *b as i8)
    }

    /// Iterate over the AD values that are valid UTF-8 text.
    pub fn text_fields(&self) -> impl Iterator<Item = (u8, &str)> {
        self.advertised_fields
            .iter()
            .filter_map(|(tag, value)| std::str::from_utf8(value).ok().map(|s| (*tag, s)))
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.to_string())
    }
}

/// Extract the local name, preferring the complete name over the shortened one.
pub fn local_name(fields: &AdvertisedFields) -> Option<String> {
    [ad_type::COMPLETE_LOCAL_NAME, ad_type::SHORTENED_LOCAL_NAME]
        .iter()
        .filter_map(|tag| fields.get(tag))
        .find_map(|value| std::str::from_utf8(value).ok())
        .map(|s| s.trim_end_matches('\0').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(fields: &[(u8, &[u8])]) -> AdvertisementReport {
        AdvertisementReport {
            address: BDAddr::from([0xC0, 0x11, 0x22, 0x33, 0x44, 0x55]),
            address_type: AddressType::Random,
            rssi: -60,
            fields: fields
                .iter()
                .map(|(tag, value)| (*tag, Bytes::copy_from_slice(value)))
                .collect(),
        }
    }

    #[test]
    fn test_local_name_prefers_complete() {
        let device = AdvertisedDevice::from_report(report(&[
            (ad_type::SHORTENED_LOCAL_NAME, b"Blue"),
            (ad_type::COMPLETE_LOCAL_NAME, b"BlueNRG"),
        ]));
        assert_eq!(device.name.as_deref(), Some("BlueNRG"));
    }

    #[test]
    fn test_local_name_missing() {
        let device = AdvertisedDevice::from_report(report(&[(ad_type::FLAGS, &[0x06])]));
        assert_eq!(device.name, None);
        assert_eq!(device.display_name(), "C0:11:22:33:44:55");
    }

    #[test]
    fn test_manufacturer_data() {
        let device = AdvertisedDevice::from_report(report(&[(
            ad_type::MANUFACTURER_DATA,
            &[0x30, 0x00, 0xAA, 0xBB],
        )]));
        let (company, payload) = device.manufacturer_data().unwrap();
        assert_eq!(company, 0x0030);
        assert_eq!(payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_tx_power_is_signed() {
        let device = AdvertisedDevice::from_report(report(&[(ad_type::TX_POWER_LEVEL, &[0xF8])]));
        assert_eq!(device.tx_power(), Some(-8));
    }

    #[test]
    fn test_text_fields_skip_binary() {
        let device = AdvertisedDevice::from_report(report(&[
            (ad_type::FLAGS, &[0xFF, 0xFE]),
            (ad_type::COMPLETE_LOCAL_NAME, b"Bluepio"),
        ]));
        let texts: Vec<_> = device.text_fields().collect();
        assert_eq!(texts, vec![(ad_type::COMPLETE_LOCAL_NAME, "Bluepio")]);
    }

    #[test]
    fn test_address_type_display() {
        assert_eq!(AddressType::Random.to_string(), "random");
        assert_eq!(AddressType::default(), AddressType::Public);
    }
}
