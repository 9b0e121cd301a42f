//! [`BleStack`] on top of btleplug.
//!
//! btleplug addresses attributes by UUID and never exposes ATT handles, so
//! this module numbers the GATT database itself after discovery: each service
//! takes one handle, each characteristic a declaration and a value handle,
//! and its descriptors follow in order. Handles are stable for the lifetime
//! of one link.

use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Descriptor, Manager as _, Peripheral as _,
    ScanFilter, Service, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::advertising::{ad_type, AddressType, AdvertisedFields, AdvertisementReport};
use crate::ble::services::{AttributeDescriptor, CharacteristicDescriptor, ServiceDescriptor};
use crate::ble::stack::{BleStack, NotificationEvent, StackError, StackResult};
use crate::ble::uuids::CCCD_UUID;
use crate::error::{Error, Result};

/// RSSI reported for peripherals whose signal strength is unknown.
pub const UNKNOWN_RSSI: i16 = -127;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// An attribute behind a synthesised handle.
#[derive(Debug, Clone)]
enum Attribute {
    Value(Characteristic),
    Descriptor(Descriptor, Characteristic),
}

/// Synthesised handle layout of one peripheral's GATT database.
#[derive(Debug, Default)]
struct HandleTable {
    services: Vec<ServiceDescriptor>,
    characteristics: HashMap<u16, Vec<CharacteristicDescriptor>>,
    descriptors: HashMap<u16, Vec<AttributeDescriptor>>,
    attributes: HashMap<u16, Attribute>,
}

impl HandleTable {
    fn build(services: &BTreeSet<Service>) -> Self {
        let mut table = Self::default();
        let mut next: u16 = 1;

        for service in services {
            let start_handle = next;
            next += 1;

            let mut characteristics = Vec::with_capacity(service.characteristics.len());
            for characteristic in &service.characteristics {
                // Declaration, then value.
                let value_handle = next + 1;
                next += 2;

                let mut descriptors = Vec::with_capacity(characteristic.descriptors.len());
                for descriptor in &characteristic.descriptors {
                    descriptors.push(AttributeDescriptor {
                        uuid: descriptor.uuid,
                        handle: next,
                        parent_characteristic: value_handle,
                    });
                    table.attributes.insert(
                        next,
                        Attribute::Descriptor(descriptor.clone(), characteristic.clone()),
                    );
                    next += 1;
                }

                characteristics.push(CharacteristicDescriptor {
                    uuid: characteristic.uuid,
                    handle: value_handle,
                    properties: characteristic.properties,
                });
                table
                    .attributes
                    .insert(value_handle, Attribute::Value(characteristic.clone()));
                table.descriptors.insert(value_handle, descriptors);
            }

            table.services.push(ServiceDescriptor {
                uuid: service.uuid,
                start_handle,
                end_handle: next - 1,
            });
            table.characteristics.insert(start_handle, characteristics);
        }

        table
    }

    fn value_handle(&self, uuid: &uuid::Uuid) -> Option<u16> {
        self.characteristics
            .values()
            .flatten()
            .filter(|c| &c.uuid == uuid)
            .map(|c| c.handle)
            .min()
    }
}

/// State of the peripheral currently connected through the stack.
struct Link {
    address: BDAddr,
    peripheral: Peripheral,
    table: RwLock<HandleTable>,
    notifications: tokio::sync::Mutex<NotificationStream>,
    lost: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Stops a scan whose future was dropped before the deadline.
struct ScanGuard(Option<Adapter>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(adapter) = self.0.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = adapter.stop_scan().await {
                        warn!("Failed to stop abandoned scan: {}", e);
                    }
                });
            }
        }
    }
}

/// Production [`BleStack`] backed by the first available btleplug adapter.
pub struct BtleplugStack {
    adapter: Adapter,
    link: RwLock<Option<Arc<Link>>>,
}

impl BtleplugStack {
    /// Open the first Bluetooth adapter of the system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanFailure`] with [`StackError::Unavailable`] if no
    /// adapter is present.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        let adapter = adapters.into_iter().next().ok_or(Error::ScanFailure {
            source: StackError::Unavailable,
        })?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            link: RwLock::new(None),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn link(&self) -> StackResult<Arc<Link>> {
        self.link.read().clone().ok_or(StackError::Disconnected)
    }

    fn attribute(&self, handle: u16) -> StackResult<(Arc<Link>, Attribute)> {
        let link = self.link()?;
        let attribute = link
            .table
            .read()
            .attributes
            .get(&handle)
            .cloned()
            .ok_or_else(|| StackError::Rejected(format!("unknown handle {:#06x}", handle)))?;
        Ok((link, attribute))
    }

    async fn find_peripheral(&self, address: BDAddr) -> StackResult<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address() == address {
                return Ok(peripheral);
            }
        }
        Err(StackError::Rejected(format!("{} has not been seen", address)))
    }

    async fn report_for(&self, id: &btleplug::platform::PeripheralId) -> Option<AdvertisementReport> {
        let peripheral = match self.adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let mut fields = AdvertisedFields::new();
        if let Some(name) = &properties.local_name {
            fields.insert(
                ad_type::COMPLETE_LOCAL_NAME,
                Bytes::copy_from_slice(name.as_bytes()),
            );
        }
        if let Some(tx_power) = properties.tx_power_level {
            fields.insert(
                ad_type::TX_POWER_LEVEL,
                Bytes::copy_from_slice(&[tx_power as i8 as u8]),
            );
        }
        if let Some((company, data)) = properties.manufacturer_data.iter().min_by_key(|(k, _)| **k) {
            let mut value = company.to_le_bytes().to_vec();
            value.extend_from_slice(data);
            fields.insert(ad_type::MANUFACTURER_DATA, Bytes::from(value));
        }
        if !properties.services.is_empty() {
            let mut value = Vec::with_capacity(properties.services.len() * 16);
            for uuid in &properties.services {
                let mut le = *uuid.as_bytes();
                le.reverse();
                value.extend_from_slice(&le);
            }
            fields.insert(ad_type::COMPLETE_SERVICE_UUIDS_128, Bytes::from(value));
        }

        Some(AdvertisementReport {
            address: properties.address,
            address_type: properties
                .address_type
                .map(AddressType::from)
                .unwrap_or_default(),
            rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
            fields,
        })
    }

    fn watch_disconnect(&self, peripheral: &Peripheral, lost: Arc<AtomicBool>) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let id = peripheral.id();

        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        debug!("Device disconnected: {:?}", gone);
                        lost.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BleStack for BtleplugStack {
    async fn scan(&self, duration: Duration) -> StackResult<Vec<AdvertisementReport>> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        let mut scanning = ScanGuard(Some(self.adapter.clone()));

        let deadline = tokio::time::Instant::now() + duration;
        let mut reports = Vec::new();

        loop {
            let event = match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => break,
            };

            let id = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                | CentralEvent::ServiceDataAdvertisement { id, .. }
                | CentralEvent::ServicesAdvertisement { id, .. } => id,
                _ => continue,
            };

            if let Some(report) = self.report_for(&id).await {
                trace!("Advertisement from {} ({} dBm)", report.address, report.rssi);
                reports.push(report);
            }
        }

        scanning.0 = None;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        Ok(reports)
    }

    /// btleplug cannot be told the address type; the platform uses the one it
    /// saw while scanning and `address_type` is only checked against it.
    async fn connect(&self, address: BDAddr, address_type: AddressType) -> StackResult<()> {
        let peripheral = self.find_peripheral(address).await?;

        if let Ok(Some(properties)) = peripheral.properties().await {
            let seen = properties.address_type.map(AddressType::from);
            if seen.is_some() && seen != Some(address_type) {
                debug!(
                    "Requested {} address type for {}, platform reports {:?}",
                    address_type, address, seen
                );
            }
        }

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        let notifications = peripheral.notifications().await?;
        let lost = Arc::new(AtomicBool::new(false));
        let watcher = self.watch_disconnect(&peripheral, lost.clone());

        *self.link.write() = Some(Arc::new(Link {
            address,
            peripheral,
            table: RwLock::new(HandleTable::default()),
            notifications: tokio::sync::Mutex::new(notifications),
            lost,
            watcher,
        }));

        Ok(())
    }

    async fn disconnect(&self, address: BDAddr) -> StackResult<()> {
        let link = {
            let mut guard = self.link.write();
            match guard.as_ref() {
                Some(link) if link.address == address => guard.take(),
                _ => None,
            }
        };

        match link {
            Some(link) => {
                if link.lost.load(Ordering::SeqCst) {
                    return Err(StackError::Disconnected);
                }
                link.peripheral.disconnect().await?;
                Ok(())
            }
            None => {
                // A connect that timed out or was cancelled stores no link.
                let peripheral = self.find_peripheral(address).await?;
                if peripheral.is_connected().await? {
                    peripheral.disconnect().await?;
                    Ok(())
                } else {
                    Err(StackError::Disconnected)
                }
            }
        }
    }

    async fn discover_services(&self) -> StackResult<Vec<ServiceDescriptor>> {
        let link = self.link()?;
        link.peripheral.discover_services().await?;

        let table = HandleTable::build(&link.peripheral.services());
        let services = table.services.clone();
        *link.table.write() = table;

        Ok(services)
    }

    async fn discover_characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> StackResult<Vec<CharacteristicDescriptor>> {
        let link = self.link()?;
        let table = link.table.read();
        Ok(table
            .characteristics
            .get(&service.start_handle)
            .cloned()
            .unwrap_or_default())
    }

    async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicDescriptor,
        end_handle: u16,
    ) -> StackResult<Vec<AttributeDescriptor>> {
        let link = self.link()?;
        let table = link.table.read();
        Ok(table
            .descriptors
            .get(&characteristic.handle)
            .map(|all| {
                all.iter()
                    .filter(|d| d.handle <= end_handle)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read(&self, handle: u16) -> StackResult<Vec<u8>> {
        let (link, attribute) = self.attribute(handle)?;
        let value = match attribute {
            Attribute::Value(characteristic) => link.peripheral.read(&characteristic).await?,
            Attribute::Descriptor(descriptor, _) => {
                link.peripheral.read_descriptor(&descriptor).await?
            }
        };
        Ok(value)
    }

    async fn write(&self, handle: u16, payload: &[u8], with_response: bool) -> StackResult<()> {
        let (link, attribute) = self.attribute(handle)?;

        match attribute {
            Attribute::Value(characteristic) => {
                let write_type = if with_response {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                link.peripheral
                    .write(&characteristic, payload, write_type)
                    .await?;
            }
            // btleplug owns the CCCD; subscription state is driven through it.
            Attribute::Descriptor(descriptor, characteristic) if descriptor.uuid == CCCD_UUID => {
                if payload.len() != 2 {
                    return Err(StackError::InvalidLength(payload.len()));
                }
                if payload == [0x00, 0x00] {
                    link.peripheral.unsubscribe(&characteristic).await?;
                } else {
                    link.peripheral.subscribe(&characteristic).await?;
                }
            }
            Attribute::Descriptor(descriptor, _) => {
                link.peripheral.write_descriptor(&descriptor, payload).await?;
            }
        }

        Ok(())
    }

    async fn wait_for_notification(
        &self,
        timeout: Duration,
    ) -> StackResult<Option<NotificationEvent>> {
        let link = self.link()?;
        if link.lost.load(Ordering::SeqCst) {
            return Err(StackError::Disconnected);
        }

        let mut notifications = link.notifications.lock().await;
        let notification = match tokio::time::timeout(timeout, notifications.next()).await {
            Ok(Some(notification)) => notification,
            Ok(None) => return Err(StackError::Disconnected),
            Err(_) if link.lost.load(Ordering::SeqCst) => return Err(StackError::Disconnected),
            Err(_) => return Ok(None),
        };

        let handle = link.table.read().value_handle(&notification.uuid);
        match handle {
            Some(handle) => Ok(Some(NotificationEvent::new(handle, notification.value))),
            None => {
                debug!("Notification from unresolved characteristic {}", notification.uuid);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{ACC_GYRO_MAG_CHAR_UUID, ENVIRONMENTAL_CHAR_UUID, HW_SENSOR_SERVICE_UUID};
    use btleplug::api::CharPropFlags;
    use pretty_assertions::assert_eq;

    fn sensor_service() -> Service {
        let environmental = Characteristic {
            uuid: ENVIRONMENTAL_CHAR_UUID,
            service_uuid: HW_SENSOR_SERVICE_UUID,
            properties: CharPropFlags::NOTIFY | CharPropFlags::READ,
            descriptors: [Descriptor {
                uuid: CCCD_UUID,
                service_uuid: HW_SENSOR_SERVICE_UUID,
                characteristic_uuid: ENVIRONMENTAL_CHAR_UUID,
            }]
            .into_iter()
            .collect(),
        };
        let motion = Characteristic {
            uuid: ACC_GYRO_MAG_CHAR_UUID,
            service_uuid: HW_SENSOR_SERVICE_UUID,
            properties: CharPropFlags::WRITE_WITHOUT_RESPONSE,
            descriptors: BTreeSet::new(),
        };
        Service {
            uuid: HW_SENSOR_SERVICE_UUID,
            primary: true,
            characteristics: [environmental, motion].into_iter().collect(),
        }
    }

    #[test]
    fn test_handle_layout() {
        let table = HandleTable::build(&[sensor_service()].into_iter().collect());

        assert_eq!(table.services.len(), 1);
        let service = table.services[0];
        assert_eq!(service.start_handle, 1);

        let characteristics = &table.characteristics[&service.start_handle];
        assert_eq!(characteristics.len(), 2);

        // Every value handle follows its declaration; descriptors follow the value.
        let mut expected_next = 2;
        for characteristic in characteristics {
            assert_eq!(characteristic.handle, expected_next + 1);
            let descriptors = &table.descriptors[&characteristic.handle];
            for (i, descriptor) in descriptors.iter().enumerate() {
                assert_eq!(descriptor.handle, characteristic.handle + 1 + i as u16);
                assert_eq!(descriptor.parent_characteristic, characteristic.handle);
            }
            expected_next = characteristic.handle + 1 + descriptors.len() as u16;
        }
        assert_eq!(service.end_handle, expected_next - 1);
    }

    #[test]
    fn test_cccd_maps_to_characteristic() {
        let table = HandleTable::build(&[sensor_service()].into_iter().collect());
        let value = table.value_handle(&ENVIRONMENTAL_CHAR_UUID).unwrap();
        let cccd = table.descriptors[&value][0];

        assert_eq!(cccd.uuid, CCCD_UUID);
        match &table.attributes[&cccd.handle] {
            Attribute::Descriptor(descriptor, characteristic) => {
                assert_eq!(descriptor.uuid, CCCD_UUID);
                assert_eq!(characteristic.uuid, ENVIRONMENTAL_CHAR_UUID);
            }
            other => panic!("expected descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_database() {
        let table = HandleTable::build(&BTreeSet::new());
        assert!(table.services.is_empty());
        assert!(table.value_handle(&ENVIRONMENTAL_CHAR_UUID).is_none());
    }
}
