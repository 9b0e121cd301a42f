//! Scripted in-memory stack for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{BDAddr, CharPropFlags};
use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::ble::advertising::{ad_type, AddressType, AdvertisementReport};
use crate::ble::connection::{Connection, ConnectionState};
use crate::ble::services::{AttributeDescriptor, CharacteristicDescriptor, ServiceDescriptor};
use crate::ble::stack::{BleStack, NotificationEvent, StackError, StackResult};
use crate::ble::uuids::{
    ACC_GYRO_MAG_CHAR_UUID, CCCD_UUID, ENVIRONMENTAL_CHAR_UUID, HW_SENSOR_SERVICE_UUID,
};

/// Value handle of the notifying characteristic in the sensor profile.
pub const NOTIFY_HANDLE: u16 = 14;
/// Handle of its CCCD.
pub const CCCD_HANDLE: u16 = 15;
/// Value handle of the writable configuration characteristic.
pub const CONFIG_HANDLE: u16 = 17;

/// Address of the fake sensor peripheral.
pub fn sensor_address() -> BDAddr {
    BDAddr::from([0xC0, 0x11, 0x22, 0x33, 0x44, 0x55])
}

/// A primitive invocation recorded by [`FakeStack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    Scan,
    Connect(BDAddr, AddressType),
    Disconnect(BDAddr),
    DiscoverServices,
    DiscoverCharacteristics(Uuid),
    DiscoverDescriptors(u16, u16),
    Read(u16),
    Write {
        handle: u16,
        payload: Vec<u8>,
        with_response: bool,
    },
    Wait,
}

/// One scripted outcome of `wait_for_notification`.
#[derive(Debug, Clone)]
pub enum WaitStep {
    Event(u16, Bytes),
    Timeout,
    Error(StackError),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<StackCall>,
    scan_reports: Vec<AdvertisementReport>,
    scan_error: Option<StackError>,
    connect_delay: Duration,
    connect_error: Option<StackError>,
    disconnect_error: Option<StackError>,
    services: Vec<ServiceDescriptor>,
    characteristics: HashMap<Uuid, Vec<CharacteristicDescriptor>>,
    descriptors: HashMap<u16, Vec<AttributeDescriptor>>,
    descriptor_error: Option<StackError>,
    values: HashMap<u16, Vec<u8>>,
    read_override: Option<StackResult<Vec<u8>>>,
    write_error: Option<StackError>,
    max_write_len: Option<usize>,
    waits: VecDeque<WaitStep>,
    block_waits: bool,
}

/// Scripted [`BleStack`] that records every call.
#[derive(Default)]
pub struct FakeStack {
    state: Mutex<FakeState>,
    last_link_id: AtomicU64,
}

impl FakeStack {
    /// A peripheral with one sensor service: a notifying characteristic with
    /// a CCCD and a writable configuration characteristic.
    pub fn with_sensor_profile() -> Self {
        let stack = Self::default();
        {
            let mut state = stack.state.lock();
            let service = ServiceDescriptor {
                uuid: HW_SENSOR_SERVICE_UUID,
                start_handle: 0x0C,
                end_handle: 0x20,
            };
            state.services.push(service);
            state.characteristics.insert(
                service.uuid,
                vec![
                    CharacteristicDescriptor {
                        uuid: ENVIRONMENTAL_CHAR_UUID,
                        handle: NOTIFY_HANDLE,
                        properties: CharPropFlags::NOTIFY | CharPropFlags::READ,
                    },
                    CharacteristicDescriptor {
                        uuid: ACC_GYRO_MAG_CHAR_UUID,
                        handle: CONFIG_HANDLE,
                        properties: CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::WRITE,
                    },
                ],
            );
            state.descriptors.insert(
                NOTIFY_HANDLE,
                vec![AttributeDescriptor {
                    uuid: CCCD_UUID,
                    handle: CCCD_HANDLE,
                    parent_characteristic: NOTIFY_HANDLE,
                }],
            );
            state.scan_reports.push(sensor_report(-60, "BlueNRG"));
        }
        stack
    }

    /// A `Connected` link handle to the sensor. Each call is a new link.
    pub fn connected_link(&self) -> Connection {
        self.link(ConnectionState::Connected)
    }

    /// A `Disconnected` link handle to the sensor. Each call is a new link.
    pub fn disconnected_link(&self) -> Connection {
        self.link(ConnectionState::Disconnected)
    }

    fn link(&self, state: ConnectionState) -> Connection {
        let link_id = self.last_link_id.fetch_add(1, Ordering::SeqCst) + 1;
        Connection::new(sensor_address(), AddressType::Random, link_id, state)
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.state.lock().calls.clone()
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StackCall::Write {
                    handle, payload, ..
                } => Some((handle, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&StackCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn set_scan_reports(&self, reports: Vec<AdvertisementReport>) {
        self.state.lock().scan_reports = reports;
    }

    pub fn fail_scan(&self, err: StackError) {
        self.state.lock().scan_error = Some(err);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn reject_connect(&self, err: StackError) {
        self.state.lock().connect_error = Some(err);
    }

    pub fn fail_disconnect(&self, err: StackError) {
        self.state.lock().disconnect_error = Some(err);
    }

    pub fn fail_descriptor_discovery(&self, err: StackError) {
        self.state.lock().descriptor_error = Some(err);
    }

    pub fn remove_descriptors(&self, handle: u16) {
        self.state.lock().descriptors.remove(&handle);
    }

    pub fn override_reads(&self, result: StackResult<Vec<u8>>) {
        self.state.lock().read_override = Some(result);
    }

    pub fn fail_writes(&self, err: StackError) {
        self.state.lock().write_error = Some(err);
    }

    pub fn limit_write_len(&self, max: usize) {
        self.state.lock().max_write_len = Some(max);
    }

    pub fn push_wait(&self, step: WaitStep) {
        self.state.lock().waits.push_back(step);
    }

    pub fn push_event(&self, handle: u16, payload: &[u8]) {
        self.push_wait(WaitStep::Event(handle, Bytes::copy_from_slice(payload)));
    }

    pub fn push_timeouts(&self, n: usize) {
        for _ in 0..n {
            self.push_wait(WaitStep::Timeout);
        }
    }

    /// Once the script is exhausted, block each wait for its full timeout.
    pub fn block_waits(&self) {
        self.state.lock().block_waits = true;
    }

    fn record(&self, call: StackCall) {
        self.state.lock().calls.push(call);
    }
}

/// An advertisement report from the fake sensor.
pub fn sensor_report(rssi: i16, name: &str) -> AdvertisementReport {
    AdvertisementReport {
        address: sensor_address(),
        address_type: AddressType::Random,
        rssi,
        fields: [
            (ad_type::FLAGS, Bytes::from_static(&[0x06])),
            (
                ad_type::COMPLETE_LOCAL_NAME,
                Bytes::copy_from_slice(name.as_bytes()),
            ),
        ]
        .into_iter()
        .collect(),
    }
}

#[async_trait]
impl BleStack for FakeStack {
    async fn scan(&self, _duration: Duration) -> StackResult<Vec<AdvertisementReport>> {
        self.record(StackCall::Scan);
        let state = self.state.lock();
        match &state.scan_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.scan_reports.clone()),
        }
    }

    async fn connect(&self, address: BDAddr, address_type: AddressType) -> StackResult<()> {
        self.record(StackCall::Connect(address, address_type));
        let (delay, error) = {
            let state = self.state.lock();
            (state.connect_delay, state.connect_error.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn disconnect(&self, address: BDAddr) -> StackResult<()> {
        self.record(StackCall::Disconnect(address));
        match self.state.lock().disconnect_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn discover_services(&self) -> StackResult<Vec<ServiceDescriptor>> {
        self.record(StackCall::DiscoverServices);
        Ok(self.state.lock().services.clone())
    }

    async fn discover_characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> StackResult<Vec<CharacteristicDescriptor>> {
        self.record(StackCall::DiscoverCharacteristics(service.uuid));
        Ok(self
            .state
            .lock()
            .characteristics
            .get(&service.uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicDescriptor,
        end_handle: u16,
    ) -> StackResult<Vec<AttributeDescriptor>> {
        self.record(StackCall::DiscoverDescriptors(
            characteristic.handle,
            end_handle,
        ));
        let state = self.state.lock();
        if let Some(err) = &state.descriptor_error {
            return Err(err.clone());
        }
        Ok(state
            .descriptors
            .get(&characteristic.handle)
            .cloned()
            .unwrap_or_default())
    }

    async fn read(&self, handle: u16) -> StackResult<Vec<u8>> {
        self.record(StackCall::Read(handle));
        let state = self.state.lock();
        if let Some(result) = &state.read_override {
            return result.clone();
        }
        Ok(state.values.get(&handle).cloned().unwrap_or_default())
    }

    async fn write(&self, handle: u16, payload: &[u8], with_response: bool) -> StackResult<()> {
        self.record(StackCall::Write {
            handle,
            payload: payload.to_vec(),
            with_response,
        });
        let mut state = self.state.lock();
        if let Some(err) = &state.write_error {
            return Err(err.clone());
        }
        if let Some(max) = state.max_write_len {
            if payload.len() > max {
                return Err(StackError::InvalidLength(payload.len()));
            }
        }
        state.values.insert(handle, payload.to_vec());
        Ok(())
    }

    async fn wait_for_notification(
        &self,
        timeout: Duration,
    ) -> StackResult<Option<NotificationEvent>> {
        self.record(StackCall::Wait);
        let (step, block) = {
            let mut state = self.state.lock();
            (state.waits.pop_front(), state.block_waits)
        };
        match step {
            Some(WaitStep::Event(handle, payload)) => Ok(Some(NotificationEvent::new(handle, payload))),
            Some(WaitStep::Timeout) => Ok(None),
            Some(WaitStep::Error(err)) => Err(err),
            None => {
                let pause = if block {
                    timeout
                } else {
                    timeout.min(Duration::from_millis(1))
                };
                tokio::time::sleep(pause).await;
                Ok(None)
            }
        }
    }
}
