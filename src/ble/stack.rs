//! The boundary to the underlying BLE stack.
//!
//! Everything above this trait is session orchestration; everything below it
//! (radio, HCI, ATT framing) belongs to the platform.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::BDAddr;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ble::advertising::{AddressType, AdvertisementReport};
use crate::ble::services::{AttributeDescriptor, CharacteristicDescriptor, ServiceDescriptor};

/// Failure reported by a [`BleStack`] primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// No adapter is present or it is powered off.
    #[error("adapter unavailable")]
    Unavailable,

    /// The stack refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The link to the peripheral is gone.
    #[error("link disconnected")]
    Disconnected,

    /// The stack refused a payload because of its length.
    #[error("invalid length: {0} bytes")]
    InvalidLength(usize),

    /// The platform cannot perform this primitive.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A primitive did not complete in time.
    #[error("timed out")]
    Timeout,

    /// Any other backend failure.
    #[error("backend: {0}")]
    Backend(String),
}

impl From<btleplug::Error> for StackError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => Self::Disconnected,
            btleplug::Error::TimedOut(_) => Self::Timeout,
            btleplug::Error::NotSupported(what) => Self::NotSupported(what),
            btleplug::Error::PermissionDenied => Self::Rejected("permission denied".to_string()),
            btleplug::Error::DeviceNotFound => Self::Rejected("device not found".to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// A specialized Result type for stack primitives.
pub type StackResult<T> = std::result::Result<T, StackError>;

/// A notification (or indication) value pushed by the peripheral.
///
/// Transient: produced by the stack and consumed immediately by the
/// dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Value handle of the characteristic that sent the notification.
    pub source_handle: u16,
    /// The notification payload.
    pub raw_payload: Bytes,
    /// When the stack delivered the notification.
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Create an event stamped with the current time.
    pub fn new(source_handle: u16, raw_payload: impl Into<Bytes>) -> Self {
        Self {
            source_handle,
            raw_payload: raw_payload.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Primitives the session layer needs from a BLE stack.
///
/// Apart from `scan` and `connect`, every primitive acts on the currently
/// connected peripheral. Attribute handles are those reported by
/// discovery.
#[async_trait]
pub trait BleStack: Send + Sync {
    /// Scan for `duration` and return every advertisement seen, in arrival order.
    async fn scan(&self, duration: Duration) -> StackResult<Vec<AdvertisementReport>>;

    /// Open a link to a peripheral. Resolves once the link is up.
    async fn connect(&self, address: BDAddr, address_type: AddressType) -> StackResult<()>;

    /// Tear down the link to a peripheral.
    async fn disconnect(&self, address: BDAddr) -> StackResult<()>;

    /// Enumerate primary services.
    async fn discover_services(&self) -> StackResult<Vec<ServiceDescriptor>>;

    /// Enumerate characteristics within a service's handle range.
    async fn discover_characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> StackResult<Vec<CharacteristicDescriptor>>;

    /// Enumerate descriptors between a characteristic's value handle and `end_handle`.
    async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicDescriptor,
        end_handle: u16,
    ) -> StackResult<Vec<AttributeDescriptor>>;

    /// Read an attribute value.
    async fn read(&self, handle: u16) -> StackResult<Vec<u8>>;

    /// Write an attribute value.
    async fn write(&self, handle: u16, payload: &[u8], with_response: bool) -> StackResult<()>;

    /// Wait up to `timeout` for the next notification.
    ///
    /// `Ok(None)` means the wait timed out with nothing delivered.
    async fn wait_for_notification(
        &self,
        timeout: Duration,
    ) -> StackResult<Option<NotificationEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btleplug_error_mapping() {
        assert_eq!(
            StackError::from(btleplug::Error::NotConnected),
            StackError::Disconnected
        );
        assert_eq!(
            StackError::from(btleplug::Error::TimedOut(Duration::from_secs(1))),
            StackError::Timeout
        );
        assert!(matches!(
            StackError::from(btleplug::Error::Other("boom".into())),
            StackError::Backend(_)
        ));
    }

    #[test]
    fn test_notification_event_new() {
        let event = NotificationEvent::new(15, vec![1, 2, 3]);
        assert_eq!(event.source_handle, 15);
        assert_eq!(&event.raw_payload[..], &[1, 2, 3]);
    }
}
