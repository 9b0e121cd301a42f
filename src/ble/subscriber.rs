//! Notification and indication subscription through the CCCD.

use tracing::{debug, info, warn};

use crate::ble::connection::Connection;
use crate::ble::services::{CharacteristicRef, ServiceTree};
use crate::ble::stack::BleStack;
use crate::ble::uuids::CCCD_UUID;
use crate::error::{Error, Result};

/// CCCD value that disables both notifications and indications.
pub const CCCD_DISABLED: [u8; 2] = 0x0000u16.to_le_bytes();

/// Which kind of server-initiated update to enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum NotifyMode {
    /// Unacknowledged notifications.
    #[default]
    Notification,
    /// Acknowledged indications.
    Indication,
}

impl NotifyMode {
    /// The 2-byte little-endian CCCD value enabling this mode.
    pub fn cccd_value(self) -> [u8; 2] {
        match self {
            Self::Notification => 0x0001u16.to_le_bytes(),
            Self::Indication => 0x0002u16.to_le_bytes(),
        }
    }
}

/// How the CCCD write is checked afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CccdVerification {
    /// Do not read the CCCD back.
    Skip,
    /// Read back and log a mismatch.
    #[default]
    Advisory,
    /// Read back and fail on a mismatch.
    Strict,
}

/// Result of reading the CCCD back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Readback was not attempted.
    Skipped,
    /// Readback matched the written value.
    Confirmed,
    /// The stack could not read the descriptor.
    Unsupported,
    /// Readback returned a different value.
    Mismatch {
        /// What the peripheral reported.
        actual: Vec<u8>,
    },
}

/// Acknowledgement of a CCCD write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Value handle of the characteristic.
    pub characteristic: u16,
    /// Handle of the CCCD that was written.
    pub cccd_handle: u16,
    /// The value that was written.
    pub value: [u8; 2],
    /// Outcome of the readback.
    pub verification: Verification,
}

/// Enables and disables notifications on resolved characteristics.
pub struct NotificationSubscriber<'a, S: ?Sized> {
    stack: &'a S,
    verification: CccdVerification,
}

impl<'a, S: BleStack + ?Sized> NotificationSubscriber<'a, S> {
    /// Create a subscriber with advisory readback.
    pub fn new(stack: &'a S) -> Self {
        Self {
            stack,
            verification: CccdVerification::default(),
        }
    }

    /// Set the readback policy.
    pub fn with_verification(mut self, verification: CccdVerification) -> Self {
        self.verification = verification;
        self
    }

    /// Enable notifications or indications on a characteristic.
    pub async fn enable_notifications(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
        reference: CharacteristicRef,
        mode: NotifyMode,
    ) -> Result<Ack> {
        let characteristic = tree.find_characteristic(reference)?;
        let supported = match mode {
            NotifyMode::Notification => characteristic.can_notify(),
            NotifyMode::Indication => characteristic.can_indicate(),
        };
        if !supported {
            warn!(
                "Characteristic {:#06x} does not advertise {:?} support",
                characteristic.handle, mode
            );
        }

        let ack = self
            .write_cccd(tree, connection, reference, mode.cccd_value())
            .await?;
        info!(
            "{:?}s enabled on characteristic {:#06x}",
            mode, ack.characteristic
        );
        Ok(ack)
    }

    /// Disable notifications and indications on a characteristic.
    pub async fn disable_notifications(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
        reference: CharacteristicRef,
    ) -> Result<Ack> {
        let ack = self
            .write_cccd(tree, connection, reference, CCCD_DISABLED)
            .await?;
        info!("Notifications disabled on characteristic {:#06x}", ack.characteristic);
        Ok(ack)
    }

    async fn write_cccd(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
        reference: CharacteristicRef,
        value: [u8; 2],
    ) -> Result<Ack> {
        tree.ensure_current(connection)?;

        let node = tree.find_node(reference)?;
        let handle = node.characteristic.handle;
        let cccd = node
            .descriptors
            .iter()
            .find(|d| d.uuid == CCCD_UUID)
            .ok_or(Error::NoCccd { handle })?;

        debug!("Writing {:02X?} to CCCD {:#06x}", value, cccd.handle);

        self.stack
            .write(cccd.handle, &value, true)
            .await
            .map_err(|source| Error::SubscribeError { handle, source })?;

        let verification = self.verify(cccd.handle, value).await?;

        Ok(Ack {
            characteristic: handle,
            cccd_handle: cccd.handle,
            value,
            verification,
        })
    }

    async fn verify(&self, cccd_handle: u16, expected: [u8; 2]) -> Result<Verification> {
        if self.verification == CccdVerification::Skip {
            return Ok(Verification::Skipped);
        }

        let actual = match self.stack.read(cccd_handle).await {
            Ok(actual) => actual,
            Err(e) => {
                debug!("CCCD {:#06x} readback unavailable: {}", cccd_handle, e);
                return Ok(Verification::Unsupported);
            }
        };

        if actual[..] == expected[..] {
            debug!("CCCD {:#06x} readback confirmed", cccd_handle);
            return Ok(Verification::Confirmed);
        }

        let mismatch = Error::VerificationMismatch {
            handle: cccd_handle,
            expected,
            actual: actual.clone(),
        };
        if self.verification == CccdVerification::Strict {
            return Err(mismatch);
        }
        warn!("{}", mismatch);
        Ok(Verification::Mismatch { actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::{FakeStack, StackCall, CCCD_HANDLE, CONFIG_HANDLE, NOTIFY_HANDLE};
    use crate::ble::services::Resolver;
    use crate::ble::stack::StackError;
    use crate::error::ErrorKind;

    async fn setup() -> (FakeStack, Connection, ServiceTree) {
        let stack = FakeStack::with_sensor_profile();
        let connection = stack.connected_link();
        let tree = Resolver::new(&stack).resolve(&connection).await.unwrap();
        (stack, connection, tree)
    }

    #[test]
    fn test_cccd_values() {
        assert_eq!(NotifyMode::Notification.cccd_value(), [0x01, 0x00]);
        assert_eq!(NotifyMode::Indication.cccd_value(), [0x02, 0x00]);
        assert_eq!(CCCD_DISABLED, [0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_enable_writes_exactly_two_bytes() {
        let (stack, connection, tree) = setup().await;

        let ack = NotificationSubscriber::new(&stack)
            .enable_notifications(&tree, &connection, NOTIFY_HANDLE.into(), NotifyMode::Notification)
            .await
            .unwrap();

        assert_eq!(stack.writes(), vec![(CCCD_HANDLE, vec![0x01, 0x00])]);
        assert_eq!(ack.cccd_handle, CCCD_HANDLE);
        assert_eq!(ack.verification, Verification::Confirmed);
    }

    #[tokio::test]
    async fn test_disable_writes_zero() {
        let (stack, connection, tree) = setup().await;

        NotificationSubscriber::new(&stack)
            .with_verification(CccdVerification::Skip)
            .disable_notifications(&tree, &connection, NOTIFY_HANDLE.into())
            .await
            .unwrap();

        assert_eq!(stack.writes(), vec![(CCCD_HANDLE, vec![0x00, 0x00])]);
        assert_eq!(stack.count(|c| matches!(c, StackCall::Read(_))), 0);
    }

    #[tokio::test]
    async fn test_missing_cccd() {
        let (stack, connection, tree) = setup().await;

        let err = NotificationSubscriber::new(&stack)
            .enable_notifications(&tree, &connection, CONFIG_HANDLE.into(), NotifyMode::Notification)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoCccd);
        assert!(stack.writes().is_empty());
    }

    #[tokio::test]
    async fn test_mismatch_is_advisory() {
        let (stack, connection, tree) = setup().await;
        stack.override_reads(Ok(vec![0x00, 0x00]));

        let ack = NotificationSubscriber::new(&stack)
            .enable_notifications(&tree, &connection, NOTIFY_HANDLE.into(), NotifyMode::Notification)
            .await
            .unwrap();

        assert_eq!(
            ack.verification,
            Verification::Mismatch {
                actual: vec![0x00, 0x00]
            }
        );
    }

    #[tokio::test]
    async fn test_mismatch_strict() {
        let (stack, connection, tree) = setup().await;
        stack.override_reads(Ok(vec![0x00, 0x00]));

        let err = NotificationSubscriber::new(&stack)
            .with_verification(CccdVerification::Strict)
            .enable_notifications(&tree, &connection, NOTIFY_HANDLE.into(), NotifyMode::Indication)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::VerificationMismatch);
    }

    #[tokio::test]
    async fn test_readback_unsupported() {
        let (stack, connection, tree) = setup().await;
        stack.override_reads(Err(StackError::NotSupported("descriptor read".into())));

        let ack = NotificationSubscriber::new(&stack)
            .enable_notifications(&tree, &connection, NOTIFY_HANDLE.into(), NotifyMode::Notification)
            .await
            .unwrap();

        assert_eq!(ack.verification, Verification::Unsupported);
    }

    #[tokio::test]
    async fn test_write_failure() {
        let (stack, connection, tree) = setup().await;
        stack.fail_writes(StackError::Rejected("write not permitted".into()));

        let err = NotificationSubscriber::new(&stack)
            .enable_notifications(&tree, &connection, NOTIFY_HANDLE.into(), NotifyMode::Notification)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SubscribeError);
    }

    #[tokio::test]
    async fn test_requires_connected_link() {
        let (stack, _connection, tree) = setup().await;
        let closed = stack.disconnected_link();

        let err = NotificationSubscriber::new(&stack)
            .enable_notifications(&tree, &closed, NOTIFY_HANDLE.into(), NotifyMode::Notification)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }
}
