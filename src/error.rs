//! Error types for the ble-central-session crate.

use std::time::Duration;

use btleplug::api::BDAddr;
use thiserror::Error;

use crate::ble::stack::StackError;

/// The main error type for this crate.
///
/// Every session phase fails with its own variant so callers can tell
/// "device not found" apart from "found but wouldn't connect" apart from
/// "connected but notification setup failed".
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio or adapter could not run a scan.
    #[error("Scan failed")]
    ScanFailure {
        /// The stack failure behind the scan error.
        #[source]
        source: StackError,
    },

    /// The selector did not pick any of the scanned devices.
    #[error("No device matched: {criteria}")]
    DeviceNotFound {
        /// Description of the selection criteria.
        criteria: String,
    },

    /// The peripheral did not answer the connection request in time.
    #[error("Connection to {address} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Address of the peripheral.
        address: BDAddr,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The stack rejected the connection attempt.
    #[error("Connection to {address} failed")]
    ConnectError {
        /// Address of the peripheral.
        address: BDAddr,
        /// The stack failure behind the rejection.
        #[source]
        source: StackError,
    },

    /// Operation requires a connection but the link is not connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// Service, characteristic or descriptor discovery failed.
    #[error("Attribute discovery failed: {context}")]
    ResolutionError {
        /// Which discovery step failed.
        context: String,
        /// The stack failure behind the discovery error.
        #[source]
        source: StackError,
    },

    /// The service tree was resolved for an earlier connection.
    #[error("Service tree belongs to link {tree_link}, current link is {link}")]
    StaleServiceTree {
        /// Link the tree was resolved on.
        tree_link: u64,
        /// Link the operation was attempted on.
        link: u64,
    },

    /// No characteristic matched the lookup.
    #[error("Characteristic not found: {reference}")]
    NotFound {
        /// The UUID or handle that was searched for.
        reference: String,
    },

    /// The characteristic has no Client Characteristic Configuration Descriptor.
    #[error("Characteristic {handle:#06x} has no CCCD")]
    NoCccd {
        /// Value handle of the characteristic.
        handle: u16,
    },

    /// Writing the CCCD failed.
    #[error("Subscription on characteristic {handle:#06x} failed")]
    SubscribeError {
        /// Value handle of the characteristic.
        handle: u16,
        /// The stack failure behind the subscription error.
        #[source]
        source: StackError,
    },

    /// Reading back the CCCD returned something other than what was written.
    ///
    /// Only returned with strict verification; otherwise it is logged.
    #[error("CCCD {handle:#06x} readback mismatch: wrote {expected:02X?}, read {actual:02X?}")]
    VerificationMismatch {
        /// Handle of the CCCD.
        handle: u16,
        /// The value that was written.
        expected: [u8; 2],
        /// The value that was read back.
        actual: Vec<u8>,
    },

    /// The link dropped while the dispatch loop was running.
    #[error("Connection lost")]
    ConnectionLost {
        /// The stack failure that ended the loop, if any.
        #[source]
        source: Option<StackError>,
    },

    /// Writing a characteristic value failed.
    #[error("Write to characteristic {handle:#06x} failed")]
    WriteError {
        /// Value handle of the characteristic.
        handle: u16,
        /// The stack failure behind the write error.
        #[source]
        source: StackError,
    },

    /// The stack rejected the payload length.
    #[error("Invalid payload for characteristic {handle:#06x}: {len} bytes")]
    InvalidPayload {
        /// Value handle of the characteristic.
        handle: u16,
        /// Length of the rejected payload.
        len: usize,
    },

    /// The session configuration is inconsistent.
    #[error("Invalid configuration: {name} = {value}")]
    InvalidConfig {
        /// The name of the option.
        name: String,
        /// The offending value.
        value: String,
    },
}

/// Fieldless discriminant of [`Error`], for matching on the failure kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Bluetooth`].
    Bluetooth,
    /// See [`Error::ScanFailure`].
    ScanFailure,
    /// See [`Error::DeviceNotFound`].
    DeviceNotFound,
    /// See [`Error::ConnectTimeout`].
    ConnectTimeout,
    /// See [`Error::ConnectError`].
    ConnectError,
    /// See [`Error::NotConnected`].
    NotConnected,
    /// See [`Error::ResolutionError`].
    ResolutionError,
    /// See [`Error::StaleServiceTree`].
    StaleServiceTree,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::NoCccd`].
    NoCccd,
    /// See [`Error::SubscribeError`].
    SubscribeError,
    /// See [`Error::VerificationMismatch`].
    VerificationMismatch,
    /// See [`Error::ConnectionLost`].
    ConnectionLost,
    /// See [`Error::WriteError`].
    WriteError,
    /// See [`Error::InvalidPayload`].
    InvalidPayload,
    /// See [`Error::InvalidConfig`].
    InvalidConfig,
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bluetooth(_) => ErrorKind::Bluetooth,
            Self::ScanFailure { .. } => ErrorKind::ScanFailure,
            Self::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::ConnectError { .. } => ErrorKind::ConnectError,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::ResolutionError { .. } => ErrorKind::ResolutionError,
            Self::StaleServiceTree { .. } => ErrorKind::StaleServiceTree,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NoCccd { .. } => ErrorKind::NoCccd,
            Self::SubscribeError { .. } => ErrorKind::SubscribeError,
            Self::VerificationMismatch { .. } => ErrorKind::VerificationMismatch,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::WriteError { .. } => ErrorKind::WriteError,
            Self::InvalidPayload { .. } => ErrorKind::InvalidPayload,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }

    /// Check if this error happened before the dispatch loop started.
    pub fn is_setup_failure(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::ConnectionLost | ErrorKind::WriteError | ErrorKind::InvalidPayload
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = Error::NoCccd { handle: 0x0f };
        assert_eq!(err.kind(), ErrorKind::NoCccd);
        assert!(err.is_setup_failure());

        let err = Error::ConnectionLost {
            source: Some(StackError::Disconnected),
        };
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert!(!err.is_setup_failure());
    }

    #[test]
    fn test_error_display() {
        let err = Error::NoCccd { handle: 0x0f };
        assert_eq!(err.to_string(), "Characteristic 0x000f has no CCCD");

        let err = Error::VerificationMismatch {
            handle: 0x10,
            expected: [0x01, 0x00],
            actual: vec![0x00, 0x00],
        };
        assert_eq!(
            err.to_string(),
            "CCCD 0x0010 readback mismatch: wrote [01, 00], read [00, 00]"
        );
    }
}
