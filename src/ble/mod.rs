//! BLE communication module.
//!
//! This module provides the central-role building blocks of a session:
//! scanning, connecting, attribute discovery, notification subscription and
//! characteristic writes, all on top of the [`BleStack`] boundary.

pub mod advertising;
pub mod connection;
pub mod platform;
pub mod radio;
pub mod scanner;
pub mod services;
pub mod stack;
pub mod subscriber;
pub mod uuids;
pub mod writer;

#[cfg(test)]
pub(crate) mod fake;

pub use advertising::{AddressType, AdvertisedDevice, AdvertisementReport};
pub use connection::{CallbackHandle, Connection, ConnectionEvent, ConnectionManager, ConnectionState};
pub use platform::BtleplugStack;
pub use radio::{Radio, RadioGuard};
pub use scanner::{ScanFilter, Scanner};
pub use services::{
    find_characteristic, AttributeDescriptor, CharacteristicDescriptor, CharacteristicRef,
    Resolver, ServiceDescriptor, ServiceTree,
};
pub use stack::{BleStack, NotificationEvent, StackError, StackResult};
pub use subscriber::{Ack, CccdVerification, NotificationSubscriber, NotifyMode, Verification};
pub use uuids::*;
pub use writer::{AttributeWriter, WriteAck};
