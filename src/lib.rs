// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-central-session
//!
//! A Rust library for running Bluetooth Low Energy central-role sessions
//! against small sensor peripherals.
//!
//! A session scans for advertisers, selects one, connects, resolves the GATT
//! attribute tree, enables notifications through the CCCD and then listens,
//! decoding each notification and optionally pushing scheduled configuration
//! writes (such as a sample-rate change) back to the device. The link is
//! always disconnected when the session ends.
//!
//! ## Features
//!
//! - **Scanning**: Time-bounded scans de-duplicated per address
//! - **Selection**: By name substring, scan index or signal strength
//! - **Discovery**: Services, characteristics and descriptors as a [`ServiceTree`]
//! - **Notifications**: CCCD subscription with readback verification
//! - **Dispatch Loop**: Bounded-poll receive loop with a data-driven [`RateSchedule`]
//! - **Distinct Errors**: Every failure has its own [`ErrorKind`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ble_central_session::{
//!     shutdown_channel, BtleplugStack, Central, LogSink, NameSubstring, RateSchedule, Result,
//!     SampleSchema, SessionConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SessionConfig::new(0x000E_u16)
//!         .with_target_name("BlueNRG")
//!         .with_config_char(0x0011_u16)
//!         .with_sample_schema(SampleSchema::Accelerometer)
//!         .with_rate_schedule(RateSchedule::sample_rate_ramp());
//!
//!     let stack = Arc::new(BtleplugStack::new().await?);
//!     let central = Central::new(stack, config)?;
//!
//!     let (handle, signal) = shutdown_channel();
//!     handle.trigger_on_ctrl_c();
//!
//!     let report = central
//!         .run_session(&NameSubstring::new("BlueNRG"), &mut LogSink, signal)
//!         .await?;
//!     println!("{} notifications received", report.stats.events);
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and sample types

// Public modules
pub mod ble;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod selector;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod utils;

// Re-exports for convenience
pub use config::SessionConfig;
pub use error::{Error, ErrorKind, Result};
pub use session::{Central, SessionReport};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use utils::hex_preview;

// Re-export commonly used types from submodules
pub use ble::{
    AddressType, AdvertisedDevice, BleStack, BtleplugStack, CharacteristicRef, Connection,
    ConnectionState, NotificationEvent, NotifyMode, ServiceTree, StackError,
};
pub use dispatch::{DispatchLoop, LoopExit, LoopStats, RateSchedule, ScheduleMode, TriggerCounter};
pub use protocol::{Axes, DecodedSample, Gesture, SampleRate, SampleSchema};
pub use selector::{ByIndex, DeviceSelector, NameSubstring, StrongestSignal};
pub use sink::{ChannelSink, LatestValueSink, LogSink, SampleSink, SinkEvent};
