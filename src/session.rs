//! Central-role session orchestration.
//!
//! A [`Central`] drives the lifecycle scan, select, connect, resolve,
//! subscribe, listen, disconnect. Every step holds the [`Radio`] guard and
//! watches the shutdown signal. A link that was handed out is always
//! disconnected again, even when the session future is dropped.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::ble::advertising::AdvertisedDevice;
use crate::ble::connection::{Connection, ConnectionManager};
use crate::ble::radio::Radio;
use crate::ble::scanner::Scanner;
use crate::ble::services::{CharacteristicRef, Resolver, ServiceTree};
use crate::ble::stack::BleStack;
use crate::ble::subscriber::{Ack, NotificationSubscriber};
use crate::ble::writer::{AttributeWriter, WriteAck};
use crate::config::SessionConfig;
use crate::dispatch::{DispatchLoop, LoopExit, LoopStats};
use crate::error::{Error, Result};
use crate::selector::DeviceSelector;
use crate::shutdown::ShutdownSignal;
use crate::sink::SampleSink;

/// Outcome of a session that ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// The peripheral the session ran against; `None` if stopped before selection.
    pub device: Option<AdvertisedDevice>,
    /// Why the dispatch loop stopped.
    pub exit: LoopExit,
    /// Dispatch loop counters.
    pub stats: LoopStats,
}

impl SessionReport {
    fn cancelled(device: Option<AdvertisedDevice>) -> Self {
        Self {
            device,
            exit: LoopExit::Cancelled,
            stats: LoopStats::default(),
        }
    }
}

/// BLE central driving one session at a time.
pub struct Central<S: ?Sized> {
    radio: Radio<S>,
    connections: Arc<ConnectionManager<S>>,
    config: SessionConfig,
}

impl<S: BleStack + ?Sized> Central<S> {
    /// Create a central on top of a stack.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is inconsistent.
    pub fn new(stack: Arc<S>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            radio: Radio::new(stack.clone()),
            connections: Arc::new(ConnectionManager::new(stack)),
            config,
        })
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the connection manager, e.g. to observe connection events.
    pub fn connections(&self) -> &ConnectionManager<S> {
        &self.connections
    }

    /// Scan for the configured duration.
    pub async fn scan(&self) -> Result<Vec<AdvertisedDevice>> {
        let radio = self.radio.exclusive().await;
        Scanner::new(&*radio)
            .scan(self.config.scan_duration, None)
            .await
    }

    /// Connect to a scanned device.
    ///
    /// Uses the configured address type if one is set, otherwise the
    /// advertised one.
    pub async fn connect(&self, device: &AdvertisedDevice) -> Result<Connection> {
        let _radio = self.radio.exclusive().await;
        let address_type = self.config.address_type.unwrap_or(device.address_type);
        self.connections
            .connect(device.address, address_type, self.config.connect_timeout)
            .await
    }

    /// Resolve the attribute tree of a connection.
    pub async fn resolve(&self, connection: &Connection) -> Result<ServiceTree> {
        let radio = self.radio.exclusive().await;
        Resolver::new(&*radio).resolve(connection).await
    }

    /// Enable notifications on the configured characteristic.
    pub async fn enable_notifications(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
    ) -> Result<Ack> {
        let radio = self.radio.exclusive().await;
        NotificationSubscriber::new(&*radio)
            .with_verification(self.config.cccd_verification)
            .enable_notifications(
                tree,
                connection,
                self.config.notification_char,
                self.config.notify_mode,
            )
            .await
    }

    /// Disable notifications on the configured characteristic.
    pub async fn disable_notifications(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
    ) -> Result<Ack> {
        let radio = self.radio.exclusive().await;
        NotificationSubscriber::new(&*radio)
            .with_verification(self.config.cccd_verification)
            .disable_notifications(tree, connection, self.config.notification_char)
            .await
    }

    /// Write a characteristic value.
    pub async fn write(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
        reference: CharacteristicRef,
        payload: &[u8],
        with_response: bool,
    ) -> Result<WriteAck> {
        let radio = self.radio.exclusive().await;
        AttributeWriter::new(&*radio)
            .write(tree, connection, reference, payload, with_response)
            .await
    }

    /// Disconnect a link. Idempotent.
    pub async fn disconnect(&self, connection: &Connection) {
        let _radio = self.radio.exclusive().await;
        self.connections.disconnect(connection).await;
    }

    /// Run a full session.
    ///
    /// Scans, lets `selector` pick the target, connects, resolves,
    /// subscribes and runs the dispatch loop until `shutdown` fires, the
    /// iteration bound is reached or the link drops. `shutdown` is honoured
    /// in every phase; a stop before the loop starts returns
    /// [`LoopExit::Cancelled`] without touching the peripheral further.
    /// Once connected, the link is disconnected exactly once, also when
    /// this future is dropped.
    ///
    /// # Errors
    ///
    /// Setup failures are returned as their own kind
    /// ([`Error::ScanFailure`], [`Error::DeviceNotFound`],
    /// [`Error::ConnectTimeout`], [`Error::ConnectError`],
    /// [`Error::ResolutionError`], [`Error::NoCccd`], [`Error::SubscribeError`]);
    /// a drop while listening is [`Error::ConnectionLost`].
    pub async fn run_session<K>(
        &self,
        selector: &dyn DeviceSelector,
        sink: &mut K,
        mut shutdown: ShutdownSignal,
    ) -> Result<SessionReport>
    where
        K: SampleSink + ?Sized,
        S: 'static,
    {
        let devices = tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                info!("Session cancelled before scanning finished");
                return Ok(SessionReport::cancelled(None));
            }
            devices = self.scan() => devices?,
        };

        let device = selector
            .select(&devices)
            .ok_or_else(|| Error::DeviceNotFound {
                criteria: selector.describe(),
            })?;
        info!(
            "Selected {} ({}, {} dBm)",
            device.display_name(),
            device.address,
            device.rssi
        );

        let connection = {
            let _radio = self.radio.exclusive().await;
            let address_type = self.config.address_type.unwrap_or(device.address_type);
            self.connections
                .connect_until(
                    device.address,
                    address_type,
                    self.config.connect_timeout,
                    &mut shutdown,
                )
                .await?
        };
        let Some(connection) = connection else {
            return Ok(SessionReport::cancelled(Some(device)));
        };

        let link = LinkGuard::new(self.connections.clone(), connection);

        let outcome = self.listen(&link.connection, sink, &mut shutdown).await;

        self.disconnect(&link.connection).await;
        link.release();

        match outcome {
            Ok((exit, stats)) => {
                info!(
                    "Session ended ({:?}): {} iterations, {} notifications, {} writes",
                    exit, stats.iterations, stats.events, stats.writes
                );
                Ok(SessionReport {
                    device: Some(device),
                    exit,
                    stats,
                })
            }
            Err(e) => {
                error!("Session with {} failed: {}", device.address, e);
                Err(e)
            }
        }
    }

    async fn listen<K>(
        &self,
        connection: &Connection,
        sink: &mut K,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(LoopExit, LoopStats)>
    where
        K: SampleSink + ?Sized,
    {
        // Held from resolution to the end of the loop.
        let radio = self.radio.exclusive().await;

        let setup = async {
            let tree = Resolver::new(&*radio).resolve(connection).await?;
            let ack = NotificationSubscriber::new(&*radio)
                .with_verification(self.config.cccd_verification)
                .enable_notifications(
                    &tree,
                    connection,
                    self.config.notification_char,
                    self.config.notify_mode,
                )
                .await?;
            Ok::<_, Error>((tree, ack))
        };

        let (tree, ack) = tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                info!("Session cancelled during attribute setup");
                return Ok((LoopExit::Cancelled, LoopStats::default()));
            }
            setup = setup => setup?,
        };

        let mut dispatch = DispatchLoop::new(&*radio, &tree, connection)
            .register_schema(ack.characteristic, self.config.sample_schema)
            .with_write_response(self.config.write_with_response)
            .with_poll_interval(self.config.poll_interval)
            .with_max_iterations(self.config.max_iterations);
        if let Some(config_char) = self.config.config_char {
            dispatch = dispatch.with_schedule(self.config.rate_schedule.clone(), config_char);
        }

        dispatch.run(sink, shutdown).await
    }
}

/// Disconnects a link on drop unless released after a regular cleanup.
struct LinkGuard<S: BleStack + ?Sized + 'static> {
    connections: Arc<ConnectionManager<S>>,
    connection: Connection,
    armed: bool,
}

impl<S: BleStack + ?Sized + 'static> LinkGuard<S> {
    fn new(connections: Arc<ConnectionManager<S>>, connection: Connection) -> Self {
        Self {
            connections,
            connection,
            armed: true,
        }
    }

    fn release(mut self) {
        self.armed = false;
    }
}

impl<S: BleStack + ?Sized + 'static> Drop for LinkGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let connections = self.connections.clone();
        let connection = self.connection.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    connections.disconnect(&connection).await;
                });
            }
            Err(_) => warn!(
                "Link {} dropped outside a runtime, not disconnected",
                connection.link_id()
            ),
        }
    }
}
