//! BLE connection management.
//!
//! Establishes the single active link of a session and tears it down again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::BDAddr;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::advertising::AddressType;
use crate::ble::stack::{BleStack, StackError};
use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the peripheral.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the peripheral.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Address of the peripheral.
    pub address: BDAddr,
    /// Link the event belongs to.
    pub link_id: u64,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Handle to one established link.
///
/// Cheap to clone; all clones observe the same state. Only the
/// [`ConnectionManager`] moves it between states.
#[derive(Debug, Clone)]
pub struct Connection {
    address: BDAddr,
    address_type: AddressType,
    link_id: u64,
    state: Arc<RwLock<ConnectionState>>,
}

impl Connection {
    pub(crate) fn new(
        address: BDAddr,
        address_type: AddressType,
        link_id: u64,
        state: ConnectionState,
    ) -> Self {
        Self {
            address,
            address_type,
            link_id,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Address of the peripheral.
    pub fn peripheral_address(&self) -> BDAddr {
        self.address
    }

    /// Address type used for the link.
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Identifier of this link, unique per manager.
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Fail with [`Error::NotConnected`] unless the link is up.
    pub fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn swap_state(&self, new_state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.state.write(), new_state)
    }
}

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Manages the link to one peripheral at a time.
pub struct ConnectionManager<S: ?Sized> {
    /// The stack that carries the link.
    stack: Arc<S>,
    /// The currently established link, if any.
    active: RwLock<Option<Connection>>,
    /// Link ID counter.
    link_counter: AtomicU64,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl<S: BleStack + ?Sized> ConnectionManager<S> {
    /// Create a connection manager on top of a stack.
    pub fn new(stack: Arc<S>) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            stack,
            active: RwLock::new(None),
            link_counter: AtomicU64::new(1),
            event_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Get the active connection, if any.
    pub fn active(&self) -> Option<Connection> {
        self.active.read().clone()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for when a link reaches `Disconnected`.
    ///
    /// Must be called from within a tokio runtime. The callback runs on a
    /// background task and cannot affect the session.
    pub fn on_disconnect<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.state == ConnectionState::Disconnected => callback(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Disconnect callback lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Connect to a peripheral.
    ///
    /// The returned [`Connection`] is always `Connected`; on timeout or
    /// rejection no connection is handed out.
    pub async fn connect(
        &self,
        address: BDAddr,
        address_type: AddressType,
        timeout: Duration,
    ) -> Result<Connection> {
        let mut never = ShutdownSignal::never();
        match self
            .connect_until(address, address_type, timeout, &mut never)
            .await?
        {
            Some(connection) => Ok(connection),
            None => Err(Error::NotConnected),
        }
    }

    /// Connect to a peripheral unless `shutdown` fires first.
    ///
    /// Returns `Ok(None)` when cancelled. A timed-out or cancelled attempt
    /// is followed by a best-effort stack disconnect, since the platform
    /// may have finished connecting underneath.
    pub async fn connect_until(
        &self,
        address: BDAddr,
        address_type: AddressType,
        timeout: Duration,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Option<Connection>> {
        if let Some(existing) = self.active() {
            if existing.is_connected() && existing.peripheral_address() == address {
                debug!("Already connected to {}", address);
                return Ok(Some(existing));
            }
            if existing.state() != ConnectionState::Disconnected {
                return Err(Error::ConnectError {
                    address,
                    source: StackError::Rejected(format!(
                        "link to {} still {}",
                        existing.peripheral_address(),
                        existing.state()
                    )),
                });
            }
        }

        let link_id = self.link_counter.fetch_add(1, Ordering::SeqCst);
        let connection = Connection::new(
            address,
            address_type,
            link_id,
            ConnectionState::Connecting,
        );
        self.emit(&connection, ConnectionState::Connecting);

        info!(
            "Connecting to {} ({}), timeout {:?}",
            address, address_type, timeout
        );

        let attempt = tokio::time::timeout(timeout, self.stack.connect(address, address_type));
        let outcome = tokio::select! {
            biased;
            _ = shutdown.triggered() => None,
            outcome = attempt => Some(outcome),
        };

        match outcome {
            Some(Ok(Ok(()))) => {
                connection.swap_state(ConnectionState::Connected);
                *self.active.write() = Some(connection.clone());
                self.emit(&connection, ConnectionState::Connected);
                info!("Connected to {} (link {})", address, link_id);
                Ok(Some(connection))
            }
            Some(Ok(Err(source))) => {
                warn!("Connection to {} failed: {}", address, source);
                connection.swap_state(ConnectionState::Disconnected);
                self.emit(&connection, ConnectionState::Disconnected);
                Err(Error::ConnectError { address, source })
            }
            Some(Err(_)) => {
                warn!("Connection to {} timed out after {:?}", address, timeout);
                self.abandon(&connection).await;
                Err(Error::ConnectTimeout { address, timeout })
            }
            None => {
                info!("Connection to {} cancelled", address);
                self.abandon(&connection).await;
                Ok(None)
            }
        }
    }

    /// Tear down an attempt that never handed out a connection.
    async fn abandon(&self, connection: &Connection) {
        match self.stack.disconnect(connection.peripheral_address()).await {
            Ok(()) => debug!(
                "Released half-open link to {}",
                connection.peripheral_address()
            ),
            Err(e) => debug!(
                "Nothing to release for {}: {}",
                connection.peripheral_address(),
                e
            ),
        }
        connection.swap_state(ConnectionState::Disconnected);
        self.emit(connection, ConnectionState::Disconnected);
    }

    /// Disconnect a link.
    ///
    /// Idempotent: a link that is already `Disconnected` is left alone, so
    /// the stack sees at most one disconnect per link. Stack failures are
    /// logged and the link still ends up `Disconnected`.
    pub async fn disconnect(&self, connection: &Connection) {
        let previous = {
            let mut state = connection.state.write();
            let previous = *state;
            if previous == ConnectionState::Connected || previous == ConnectionState::Connecting {
                *state = ConnectionState::Disconnecting;
            }
            previous
        };
        if matches!(
            previous,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            debug!(
                "Link {} already {}, ignoring disconnect",
                connection.link_id(),
                previous
            );
            return;
        }

        self.emit(connection, ConnectionState::Disconnecting);

        match self.stack.disconnect(connection.peripheral_address()).await {
            Ok(()) => info!("Disconnected from {}", connection.peripheral_address()),
            Err(StackError::Disconnected) => {
                debug!("Link to {} was already down", connection.peripheral_address())
            }
            Err(e) => warn!(
                "Failed to disconnect from {}: {}",
                connection.peripheral_address(),
                e
            ),
        }

        connection.swap_state(ConnectionState::Disconnected);

        {
            let mut active = self.active.write();
            if active.as_ref().map(Connection::link_id) == Some(connection.link_id()) {
                *active = None;
            }
        }

        self.emit(connection, ConnectionState::Disconnected);
    }

    fn emit(&self, connection: &Connection, state: ConnectionState) {
        debug!("Link {} state changed: {}", connection.link_id(), state);

        let _ = self.event_tx.send(ConnectionEvent {
            address: connection.peripheral_address(),
            link_id: connection.link_id(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::{sensor_address, FakeStack, StackCall};
    use crate::error::ErrorKind;
    use crate::shutdown::shutdown_channel;

    fn manager(stack: FakeStack) -> (Arc<FakeStack>, ConnectionManager<FakeStack>) {
        let stack = Arc::new(stack);
        (stack.clone(), ConnectionManager::new(stack))
    }

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }

    #[tokio::test]
    async fn test_connect_succeeds() {
        let (_stack, manager) = manager(FakeStack::with_sensor_profile());
        let mut events = manager.subscribe();

        let connection = manager
            .connect(sensor_address(), AddressType::Random, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(connection.is_connected());
        assert_eq!(connection.address_type(), AddressType::Random);
        assert_eq!(manager.active().unwrap().link_id(), connection.link_id());
        assert_eq!(events.recv().await.unwrap().state, ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_timeout_hands_out_nothing() {
        let stack = FakeStack::with_sensor_profile();
        stack.set_connect_delay(Duration::from_millis(200));
        let (_stack, manager) = manager(stack);

        let err = manager
            .connect(sensor_address(), AddressType::Random, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectTimeout);
        assert!(manager.active().is_none());
    }

    #[tokio::test]
    async fn test_connect_timeout_releases_link() {
        let stack = FakeStack::with_sensor_profile();
        stack.set_connect_delay(Duration::from_millis(200));
        let (stack, manager) = manager(stack);
        let mut events = manager.subscribe();

        manager
            .connect(sensor_address(), AddressType::Random, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert_eq!(
            stack.calls(),
            vec![
                StackCall::Connect(sensor_address(), AddressType::Random),
                StackCall::Disconnect(sensor_address()),
            ]
        );
        assert_eq!(events.recv().await.unwrap().state, ConnectionState::Connecting);
        assert_eq!(events.recv().await.unwrap().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let stack = FakeStack::with_sensor_profile();
        stack.set_connect_delay(Duration::from_secs(5));
        let (stack, manager) = manager(stack);
        let (handle, mut signal) = shutdown_channel();

        let started = tokio::time::Instant::now();
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.trigger();
        });
        let outcome = manager
            .connect_until(
                sensor_address(),
                AddressType::Random,
                Duration::from_secs(10),
                &mut signal,
            )
            .await
            .unwrap();
        trigger.await.unwrap();

        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(manager.active().is_none());
        assert_eq!(stack.count(|c| matches!(c, StackCall::Disconnect(_))), 1);
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let stack = FakeStack::with_sensor_profile();
        stack.reject_connect(StackError::Rejected("unreachable".into()));
        let (_stack, manager) = manager(stack);

        let err = manager
            .connect(sensor_address(), AddressType::Random, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectError);
        assert!(manager.active().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (stack, manager) = manager(FakeStack::with_sensor_profile());
        let connection = manager
            .connect(sensor_address(), AddressType::Random, Duration::from_secs(1))
            .await
            .unwrap();

        manager.disconnect(&connection).await;
        manager.disconnect(&connection).await;

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(manager.active().is_none());
        let disconnects = stack
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StackCall::Disconnect(_)))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_disconnect_survives_stack_error() {
        let (stack, manager) = manager(FakeStack::with_sensor_profile());
        let connection = manager
            .connect(sensor_address(), AddressType::Random, Duration::from_secs(1))
            .await
            .unwrap();
        stack.fail_disconnect(StackError::Backend("hci".into()));

        manager.disconnect(&connection).await;

        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_on_disconnect_callback() {
        let (_stack, manager) = manager(FakeStack::with_sensor_profile());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = manager.on_disconnect(move |event| {
            let _ = tx.send(event);
        });

        let connection = manager
            .connect(sensor_address(), AddressType::Random, Duration::from_secs(1))
            .await
            .unwrap();
        manager.disconnect(&connection).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.link_id, connection.link_id());
        assert_eq!(event.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_peripheral_rejected_while_connected() {
        let (_stack, manager) = manager(FakeStack::with_sensor_profile());
        manager
            .connect(sensor_address(), AddressType::Random, Duration::from_secs(1))
            .await
            .unwrap();

        let other = BDAddr::from([1, 2, 3, 4, 5, 6]);
        let err = manager
            .connect(other, AddressType::Public, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectError);
    }
}
