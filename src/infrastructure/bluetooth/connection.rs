//! SPP Connection Module
//!
//! Discovery, connect/disconnect and device bookkeeping for a single RFCOMM
//! peer. Public calls never block: they start work on the transport and
//! return, and completion is reported later through the callbacks.
//!
//! Threading: transport events arrive on whatever thread the backend uses.
//! Device bookkeeping sits behind a reader/writer lock, the state is a single
//! atomic, and callbacks are invoked with no internal lock held.

use crate::domain::device::{BluetoothAddress, ConnectionState, DiscoveredDevice};
use crate::error::LinkError;
use crate::infrastructure::bluetooth::transport::{
    platform_transport, EventHandler, EventSink, SppTransport, TransportEvent, SPP_SERVICE_UUID,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Fired when the state changes, with the error text (empty if none).
pub type StateCallback = Arc<dyn Fn(ConnectionState, &str) + Send + Sync>;
/// Fired for every discovery upsert.
pub type DeviceCallback = Arc<dyn Fn(&DiscoveredDevice) + Send + Sync>;
/// Fired with the whole discovered list when discovery finishes.
pub type ScanCompleteCallback = Arc<dyn Fn(&[DiscoveredDevice]) + Send + Sync>;
/// Fired once per inbound read.
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

const NO_ADAPTER_MESSAGE: &str = "Bluetooth adapter not available";
const INVALID_ADDRESS_MESSAGE: &str = "Invalid Bluetooth address";
const SEEDED_DEVICE_NAME: &str = "Connected Device";
const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

#[derive(Default)]
struct Devices {
    discovered: Vec<DiscoveredDevice>,
    connected: Option<DiscoveredDevice>,
}

#[derive(Default)]
struct Callbacks {
    state: RwLock<Option<StateCallback>>,
    device: RwLock<Option<DeviceCallback>>,
    scan_complete: RwLock<Option<ScanCompleteCallback>>,
    data: RwLock<Option<DataCallback>>,
}

struct Shared {
    transport: Arc<dyn SppTransport>,
    state: AtomicU8,
    initialized: AtomicBool,
    devices: RwLock<Devices>,
    last_error: RwLock<String>,
    callbacks: Callbacks,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Records `message` (if any) and notifies only on an actual change.
    fn set_state(&self, new_state: ConnectionState, message: &str) {
        if !message.is_empty() {
            *self.last_error.write() = message.to_string();
        }

        let old_state =
            ConnectionState::from_u8(self.state.swap(new_state.as_u8(), Ordering::Relaxed));
        if old_state == new_state {
            return;
        }
        self.notify(old_state, new_state, message);
    }

    /// `set_state`, but only out of `from`. Returns whether it moved.
    fn transition(&self, from: ConnectionState, to: ConnectionState, message: &str) -> bool {
        if self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        if !message.is_empty() {
            *self.last_error.write() = message.to_string();
        }
        self.notify(from, to, message);
        true
    }

    fn notify(&self, old_state: ConnectionState, new_state: ConnectionState, message: &str) {
        if message.is_empty() {
            info!("Connection state: {} -> {}", old_state, new_state);
        } else {
            warn!("Connection state: {} -> {} ({})", old_state, new_state, message);
        }

        let callback = self.callbacks.state.read().clone();
        if let Some(callback) = callback {
            callback(new_state, message);
        }
    }

    fn set_last_error(&self, message: &str) {
        *self.last_error.write() = message.to_string();
    }

    fn clear_connected(&self) {
        self.devices.write().connected = None;
    }

    fn upsert_device(&self, mut device: DiscoveredDevice) {
        if let Ok(address) = device.address.parse::<BluetoothAddress>() {
            device.address = address.to_string();
        }

        {
            let mut devices = self.devices.write();
            match devices
                .discovered
                .iter_mut()
                .find(|known| known.address == device.address)
            {
                Some(known) => *known = device.clone(),
                None => devices.discovered.push(device.clone()),
            }
        }

        debug!(
            address = %device.address,
            rssi = device.rssi,
            "Discovered device: {}",
            device.name
        );

        let callback = self.callbacks.device.read().clone();
        if let Some(callback) = callback {
            callback(&device);
        }
    }

    fn finish_scan(&self) {
        if self.state() == ConnectionState::Scanning {
            self.set_state(ConnectionState::Disconnected, "");
        }

        let snapshot = self.devices.read().discovered.clone();
        info!("Scan complete, {} device(s) found", snapshot.len());

        let callback = self.callbacks.scan_complete.read().clone();
        if let Some(callback) = callback {
            callback(&snapshot);
        }
    }
}

impl EventHandler for Shared {
    fn on_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceDiscovered(device) => self.upsert_device(device),
            TransportEvent::DiscoveryFinished => self.finish_scan(),
            TransportEvent::DiscoveryFailed(fault) => {
                if self.state() != ConnectionState::Scanning {
                    debug!("Ignoring discovery fault in state {}: {}", self.state(), fault);
                    return;
                }
                error!("Discovery failed: {}", fault);
                self.set_state(ConnectionState::Error, &fault.to_string());
            }
            TransportEvent::Connected => {
                if self.state() != ConnectionState::Connecting {
                    debug!("Ignoring connect completion in state {}", self.state());
                    return;
                }
                if let Some(device) = self.devices.write().connected.as_mut() {
                    device.is_connected = true;
                }
                self.set_state(ConnectionState::Connected, "");
            }
            TransportEvent::Disconnected => {
                if matches!(
                    self.state(),
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    self.clear_connected();
                    self.set_state(ConnectionState::Disconnected, "");
                }
            }
            TransportEvent::SocketFailed(fault) => {
                error!("Socket error: {}", fault);
                self.clear_connected();
                self.set_state(ConnectionState::Error, &fault.to_string());
            }
            TransportEvent::DataReceived(bytes) => {
                if bytes.is_empty() {
                    return;
                }
                trace!(len = bytes.len(), "Received data");
                let callback = self.callbacks.data.read().clone();
                if let Some(callback) = callback {
                    callback(&bytes);
                }
            }
        }
    }
}

/// Owns the link to one SPP peer.
///
/// Construct one per process and share it by reference or `Arc`.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Wrap `transport`. Nothing touches the adapter until [`Self::initialize`].
    pub fn new(transport: Arc<dyn SppTransport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                initialized: AtomicBool::new(false),
                devices: RwLock::new(Devices::default()),
                last_error: RwLock::new(String::new()),
                callbacks: Callbacks::default(),
            }),
        }
    }

    /// Uses the native backend for this build.
    pub fn with_platform_transport() -> Self {
        Self::new(platform_transport())
    }

    /// Binds to the adapter. Safe to call more than once.
    pub fn initialize(&self) -> Result<(), LinkError> {
        if self.shared.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        if !self.shared.transport.is_available() {
            warn!("{}", NO_ADAPTER_MESSAGE);
            self.shared.set_last_error(NO_ADAPTER_MESSAGE);
            return Err(LinkError::NotSupported);
        }

        let handler: Arc<dyn EventHandler> = self.shared.clone();
        self.shared
            .transport
            .attach(EventSink::new(Arc::downgrade(&handler)));
        self.shared.initialized.store(true, Ordering::Release);

        info!("Bluetooth link initialized");
        Ok(())
    }

    /// Start discovery. `timeout_ms == 0` uses the platform default.
    ///
    /// The discovered list is reset and seeded with the devices the platform
    /// already has connections to.
    pub fn start_scan(&self, timeout_ms: u32) -> Result<(), LinkError> {
        if !self.is_available() {
            return Err(LinkError::NotSupported);
        }
        if !self.is_enabled() {
            return Err(LinkError::NotEnabled);
        }
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(LinkError::AlreadyConnected);
        }

        let transport = &self.shared.transport;
        if transport.is_discovering() {
            transport.stop_discovery();
        }

        let mut seeds: Vec<DiscoveredDevice> = Vec::new();
        for address in transport.connected_devices() {
            let address = address.to_string();
            if seeds.iter().any(|seed| seed.address == address) {
                continue;
            }
            seeds.push(DiscoveredDevice {
                name: SEEDED_DEVICE_NAME.to_string(),
                address,
                rssi: 0,
                is_paired: true,
                is_connected: true,
            });
        }
        debug!("Seeded {} connected device(s)", seeds.len());
        // No discovered callback for seeds.
        self.shared.devices.write().discovered = seeds;

        let timeout = (timeout_ms > 0).then(|| Duration::from_millis(u64::from(timeout_ms)));
        info!("Starting device discovery (timeout: {:?})", timeout);
        self.shared.set_state(ConnectionState::Scanning, "");

        if let Err(fault) = transport.start_discovery(timeout) {
            error!("Failed to start discovery: {}", fault);
            self.shared
                .set_state(ConnectionState::Error, &fault.to_string());
            return Err(fault.link_error());
        }
        Ok(())
    }

    /// Stop discovery. Does not report a completed scan.
    pub fn stop_scan(&self) {
        let transport = &self.shared.transport;
        if transport.is_discovering() {
            info!("Stopping device discovery");
            transport.stop_discovery();
        }
        if self.state() == ConnectionState::Scanning {
            self.shared.set_state(ConnectionState::Disconnected, "");
        }
    }

    /// Begin connecting to `address` (`AA:BB:CC:DD:EE:FF`).
    ///
    /// Returns once the attempt has started; [`ConnectionState::Connected`]
    /// is reported through the state callback. There is no built-in
    /// deadline, see [`crate::infrastructure::bluetooth::keepalive`].
    pub fn connect(&self, address: &str) -> Result<(), LinkError> {
        if !self.is_available() {
            return Err(LinkError::NotSupported);
        }
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(LinkError::AlreadyConnected);
        }

        let address = match address.parse::<BluetoothAddress>() {
            Ok(address) => address,
            Err(e) => {
                warn!("{}", e);
                self.shared.set_last_error(INVALID_ADDRESS_MESSAGE);
                return Err(LinkError::DeviceNotFound);
            }
        };

        self.stop_scan();

        {
            let mut devices = self.shared.devices.write();
            let key = address.to_string();
            let known = devices
                .discovered
                .iter()
                .find(|device| device.address == key)
                .cloned();
            devices.connected = Some(match known {
                Some(device) => DiscoveredDevice {
                    is_connected: false,
                    ..device
                },
                None => DiscoveredDevice {
                    name: UNKNOWN_DEVICE_NAME.to_string(),
                    address: key,
                    ..DiscoveredDevice::default()
                },
            });
        }

        info!("Connecting to {}", address);
        self.shared.set_state(ConnectionState::Connecting, "");

        if let Err(fault) = self.shared.transport.connect(address, SPP_SERVICE_UUID) {
            error!("Failed to connect to {}: {}", address, fault);
            self.shared.clear_connected();
            self.shared
                .set_state(ConnectionState::Error, &fault.to_string());
            return Err(fault.link_error());
        }
        Ok(())
    }

    /// Close the link or abort a pending connect. Disconnecting an idle
    /// manager succeeds without side effects.
    pub fn disconnect(&self) -> Result<(), LinkError> {
        match self.state() {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Scanning => {
                self.stop_scan();
                Ok(())
            }
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Error => {
                info!("Disconnecting");
                self.shared.transport.disconnect();
                self.shared.clear_connected();
                self.shared.set_state(ConnectionState::Disconnected, "");
                Ok(())
            }
        }
    }

    /// Write raw bytes to the open socket.
    pub fn send(&self, data: &[u8]) -> Result<usize, LinkError> {
        if !self.is_available() {
            return Err(LinkError::NotSupported);
        }
        if self.state() != ConnectionState::Connected || !self.shared.transport.is_open() {
            return Err(LinkError::NotConnected);
        }

        match self.shared.transport.write(data) {
            Ok(written) => {
                trace!(len = written, "Sent data");
                Ok(written)
            }
            Err(fault) => {
                warn!("Failed to send {} bytes: {}", data.len(), fault);
                self.shared.set_last_error(&fault.to_string());
                Err(LinkError::SendFailed)
            }
        }
    }

    /// Abandon a connect that is still pending, leaving
    /// [`ConnectionState::Error`] with `message`.
    ///
    /// The check and the state change are one atomic step, so a completion
    /// racing with this call is ignored and its socket closed. Returns
    /// `false` if no connect was pending.
    pub(crate) fn abort_connect(&self, message: &str) -> bool {
        if !self
            .shared
            .transition(ConnectionState::Connecting, ConnectionState::Error, message)
        {
            return false;
        }
        warn!("Aborting pending connect: {}", message);
        self.shared.transport.disconnect();
        self.shared.clear_connected();
        true
    }

    /// Latest known state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// True only in [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Initialized and backed by an adapter.
    pub fn is_available(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire) && self.shared.transport.is_available()
    }

    /// Available and the radio is on.
    pub fn is_enabled(&self) -> bool {
        self.is_available() && self.shared.transport.is_powered()
    }

    /// Snapshot of the devices found since the last scan started.
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.shared.devices.read().discovered.clone()
    }

    /// The peer being connected to or connected, if any.
    pub fn connected_device(&self) -> Option<DiscoveredDevice> {
        self.shared.devices.read().connected.clone()
    }

    /// Text of the most recent failure. Not cleared on recovery.
    pub fn last_error(&self) -> String {
        self.shared.last_error.read().clone()
    }

    /// Replace the state-change callback.
    pub fn set_state_callback(
        &self,
        callback: impl Fn(ConnectionState, &str) + Send + Sync + 'static,
    ) {
        *self.shared.callbacks.state.write() = Some(Arc::new(callback));
    }

    /// Replace the device-discovered callback.
    pub fn set_device_discovered_callback(
        &self,
        callback: impl Fn(&DiscoveredDevice) + Send + Sync + 'static,
    ) {
        *self.shared.callbacks.device.write() = Some(Arc::new(callback));
    }

    /// Replace the scan-complete callback.
    pub fn set_scan_complete_callback(
        &self,
        callback: impl Fn(&[DiscoveredDevice]) + Send + Sync + 'static,
    ) {
        *self.shared.callbacks.scan_complete.write() = Some(Arc::new(callback));
    }

    /// Replace the data-received callback.
    pub fn set_data_received_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.shared.callbacks.data.write() = Some(Arc::new(callback));
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let transport = &self.shared.transport;
        transport.attach(EventSink::detached());
        if transport.is_discovering() {
            transport.stop_discovery();
        }
        if transport.is_open()
            || matches!(
                self.shared.state(),
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            transport.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiscoveryFault, SocketFault};
    use crate::infrastructure::bluetooth::transport::testing::{scripted, Remote};
    use crate::infrastructure::bluetooth::transport::UnsupportedTransport;
    use parking_lot::Mutex;

    const ADDR: &str = "24:0A:C4:12:34:56";

    fn manager() -> (ConnectionManager, Arc<Remote>) {
        let (transport, remote) = scripted();
        let manager = ConnectionManager::new(Arc::new(transport));
        manager.initialize().unwrap();
        (manager, remote)
    }

    fn record_states(manager: &ConnectionManager) -> Arc<Mutex<Vec<(ConnectionState, String)>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        manager.set_state_callback(move |state, message| {
            sink.lock().push((state, message.to_string()));
        });
        states
    }

    fn connected() -> (ConnectionManager, Arc<Remote>) {
        let (manager, remote) = manager();
        manager.connect(ADDR).unwrap();
        remote.accept();
        assert_eq!(manager.state(), ConnectionState::Connected);
        (manager, remote)
    }

    #[test]
    fn test_initialize_requires_adapter() {
        let (transport, remote) = scripted();
        remote.available.store(false, Ordering::SeqCst);
        let manager = ConnectionManager::new(Arc::new(transport));

        assert_eq!(manager.initialize(), Err(LinkError::NotSupported));
        assert_eq!(manager.last_error(), "Bluetooth adapter not available");
        assert!(!remote.is_attached());
        assert!(!manager.is_available());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (manager, remote) = manager();
        assert!(remote.is_attached());
        assert_eq!(manager.initialize(), Ok(()));
        assert!(manager.is_available());
        assert!(manager.is_enabled());
    }

    #[test]
    fn test_operations_before_initialize() {
        let (transport, _remote) = scripted();
        let manager = ConnectionManager::new(Arc::new(transport));
        assert!(!manager.is_available());
        assert_eq!(manager.start_scan(0), Err(LinkError::NotSupported));
        assert_eq!(manager.connect(ADDR), Err(LinkError::NotSupported));
        assert_eq!(manager.send(b"x"), Err(LinkError::NotSupported));
    }

    #[test]
    fn test_scan_lifecycle() {
        let (manager, remote) = manager();
        let completed = Arc::new(Mutex::new(None));
        let sink = completed.clone();
        manager.set_scan_complete_callback(move |devices| {
            *sink.lock() = Some(devices.to_vec());
        });

        manager.start_scan(5000).unwrap();
        assert_eq!(manager.state(), ConnectionState::Scanning);
        assert!(manager.discovered_devices().is_empty());
        assert_eq!(
            *remote.last_timeout.lock(),
            Some(Some(Duration::from_millis(5000)))
        );

        remote.discover(ADDR, "FaceTracker", -60);
        remote.finish_discovery();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        let devices = completed.lock().clone().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "FaceTracker");
    }

    #[test]
    fn test_zero_timeout_uses_platform_default() {
        let (manager, remote) = manager();
        manager.start_scan(0).unwrap();
        assert_eq!(*remote.last_timeout.lock(), Some(None));
    }

    #[test]
    fn test_stop_scan() {
        let (manager, remote) = manager();
        let completions = Arc::new(Mutex::new(0));
        let sink = completions.clone();
        manager.set_scan_complete_callback(move |_| *sink.lock() += 1);

        manager.start_scan(10_000).unwrap();
        assert!(remote.is_discovering());
        manager.stop_scan();

        assert!(!remote.is_discovering());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(*completions.lock(), 0);
    }

    #[test]
    fn test_scan_seeds_connected_devices() {
        let (manager, remote) = manager();
        remote
            .connected_devices
            .lock()
            .push(BluetoothAddress::new([0x24, 0x0A, 0xC4, 0x12, 0x34, 0x56]));

        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        manager.set_device_discovered_callback(move |_| *sink.lock() += 1);

        manager.start_scan(0).unwrap();
        let devices = manager.discovered_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, ADDR);
        assert_eq!(devices[0].name, "Connected Device");
        assert!(devices[0].is_paired);
        assert!(devices[0].is_connected);
        assert_eq!(*seen.lock(), 0);

        // A real sighting of the same device replaces the seed.
        remote.discover(ADDR, "FaceTracker", -45);
        let devices = manager.discovered_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "FaceTracker");
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_discovery_dedup_keeps_latest_rssi() {
        let (manager, remote) = manager();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        manager.set_device_discovered_callback(move |_| *sink.lock() += 1);

        manager.start_scan(0).unwrap();
        remote.discover(ADDR, "FaceTracker", -70);
        remote.discover("24:0a:c4:12:34:56", "FaceTracker", -40);
        remote.discover("11:22:33:44:55:66", "Headset", -80);

        let devices = manager.discovered_devices();
        assert_eq!(devices.len(), 2);
        let tracker = devices.iter().find(|d| d.address == ADDR).unwrap();
        assert_eq!(tracker.rssi, -40);
        assert_eq!(*seen.lock(), 3);
    }

    #[test]
    fn test_discovered_devices_persist_until_next_scan() {
        let (manager, remote) = manager();
        manager.start_scan(0).unwrap();
        remote.discover(ADDR, "FaceTracker", -60);
        remote.finish_discovery();
        assert_eq!(manager.discovered_devices().len(), 1);

        manager.start_scan(0).unwrap();
        assert!(manager.discovered_devices().is_empty());
    }

    #[test]
    fn test_scan_requires_powered_adapter() {
        let (manager, remote) = manager();
        remote.powered.store(false, Ordering::SeqCst);
        let states = record_states(&manager);

        assert_eq!(manager.start_scan(0), Err(LinkError::NotEnabled));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(states.lock().is_empty());
    }

    #[test]
    fn test_scan_start_failure_enters_error() {
        let (manager, remote) = manager();
        *remote.discovery_fault.lock() = Some(DiscoveryFault::InputOutput);

        assert_eq!(manager.start_scan(0), Err(LinkError::Internal));
        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(manager.last_error(), "I/O error during discovery");
    }

    #[test]
    fn test_discovery_fault_event() {
        let (manager, remote) = manager();
        let states = record_states(&manager);
        manager.start_scan(0).unwrap();
        remote.fail_discovery(DiscoveryFault::PoweredOff);

        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(
            *states.lock(),
            vec![
                (ConnectionState::Scanning, String::new()),
                (ConnectionState::Error, "Bluetooth is powered off".to_string()),
            ]
        );
    }

    #[test]
    fn test_late_discovery_fault_keeps_link() {
        let (manager, remote) = connected();
        let states = record_states(&manager);
        remote.fail_discovery(DiscoveryFault::InputOutput);

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.connected_device().is_some());
        assert!(states.lock().is_empty());
        assert_eq!(manager.send(b"ok"), Ok(2));
    }

    #[test]
    fn test_connect_flow() {
        let (manager, remote) = manager();
        let states = record_states(&manager);
        manager.start_scan(0).unwrap();
        remote.discover(ADDR, "FaceTracker", -55);

        manager.connect("24:0a:c4:12:34:56").unwrap();
        assert!(!remote.is_discovering());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        let pending = manager.connected_device().unwrap();
        assert_eq!(pending.name, "FaceTracker");
        assert!(!pending.is_connected);

        let calls = remote.connect_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.to_string(), ADDR);
        assert_eq!(calls[0].1, SPP_SERVICE_UUID);

        remote.accept();
        assert!(manager.is_connected());
        assert!(manager.connected_device().unwrap().is_connected);
        assert_eq!(
            states
                .lock()
                .iter()
                .map(|(state, _)| *state)
                .collect::<Vec<_>>(),
            vec![
                ConnectionState::Scanning,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[test]
    fn test_connect_unknown_device_uses_placeholder_name() {
        let (manager, _remote) = manager();
        manager.connect(ADDR).unwrap();
        let pending = manager.connected_device().unwrap();
        assert_eq!(pending.name, "Unknown Device");
        assert_eq!(pending.address, ADDR);
    }

    #[test]
    fn test_connect_when_connected() {
        let (manager, remote) = connected();
        let states = record_states(&manager);

        assert_eq!(manager.connect(ADDR), Err(LinkError::AlreadyConnected));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(remote.connect_calls.lock().len(), 1);
        assert!(states.lock().is_empty());
    }

    #[test]
    fn test_connect_invalid_address_keeps_state() {
        let (manager, remote) = manager();
        manager.start_scan(0).unwrap();

        assert_eq!(manager.connect("not-an-address"), Err(LinkError::DeviceNotFound));
        assert_eq!(manager.state(), ConnectionState::Scanning);
        assert!(remote.is_discovering());
        assert_eq!(manager.last_error(), "Invalid Bluetooth address");
        assert!(remote.connect_calls.lock().is_empty());
    }

    #[test]
    fn test_connect_refused() {
        let (manager, remote) = manager();
        *remote.connect_fault.lock() = Some(SocketFault::HostNotFound);

        assert_eq!(manager.connect(ADDR), Err(LinkError::DeviceNotFound));
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.connected_device().is_none());
        assert_eq!(manager.last_error(), "Device not found");
    }

    #[test]
    fn test_socket_error_while_connecting() {
        let (manager, remote) = manager();
        let states = record_states(&manager);
        manager.connect(ADDR).unwrap();
        remote.socket_error(SocketFault::ServiceNotFound);

        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.connected_device().is_none());
        assert_eq!(manager.last_error(), "Service not found on device");

        // A late completion is ignored.
        remote.accept();
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.connected_device().is_none());
        assert_eq!(
            states
                .lock()
                .iter()
                .map(|(state, _)| *state)
                .collect::<Vec<_>>(),
            vec![ConnectionState::Connecting, ConnectionState::Error]
        );
    }

    #[test]
    fn test_abort_connect() {
        let (manager, remote) = manager();
        let states = record_states(&manager);
        assert!(!manager.abort_connect("gave up"));

        manager.connect(ADDR).unwrap();
        assert!(manager.abort_connect("gave up"));
        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(manager.last_error(), "gave up");
        assert!(manager.connected_device().is_none());
        assert_eq!(*remote.disconnect_calls.lock(), 1);

        // The handshake finishing afterwards does not revive the link.
        remote.accept();
        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(
            *states.lock(),
            vec![
                (ConnectionState::Connecting, String::new()),
                (ConnectionState::Error, "gave up".to_string()),
            ]
        );
    }

    #[test]
    fn test_abort_connect_leaves_live_link() {
        let (manager, remote) = connected();
        assert!(!manager.abort_connect("gave up"));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(*remote.disconnect_calls.lock(), 0);
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let (manager, remote) = manager();
        let states = record_states(&manager);

        assert_eq!(manager.disconnect(), Ok(()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(states.lock().is_empty());
        assert_eq!(*remote.disconnect_calls.lock(), 0);
    }

    #[test]
    fn test_disconnect_connected() {
        let (manager, remote) = connected();
        let states = record_states(&manager);

        manager.disconnect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.connected_device().is_none());
        assert_eq!(*remote.disconnect_calls.lock(), 1);
        assert_eq!(
            *states.lock(),
            vec![(ConnectionState::Disconnected, String::new())]
        );
    }

    #[test]
    fn test_disconnect_aborts_pending_connect() {
        let (manager, remote) = manager();
        manager.connect(ADDR).unwrap();
        manager.disconnect().unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.connected_device().is_none());
        // A late completion is ignored.
        remote.accept();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_clears_error() {
        let (manager, remote) = connected();
        remote.socket_error(SocketFault::Network);
        assert_eq!(manager.state(), ConnectionState::Error);

        manager.disconnect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.last_error(), "Network error");
    }

    #[test]
    fn test_peer_close() {
        let (manager, remote) = connected();
        remote.peer_close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.connected_device().is_none());
        assert_eq!(manager.send(b"x"), Err(LinkError::NotConnected));
    }

    #[test]
    fn test_socket_error_clears_device() {
        let (manager, remote) = connected();
        let states = record_states(&manager);
        remote.socket_error(SocketFault::RemoteHostClosed);

        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.connected_device().is_none());
        assert_eq!(manager.last_error(), "Connection closed by remote device");
        assert_eq!(
            *states.lock(),
            vec![(
                ConnectionState::Error,
                "Connection closed by remote device".to_string()
            )]
        );

        // A trailing close notification does not hide the error.
        remote.peer_close();
        assert_eq!(manager.state(), ConnectionState::Error);
    }

    #[test]
    fn test_send_requires_connection() {
        let (manager, remote) = manager();
        assert_eq!(manager.send(b"hello"), Err(LinkError::NotConnected));

        manager.connect(ADDR).unwrap();
        assert_eq!(manager.send(b"hello"), Err(LinkError::NotConnected));

        remote.accept();
        assert_eq!(manager.send(b"hello"), Ok(5));
        assert_eq!(*remote.written.lock(), vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_send_write_fault() {
        let (manager, remote) = connected();
        *remote.write_fault.lock() = Some(SocketFault::Network);

        assert_eq!(manager.send(b"hello"), Err(LinkError::SendFailed));
        assert_eq!(manager.last_error(), "Network error");
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_queued_write_failure_reported_later() {
        let (manager, remote) = connected();
        assert_eq!(manager.send(b"hello"), Ok(5));

        remote.socket_error(SocketFault::Network);
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(manager.connected_device().is_none());
        assert_eq!(manager.send(b"again"), Err(LinkError::NotConnected));
    }

    #[test]
    fn test_data_callback() {
        let (manager, remote) = connected();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        manager.set_data_received_callback(move |bytes| sink.lock().push(bytes.to_vec()));

        remote.receive(&[1, 2, 3]);
        remote.receive(&[]);
        remote.receive(&[4]);
        assert_eq!(*received.lock(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn test_callbacks_are_replaceable() {
        let (manager, remote) = manager();
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));

        let sink = first.clone();
        manager.set_device_discovered_callback(move |_| *sink.lock() += 1);
        let sink = second.clone();
        manager.set_device_discovered_callback(move |_| *sink.lock() += 1);

        manager.start_scan(0).unwrap();
        remote.discover(ADDR, "FaceTracker", -50);
        assert_eq!(*first.lock(), 0);
        assert_eq!(*second.lock(), 1);
    }

    #[test]
    fn test_state_callback_only_fires_on_change() {
        let (manager, remote) = manager();
        let states = record_states(&manager);

        manager.start_scan(0).unwrap();
        manager.start_scan(0).unwrap();
        manager.stop_scan();
        manager.stop_scan();
        remote.finish_discovery();

        assert_eq!(
            *states.lock(),
            vec![
                (ConnectionState::Scanning, String::new()),
                (ConnectionState::Disconnected, String::new()),
            ]
        );
    }

    #[test]
    fn test_concurrent_readers_during_discovery() {
        let (manager, remote) = manager();
        manager.start_scan(0).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200u8 {
                    let address = format!("24:0A:C4:00:00:{:02X}", i);
                    remote.discover(&address, "dev", -(i as i16));
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    let devices = manager.discovered_devices();
                    assert!(devices.len() <= 200);
                    let _ = manager.state();
                }
            });
        });

        assert_eq!(manager.discovered_devices().len(), 200);
    }

    #[test]
    fn test_unsupported_platform_fallback() {
        let manager = ConnectionManager::new(Arc::new(UnsupportedTransport));
        assert_eq!(manager.initialize(), Err(LinkError::NotSupported));
        assert!(!manager.is_available());
        assert!(!manager.is_enabled());
        assert_eq!(manager.start_scan(1000), Err(LinkError::NotSupported));
        assert_eq!(manager.connect(ADDR), Err(LinkError::NotSupported));
        assert_eq!(manager.send(b"x"), Err(LinkError::NotSupported));
        assert_eq!(manager.disconnect(), Ok(()));
        manager.stop_scan();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.discovered_devices().is_empty());
        assert!(manager.connected_device().is_none());
    }

    #[test]
    fn test_drop_closes_socket() {
        let (manager, remote) = connected();
        drop(manager);
        assert_eq!(*remote.disconnect_calls.lock(), 1);
    }
}
