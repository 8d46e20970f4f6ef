//! WinRT RFCOMM Backend
//!
//! Classic discovery runs through an association-endpoint `DeviceWatcher`.
//! Sockets are `StreamSocket`s opened against the peer's RFCOMM service.
//! Anything that has to await a WinRT operation runs on a dedicated
//! `spp-io` thread with its own single-threaded tokio runtime. That includes
//! socket writes and the connected-device query, so no trait method waits
//! on the radio.
//!
//! Every discovery run and every connect attempt gets a generation number.
//! Events from a run that has since been stopped or superseded are dropped.

use super::transport::{EventSink, SppTransport, TransportEvent};
use crate::domain::device::{BluetoothAddress, DiscoveredDevice};
use crate::error::{DiscoveryFault, SocketFault};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use windows::core::{IInspectable, Interface, GUID, HSTRING};
use windows::Devices::Bluetooth::Rfcomm::RfcommServiceId;
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothDevice,
    BluetoothError,
};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate, DeviceWatcher,
    DeviceWatcherStatus,
};
use windows::Devices::Radios::{Radio, RadioState};
use windows::Foundation::Collections::IIterable;
use windows::Foundation::{IReference, TypedEventHandler};
use windows::Networking::Sockets::StreamSocket;
use windows::Storage::Streams::{DataReader, DataWriter, InputStreamOptions};
use windows_future::IAsyncOperation;

/// Association-endpoint protocol id of Bluetooth Classic.
const CLASSIC_PROTOCOL_ID: &str = "{e0cbf06c-cd8b-4647-bb8a-263b43f0f974}";
const DEVICE_ADDRESS_PROPERTY: &str = "System.Devices.Aep.DeviceAddress";
const IS_PAIRED_PROPERTY: &str = "System.Devices.Aep.IsPaired";
const SIGNAL_STRENGTH_PROPERTY: &str = "System.Devices.Aep.SignalStrength";

/// Largest single read from the socket.
const READ_CHUNK: u32 = 1024;

// HRESULTs worth telling apart.
const E_ELEMENT_NOT_FOUND: u32 = 0x8007_0490;
const WSAECONNABORTED: u32 = 0x8007_2745;
const WSAECONNRESET: u32 = 0x8007_2746;
const WSAETIMEDOUT: u32 = 0x8007_274C;
const WSAEHOSTUNREACH: u32 = 0x8007_2751;

fn socket_fault(e: windows::core::Error) -> SocketFault {
    match e.code().0 as u32 {
        E_ELEMENT_NOT_FOUND => SocketFault::HostNotFound,
        WSAECONNABORTED | WSAECONNRESET => SocketFault::RemoteHostClosed,
        WSAETIMEDOUT | WSAEHOSTUNREACH => SocketFault::Network,
        _ => SocketFault::Other(e.message().to_string()),
    }
}

enum IoCommand {
    Connect {
        address: BluetoothAddress,
        service: Uuid,
        generation: u64,
    },
    DiscoveryDeadline {
        after: Duration,
        generation: u64,
    },
    Resolve {
        id: HSTRING,
        name: String,
        rssi: i16,
        is_paired: bool,
        generation: u64,
    },
    RefreshConnected,
}

struct Inner {
    sink: RwLock<EventSink>,
    adapter: Option<BluetoothAdapter>,
    radio: Option<Radio>,
    watcher: Mutex<Option<DeviceWatcher>>,
    discovering: AtomicBool,
    discovery_generation: AtomicU64,
    /// Last answer from the platform, refreshed on the worker.
    connected: RwLock<Vec<BluetoothAddress>>,
    socket: Mutex<Option<StreamSocket>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    pending: AtomicBool,
    socket_generation: AtomicU64,
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        let sink = self.sink.read().clone();
        sink.emit(event);
    }

    fn is_current_discovery(&self, generation: u64) -> bool {
        self.discovery_generation.load(Ordering::SeqCst) == generation
    }

    fn is_current_socket(&self, generation: u64) -> bool {
        self.socket_generation.load(Ordering::SeqCst) == generation
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            let running = matches!(
                watcher.Status(),
                Ok(DeviceWatcherStatus::Started) | Ok(DeviceWatcherStatus::EnumerationCompleted)
            );
            if running {
                if let Err(e) = watcher.Stop() {
                    debug!("DeviceWatcher.Stop failed: {:?}", e);
                }
            }
        }
    }

    /// Ends discovery run `generation`, reporting `fault` if given.
    fn finish_discovery(&self, generation: u64, fault: Option<DiscoveryFault>) {
        if !self.is_current_discovery(generation) || !self.discovering.swap(false, Ordering::SeqCst)
        {
            return;
        }
        self.stop_watcher();
        match fault {
            Some(fault) => self.emit(TransportEvent::DiscoveryFailed(fault)),
            None => self.emit(TransportEvent::DiscoveryFinished),
        }
    }

    fn close_socket(&self) -> bool {
        self.outbound.lock().take();
        match self.socket.lock().take() {
            Some(socket) => {
                if let Err(e) = socket.Close() {
                    debug!("StreamSocket.Close failed: {:?}", e);
                }
                true
            }
            None => false,
        }
    }
}

/// RFCOMM transport backed by `Windows.Devices.Bluetooth`.
pub struct WinRtTransport {
    inner: Arc<Inner>,
    commands: mpsc::UnboundedSender<IoCommand>,
}

impl WinRtTransport {
    pub fn new() -> anyhow::Result<Self> {
        let adapter = BluetoothAdapter::GetDefaultAsync()
            .and_then(|op| op.get())
            .ok();
        let radio = adapter
            .as_ref()
            .and_then(|adapter| adapter.GetRadioAsync().and_then(|op| op.get()).ok());

        if adapter.is_none() {
            warn!("No Bluetooth adapter found");
        }

        let inner = Arc::new(Inner {
            sink: RwLock::new(EventSink::detached()),
            adapter,
            radio,
            watcher: Mutex::new(None),
            discovering: AtomicBool::new(false),
            discovery_generation: AtomicU64::new(0),
            connected: RwLock::new(Vec::new()),
            socket: Mutex::new(None),
            outbound: Mutex::new(None),
            pending: AtomicBool::new(false),
            socket_generation: AtomicU64::new(0),
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let worker_inner = inner.clone();
        std::thread::Builder::new()
            .name("spp-io".to_string())
            .spawn(move || run_worker(worker_inner, rx))?;
        let _ = commands.send(IoCommand::RefreshConnected);

        Ok(Self { inner, commands })
    }

    fn create_watcher(&self, generation: u64) -> windows::core::Result<DeviceWatcher> {
        let selector = HSTRING::from(format!(
            "System.Devices.Aep.ProtocolId:=\"{}\"",
            CLASSIC_PROTOCOL_ID
        ));
        let properties: IIterable<HSTRING> = vec![
            HSTRING::from(DEVICE_ADDRESS_PROPERTY),
            HSTRING::from(IS_PAIRED_PROPERTY),
            HSTRING::from(SIGNAL_STRENGTH_PROPERTY),
        ]
        .into();
        let watcher = DeviceInformation::CreateWatcherWithKindAqsFilterAndAdditionalProperties(
            &selector,
            &properties,
            DeviceInformationKind::AssociationEndpoint,
        )?;

        let commands = self.commands.clone();
        let added = TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  info: windows::core::Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    let is_paired = info
                        .Pairing()
                        .and_then(|pairing| pairing.IsPaired())
                        .unwrap_or(false);
                    let _ = commands.send(IoCommand::Resolve {
                        id: info.Id()?,
                        name: info.Name()?.to_string(),
                        rssi: signal_strength(info).unwrap_or(0),
                        is_paired,
                        generation,
                    });
                }
                Ok(())
            },
        );
        watcher.Added(&added)?;

        // Updates and removals must be observed for the watcher to keep
        // reporting additions after the initial enumeration.
        let ignore_update = TypedEventHandler::new(
            |_: windows::core::Ref<DeviceWatcher>,
             _: windows::core::Ref<DeviceInformationUpdate>| Ok(()),
        );
        watcher.Updated(&ignore_update)?;
        watcher.Removed(&ignore_update)?;

        let inner = self.inner.clone();
        let completed = TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>, _: windows::core::Ref<IInspectable>| {
                debug!("Device enumeration completed");
                inner.finish_discovery(generation, None);
                Ok(())
            },
        );
        watcher.EnumerationCompleted(&completed)?;

        let inner = self.inner.clone();
        let stopped = TypedEventHandler::new(
            move |watcher: windows::core::Ref<DeviceWatcher>,
                  _: windows::core::Ref<IInspectable>| {
                let aborted = watcher
                    .as_ref()
                    .and_then(|watcher| watcher.Status().ok())
                    .map(|status| status == DeviceWatcherStatus::Aborted)
                    .unwrap_or(false);
                let fault = aborted.then_some(DiscoveryFault::InputOutput);
                inner.finish_discovery(generation, fault);
                Ok(())
            },
        );
        watcher.Stopped(&stopped)?;

        Ok(watcher)
    }

}

impl SppTransport for WinRtTransport {
    fn attach(&self, sink: EventSink) {
        *self.inner.sink.write() = sink;
    }

    fn is_available(&self) -> bool {
        self.inner
            .adapter
            .as_ref()
            .and_then(|adapter| adapter.IsClassicSupported().ok())
            .unwrap_or(false)
    }

    fn is_powered(&self) -> bool {
        self.inner
            .radio
            .as_ref()
            .and_then(|radio| radio.State().ok())
            .map(|state| state == RadioState::On)
            .unwrap_or(false)
    }

    /// Answers from the cache and schedules a refresh for the next caller.
    fn connected_devices(&self) -> Vec<BluetoothAddress> {
        let _ = self.commands.send(IoCommand::RefreshConnected);
        self.inner.connected.read().clone()
    }

    fn start_discovery(&self, timeout: Option<Duration>) -> Result<(), DiscoveryFault> {
        if self.inner.adapter.is_none() {
            return Err(DiscoveryFault::InvalidAdapter);
        }
        if !self.is_powered() {
            return Err(DiscoveryFault::PoweredOff);
        }

        self.stop_discovery();
        let generation = self.inner.discovery_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let watcher = self.create_watcher(generation).map_err(|e| {
            error!("Failed to create device watcher: {:?}", e);
            DiscoveryFault::UnsupportedMethod
        })?;

        *self.inner.watcher.lock() = Some(watcher.clone());
        self.inner.discovering.store(true, Ordering::SeqCst);
        if let Err(e) = watcher.Start() {
            error!("Failed to start device watcher: {:?}", e);
            self.inner.discovering.store(false, Ordering::SeqCst);
            self.inner.watcher.lock().take();
            return Err(DiscoveryFault::InputOutput);
        }

        if let Some(after) = timeout {
            let _ = self
                .commands
                .send(IoCommand::DiscoveryDeadline { after, generation });
        }
        info!("Classic discovery started");
        Ok(())
    }

    fn stop_discovery(&self) {
        self.inner.discovery_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.discovering.store(false, Ordering::SeqCst);
        self.inner.stop_watcher();
    }

    fn is_discovering(&self) -> bool {
        self.inner.discovering.load(Ordering::SeqCst)
    }

    fn connect(&self, address: BluetoothAddress, service: Uuid) -> Result<(), SocketFault> {
        let generation = self.inner.socket_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.close_socket();
        self.inner.pending.store(true, Ordering::SeqCst);

        self.commands
            .send(IoCommand::Connect {
                address,
                service,
                generation,
            })
            .map_err(|_| {
                self.inner.pending.store(false, Ordering::SeqCst);
                SocketFault::Other("Bluetooth I/O thread is not running".to_string())
            })
    }

    fn is_open(&self) -> bool {
        self.inner.socket.lock().is_some()
    }

    /// Queues `data` for the socket's write task. The count is the queued
    /// length; a failed store is reported as a socket fault later.
    fn write(&self, data: &[u8]) -> Result<usize, SocketFault> {
        let outbound = self.inner.outbound.lock();
        let Some(outbound) = outbound.as_ref() else {
            return Err(SocketFault::Operation);
        };
        outbound
            .send(data.to_vec())
            .map_err(|_| SocketFault::Operation)?;
        Ok(data.len())
    }

    fn disconnect(&self) {
        self.inner.socket_generation.fetch_add(1, Ordering::SeqCst);
        let was_pending = self.inner.pending.swap(false, Ordering::SeqCst);
        let was_open = self.inner.close_socket();
        if was_pending || was_open {
            self.inner.emit(TransportEvent::Disconnected);
        }
    }
}

impl Drop for WinRtTransport {
    fn drop(&mut self) {
        self.stop_discovery();
        self.inner.socket_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.close_socket();
    }
}

fn signal_strength(info: &DeviceInformation) -> Option<i16> {
    let properties = info.Properties().ok()?;
    let value = properties
        .Lookup(&HSTRING::from(SIGNAL_STRENGTH_PROPERTY))
        .ok()?;
    let reference = value.cast::<IReference<i32>>().ok()?;
    reference.Value().ok().map(|dbm| dbm as i16)
}

fn run_worker(inner: Arc<Inner>, mut commands: mpsc::UnboundedReceiver<IoCommand>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime for Bluetooth I/O: {}", e);
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        while let Some(command) = commands.recv().await {
            let inner = inner.clone();
            match command {
                IoCommand::Connect {
                    address,
                    service,
                    generation,
                } => {
                    tokio::task::spawn_local(run_connection(inner, address, service, generation));
                }
                IoCommand::DiscoveryDeadline { after, generation } => {
                    tokio::task::spawn_local(async move {
                        tokio::time::sleep(after).await;
                        inner.finish_discovery(generation, None);
                    });
                }
                IoCommand::Resolve {
                    id,
                    name,
                    rssi,
                    is_paired,
                    generation,
                } => {
                    tokio::task::spawn_local(async move {
                        let address = match BluetoothDevice::FromIdAsync(&id) {
                            Ok(op) => op.await.and_then(|device| device.BluetoothAddress()),
                            Err(e) => Err(e),
                        };
                        match address {
                            Ok(raw) if inner.is_current_discovery(generation) => {
                                inner.emit(TransportEvent::DeviceDiscovered(DiscoveredDevice {
                                    name: if name.is_empty() {
                                        "Unknown".to_string()
                                    } else {
                                        name
                                    },
                                    address: BluetoothAddress::from_u64(raw).to_string(),
                                    rssi,
                                    is_paired,
                                    is_connected: false,
                                }));
                            }
                            Ok(_) => {}
                            Err(e) => debug!("Could not resolve {}: {:?}", id, e),
                        }
                    });
                }
                IoCommand::RefreshConnected => {
                    tokio::task::spawn_local(refresh_connected(inner));
                }
            }
        }
        debug!("Bluetooth I/O thread exiting");
    });
}

async fn query_connected_devices() -> windows::core::Result<Vec<BluetoothAddress>> {
    let selector =
        BluetoothDevice::GetDeviceSelectorFromConnectionStatus(BluetoothConnectionStatus::Connected)?;
    let infos = DeviceInformation::FindAllAsyncAqsFilter(&selector)?.await?;

    let mut addresses = Vec::new();
    for i in 0..infos.Size()? {
        let info = infos.GetAt(i)?;
        let device = BluetoothDevice::FromIdAsync(&info.Id()?)?.await?;
        addresses.push(BluetoothAddress::from_u64(device.BluetoothAddress()?));
    }
    Ok(addresses)
}

async fn refresh_connected(inner: Arc<Inner>) {
    match query_connected_devices().await {
        Ok(addresses) => {
            trace!("{} connected device(s)", addresses.len());
            *inner.connected.write() = addresses;
        }
        Err(e) => warn!("Could not list connected devices: {:?}", e),
    }
}

async fn open_socket(address: BluetoothAddress, service: Uuid) -> Result<StreamSocket, SocketFault> {
    let device = BluetoothDevice::FromBluetoothAddressAsync(address.as_u64())
        .map_err(socket_fault)?
        .await
        .map_err(|_| SocketFault::HostNotFound)?;

    let service_id =
        RfcommServiceId::FromUuid(GUID::from_u128(service.as_u128())).map_err(socket_fault)?;
    let result = device
        .GetRfcommServicesForIdWithCacheModeAsync(&service_id, BluetoothCacheMode::Uncached)
        .map_err(socket_fault)?
        .await
        .map_err(socket_fault)?;

    match result.Error().map_err(socket_fault)? {
        BluetoothError::Success => {}
        BluetoothError::DeviceNotConnected => return Err(SocketFault::HostNotFound),
        other => {
            warn!("RFCOMM service lookup failed: {:?}", other);
            return Err(SocketFault::ServiceNotFound);
        }
    }

    let services = result.Services().map_err(socket_fault)?;
    if services.Size().map_err(socket_fault)? == 0 {
        return Err(SocketFault::ServiceNotFound);
    }
    let rfcomm = services.GetAt(0).map_err(socket_fault)?;

    let socket = StreamSocket::new().map_err(socket_fault)?;
    socket
        .ConnectAsync(
            &rfcomm.ConnectionHostName().map_err(socket_fault)?,
            &rfcomm.ConnectionServiceName().map_err(socket_fault)?,
        )
        .map_err(socket_fault)?
        .await
        .map_err(socket_fault)?;
    Ok(socket)
}

async fn run_connection(inner: Arc<Inner>, address: BluetoothAddress, service: Uuid, generation: u64) {
    info!("Opening RFCOMM socket to {}", address);

    let socket = match open_socket(address, service).await {
        Ok(socket) => socket,
        Err(fault) => {
            if inner.is_current_socket(generation) {
                inner.pending.store(false, Ordering::SeqCst);
                error!("RFCOMM connect to {} failed: {}", address, fault);
                inner.emit(TransportEvent::SocketFailed(fault));
            }
            return;
        }
    };

    if !inner.is_current_socket(generation) {
        let _ = socket.Close();
        return;
    }

    let streams = socket
        .OutputStream()
        .and_then(|output| DataWriter::CreateDataWriter(&output))
        .and_then(|writer| {
            socket
                .InputStream()
                .and_then(|input| DataReader::CreateDataReader(&input))
                .map(|reader| (writer, reader))
        });
    let (writer, reader) = match streams {
        Ok(streams) => streams,
        Err(e) => {
            let _ = socket.Close();
            inner.pending.store(false, Ordering::SeqCst);
            inner.emit(TransportEvent::SocketFailed(socket_fault(e)));
            return;
        }
    };

    let (outbound, queued) = mpsc::unbounded_channel();
    *inner.outbound.lock() = Some(outbound);
    *inner.socket.lock() = Some(socket);
    if !inner.is_current_socket(generation) {
        inner.close_socket();
        return;
    }
    inner.pending.store(false, Ordering::SeqCst);

    info!("RFCOMM socket open to {}", address);
    inner.emit(TransportEvent::Connected);
    tokio::task::spawn_local(write_loop(inner.clone(), writer, queued, generation));
    tokio::task::spawn_local(refresh_connected(inner.clone()));

    read_loop(&inner, &reader, generation).await;
    tokio::task::spawn_local(refresh_connected(inner));
}

/// Drains queued writes in order until the socket is closed.
async fn write_loop(
    inner: Arc<Inner>,
    writer: DataWriter,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    generation: u64,
) {
    while let Some(bytes) = queued.recv().await {
        let stored = match writer
            .WriteBytes(&bytes)
            .and_then(|()| writer.StoreAsync())
            .and_then(|op| op.cast::<IAsyncOperation<u32>>())
        {
            Ok(op) => op.await,
            Err(e) => Err(e),
        };

        match stored {
            Ok(len) => trace!(len, "Stored bytes"),
            Err(e) => {
                if inner.is_current_socket(generation) {
                    let fault = socket_fault(e);
                    error!("RFCOMM write failed: {}", fault);
                    inner.close_socket();
                    inner.emit(TransportEvent::SocketFailed(fault));
                }
                return;
            }
        }
    }
}

async fn read_loop(inner: &Inner, reader: &DataReader, generation: u64) {
    if let Err(e) = reader.SetInputStreamOptions(InputStreamOptions::Partial) {
        warn!("Could not enable partial reads: {:?}", e);
    }

    loop {
        let loaded = match reader
            .LoadAsync(READ_CHUNK)
            .and_then(|op| op.cast::<IAsyncOperation<u32>>())
        {
            Ok(op) => op.await,
            Err(e) => Err(e),
        };

        if !inner.is_current_socket(generation) {
            return;
        }

        match loaded {
            Ok(0) => {
                info!("Peer closed the RFCOMM socket");
                inner.close_socket();
                inner.emit(TransportEvent::Disconnected);
                return;
            }
            Ok(len) => {
                let mut buffer = vec![0u8; len as usize];
                match reader.ReadBytes(&mut buffer) {
                    Ok(()) => inner.emit(TransportEvent::DataReceived(buffer)),
                    Err(e) => warn!("Failed to read {} bytes: {:?}", len, e),
                }
            }
            Err(e) => {
                let fault = socket_fault(e);
                error!("RFCOMM read failed: {}", fault);
                inner.close_socket();
                inner.emit(TransportEvent::SocketFailed(fault));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_write_without_socket_is_refused() {
        let transport = WinRtTransport::new().unwrap();
        assert!(!transport.is_open());
        assert_eq!(transport.write(b"ping"), Err(SocketFault::Operation));
    }

    #[test]
    fn test_connected_devices_answers_from_cache() {
        let transport = WinRtTransport::new().unwrap();
        let started = Instant::now();
        let _ = transport.connected_devices();
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
