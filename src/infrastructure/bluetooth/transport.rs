//! SPP Transport Seam
//!
//! The connection manager never talks to a Bluetooth stack directly. It
//! drives an [`SppTransport`] and learns about everything asynchronous
//! (discovery results, socket state, inbound bytes) through
//! [`TransportEvent`]s delivered to the [`EventSink`] it attached.
//!
//! Events may be emitted from any thread, including synchronously from
//! inside a transport call.

use crate::domain::device::{BluetoothAddress, DiscoveredDevice};
use crate::error::{DiscoveryFault, SocketFault};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Serial Port Profile service class.
pub const SPP_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Something the platform stack reported.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    DeviceDiscovered(DiscoveredDevice),
    /// Discovery ended on its own (timeout or platform decision).
    DiscoveryFinished,
    DiscoveryFailed(DiscoveryFault),
    /// The pending connect completed and the socket is open.
    Connected,
    /// The socket closed, locally or by the peer.
    Disconnected,
    SocketFailed(SocketFault),
    DataReceived(Vec<u8>),
}

pub(crate) trait EventHandler: Send + Sync {
    fn on_event(&self, event: TransportEvent);
}

/// Handle a transport uses to report events back to its owner.
///
/// Holds the owner weakly; once the owner is gone, events are dropped.
#[derive(Clone)]
pub struct EventSink {
    handler: Weak<dyn EventHandler>,
}

struct Detached;

impl EventHandler for Detached {
    fn on_event(&self, _event: TransportEvent) {}
}

impl EventSink {
    pub(crate) fn new(handler: Weak<dyn EventHandler>) -> Self {
        Self { handler }
    }

    /// A sink that goes nowhere.
    pub fn detached() -> Self {
        let handler: Weak<dyn EventHandler> = Weak::<Detached>::new();
        Self { handler }
    }

    /// Deliver `event` on the calling thread. Returns `false` if the owner
    /// no longer exists.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.handler.upgrade() {
            Some(handler) => {
                handler.on_event(event);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &(self.handler.strong_count() > 0))
            .finish()
    }
}

/// A Bluetooth Classic RFCOMM stack.
///
/// Every method returns immediately. Long-running work (discovery, the
/// connect handshake, reads) completes later through the attached sink.
pub trait SppTransport: Send + Sync {
    /// Register the sink for all future events, replacing any earlier one.
    fn attach(&self, sink: EventSink);

    /// A usable adapter exists.
    fn is_available(&self) -> bool;

    /// The adapter radio is on.
    fn is_powered(&self) -> bool;

    /// Devices the platform already holds a connection to. May be a cached
    /// answer rather than a fresh query.
    fn connected_devices(&self) -> Vec<BluetoothAddress>;

    /// Begin discovery, bounded by `timeout` (`None` = platform default).
    fn start_discovery(&self, timeout: Option<Duration>) -> Result<(), DiscoveryFault>;

    /// Stop discovery without emitting [`TransportEvent::DiscoveryFinished`].
    fn stop_discovery(&self);

    fn is_discovering(&self) -> bool;

    /// Begin connecting to `service` on `address`. Success is reported with
    /// [`TransportEvent::Connected`]; an `Err` means the attempt never started.
    fn connect(&self, address: BluetoothAddress, service: Uuid) -> Result<(), SocketFault>;

    /// A socket is open and writable.
    fn is_open(&self) -> bool;

    /// Hand the whole buffer to the socket, returning the number of bytes
    /// accepted. A backend may queue the bytes and report a later failure
    /// as [`TransportEvent::SocketFailed`].
    fn write(&self, data: &[u8]) -> Result<usize, SocketFault>;

    /// Abort a pending connect or close the open socket. Emits
    /// [`TransportEvent::Disconnected`] if there was anything to close.
    fn disconnect(&self);
}

/// Stand-in for builds without a Bluetooth backend. Reports no adapter and
/// refuses every operation.
#[derive(Debug, Default)]
pub struct UnsupportedTransport;

impl SppTransport for UnsupportedTransport {
    fn attach(&self, _sink: EventSink) {}

    fn is_available(&self) -> bool {
        false
    }

    fn is_powered(&self) -> bool {
        false
    }

    fn connected_devices(&self) -> Vec<BluetoothAddress> {
        Vec::new()
    }

    fn start_discovery(&self, _timeout: Option<Duration>) -> Result<(), DiscoveryFault> {
        Err(DiscoveryFault::UnsupportedPlatform)
    }

    fn stop_discovery(&self) {}

    fn is_discovering(&self) -> bool {
        false
    }

    fn connect(&self, _address: BluetoothAddress, _service: Uuid) -> Result<(), SocketFault> {
        Err(SocketFault::UnsupportedProtocol)
    }

    fn is_open(&self) -> bool {
        false
    }

    fn write(&self, _data: &[u8]) -> Result<usize, SocketFault> {
        Err(SocketFault::UnsupportedProtocol)
    }

    fn disconnect(&self) {}
}

/// The native backend for this build, or [`UnsupportedTransport`].
pub fn platform_transport() -> Arc<dyn SppTransport> {
    #[cfg(windows)]
    {
        match super::winrt::WinRtTransport::new() {
            Ok(transport) => return Arc::new(transport),
            Err(e) => warn!("WinRT Bluetooth backend unavailable: {:?}", e),
        }
    }
    #[cfg(not(windows))]
    warn!("No Bluetooth backend for this platform; link is disabled");

    Arc::new(UnsupportedTransport)
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(parking_lot::Mutex<Vec<TransportEvent>>);

    impl EventHandler for Recorder {
        fn on_event(&self, event: TransportEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn test_spp_uuid() {
        assert_eq!(
            SPP_SERVICE_UUID.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_sink_delivers_while_owner_lives() {
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        let handler: Arc<dyn EventHandler> = recorder.clone();
        let sink = EventSink::new(Arc::downgrade(&handler));

        assert!(sink.emit(TransportEvent::Connected));
        assert_eq!(*recorder.0.lock(), vec![TransportEvent::Connected]);

        drop(handler);
        drop(recorder);
        assert!(!sink.emit(TransportEvent::Disconnected));
    }

    #[test]
    fn test_detached_sink_drops_events() {
        assert!(!EventSink::detached().emit(TransportEvent::DiscoveryFinished));
    }

    #[test]
    fn test_unsupported_transport_refuses_everything() {
        let transport = UnsupportedTransport;
        assert!(!transport.is_available());
        assert!(!transport.is_powered());
        assert!(transport.connected_devices().is_empty());
        assert_eq!(
            transport.start_discovery(None),
            Err(DiscoveryFault::UnsupportedPlatform)
        );
        let addr = BluetoothAddress::new([1, 2, 3, 4, 5, 6]);
        assert!(transport.connect(addr, SPP_SERVICE_UUID).is_err());
        assert!(transport.write(b"x").is_err());
        assert!(!transport.is_open());
    }
}
