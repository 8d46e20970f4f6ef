//! Servo Link Service
//!
//! Application-facing entry point: the connection manager plus typed
//! senders that run every message through the wire codec.

use crate::domain::device::{ConnectionState, DiscoveredDevice};
use crate::domain::messages::{FaceDataMessage, HeartbeatMessage, ServoCommand, ServoConfig};
use crate::domain::settings::LinkSettings;
use crate::error::{LinkError, ProtocolError};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::SppTransport;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Link to the servo rig.
///
/// Safe to construct and query without a Bluetooth backend; operations then
/// fail with [`LinkError::NotSupported`] and queries report an idle link.
pub struct ServoLink {
    manager: ConnectionManager,
    heartbeat_sequence: AtomicU32,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

impl ServoLink {
    pub fn new(transport: Arc<dyn SppTransport>) -> Self {
        Self {
            manager: ConnectionManager::new(transport),
            heartbeat_sequence: AtomicU32::new(0),
        }
    }

    pub fn with_platform_transport() -> Self {
        Self {
            manager: ConnectionManager::with_platform_transport(),
            heartbeat_sequence: AtomicU32::new(0),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn initialize(&self) -> Result<(), LinkError> {
        self.manager.initialize()
    }

    pub fn start_scan(&self, timeout_ms: u32) -> Result<(), LinkError> {
        self.manager.start_scan(timeout_ms)
    }

    /// Start discovery bounded by `settings.scan_timeout_ms`.
    pub fn start_configured_scan(&self, settings: &LinkSettings) -> Result<(), LinkError> {
        self.manager.start_scan(settings.scan_timeout_ms)
    }

    pub fn stop_scan(&self) {
        self.manager.stop_scan()
    }

    pub fn connect(&self, address: &str) -> Result<(), LinkError> {
        self.manager.connect(address)
    }

    pub fn disconnect(&self) -> Result<(), LinkError> {
        self.manager.disconnect()
    }

    pub fn send(&self, data: &[u8]) -> Result<usize, LinkError> {
        self.manager.send(data)
    }

    fn send_encoded(
        &self,
        what: &str,
        encoded: Result<Vec<u8>, ProtocolError>,
    ) -> Result<usize, LinkError> {
        let bytes = encoded.map_err(|e| {
            error!("Failed to encode {}: {}", what, e);
            LinkError::SendFailed
        })?;
        debug!(len = bytes.len(), "Sending {}", what);
        self.manager.send(&bytes)
    }

    /// Steer to an absolute pan/tilt. Speed and smoothing stay on this side.
    pub fn send_servo_command(&self, cmd: &ServoCommand) -> Result<usize, LinkError> {
        self.send_encoded("servo command", protocol::encode_servo_command(cmd))
    }

    /// Steer toward the first face of a detection frame.
    pub fn send_face_data(&self, frame: &FaceDataMessage) -> Result<usize, LinkError> {
        self.send_encoded("face data", protocol::encode_face_data(frame))
    }

    /// Send a `Ping` stamped with the wall clock and the next sequence
    /// number (wrapping).
    pub fn send_heartbeat(&self) -> Result<usize, LinkError> {
        let heartbeat = HeartbeatMessage {
            timestamp_ms: now_ms(),
            sequence: self.heartbeat_sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.send_encoded("heartbeat", protocol::encode_heartbeat(&heartbeat))
    }

    /// Request a full calibration.
    pub fn send_calibrate(&self) -> Result<usize, LinkError> {
        self.send_encoded("calibrate", protocol::encode_calibrate())
    }

    /// Return both axes to center.
    pub fn send_home(&self) -> Result<usize, LinkError> {
        self.send_encoded("home", protocol::encode_home())
    }

    /// Halt any movement in progress.
    pub fn send_stop(&self) -> Result<usize, LinkError> {
        self.send_encoded("stop", protocol::encode_stop())
    }

    /// Ask the device for a `DeviceStatus` reply.
    pub fn send_get_status(&self) -> Result<usize, LinkError> {
        self.send_encoded("status request", protocol::encode_get_status())
    }

    /// Push servo tuning to the device.
    pub fn send_config(&self, config: &ServoConfig) -> Result<usize, LinkError> {
        self.send_encoded("servo config", protocol::encode_set_config(config))
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn is_available(&self) -> bool {
        self.manager.is_available()
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_enabled()
    }

    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.manager.discovered_devices()
    }

    pub fn connected_device(&self) -> Option<DiscoveredDevice> {
        self.manager.connected_device()
    }

    pub fn last_error(&self) -> String {
        self.manager.last_error()
    }

    pub fn set_state_callback(
        &self,
        callback: impl Fn(ConnectionState, &str) + Send + Sync + 'static,
    ) {
        self.manager.set_state_callback(callback)
    }

    pub fn set_device_discovered_callback(
        &self,
        callback: impl Fn(&DiscoveredDevice) + Send + Sync + 'static,
    ) {
        self.manager.set_device_discovered_callback(callback)
    }

    pub fn set_scan_complete_callback(
        &self,
        callback: impl Fn(&[DiscoveredDevice]) + Send + Sync + 'static,
    ) {
        self.manager.set_scan_complete_callback(callback)
    }

    pub fn set_data_received_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.manager.set_data_received_callback(callback)
    }
}
