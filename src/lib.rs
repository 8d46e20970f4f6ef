//! Client side of the face tracker's Bluetooth link to its pan/tilt servo rig.
//!
//! [`ServoLink`] is the entry point. It owns the connection state machine and
//! encodes domain messages with the wire codec in
//! [`infrastructure::bluetooth::protocol`].

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::device::{BluetoothAddress, ConnectionState, DiscoveredDevice};
pub use domain::messages::{
    FaceDataMessage, FacePosition, HeartbeatMessage, MessageKind, ServoCommand, ServoConfig,
    StatusMessage,
};
pub use domain::settings::{LinkSettings, LogSettings};
pub use error::{ErrorClass, LinkError, ProtocolError};
pub use infrastructure::bluetooth::ServoLink;
