//! Bluetooth Module
//!
//! SPP (RFCOMM) link to the pan/tilt servo rig.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       ServoLink                          │
//! │   (Public API: typed senders, queries, callbacks)        │
//! └──────────────┬───────────────────────────┬──────────────┘
//!                │                           │
//!                ▼                           ▼
//!      ┌───────────────────┐       ┌──────────────────┐
//!      │ ConnectionManager │       │     Protocol     │
//!      │                   │       │                  │
//!      │ - State machine   │       │ - Encode/decode  │
//!      │ - Device list     │       │ - Type detection │
//!      │ - Callbacks       │       │   (over `wire`)  │
//!      └─────────┬─────────┘       └──────────────────┘
//!                │ TransportEvent
//!                ▼
//!      ┌───────────────────┐
//!      │   SppTransport    │
//!      │ WinRT / fallback  │
//!      └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`wire`] - Protobuf envelopes shared with the firmware
//! - [`protocol`] - Domain message codec and type detection
//! - [`transport`] - Platform seam and the unsupported-platform fallback
//! - [`connection`] - Discovery and connection state machine
//! - [`service`] - Facade used by the application
//! - [`keepalive`] - Heartbeat and connect deadline tasks

pub mod connection;
pub mod keepalive;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod wire;

#[cfg(windows)]
mod winrt;

pub use connection::ConnectionManager;
pub use service::ServoLink;
pub use transport::{EventSink, SppTransport, TransportEvent, UnsupportedTransport};
