//! Error types for the link and the wire codec.
//!
//! Display strings double as the user-facing messages. Numeric codes are
//! stable so they can cross an FFI or UI boundary; code 0 is success.

use thiserror::Error;

/// Wire codec failures. Data-level, never retried by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProtocolError {
    #[error("Serialization failed")]
    SerializationFailed,
    #[error("Deserialization failed")]
    DeserializationFailed,
    /// Envelope parsed but lacks the expected discriminant or payload.
    #[error("Invalid message")]
    InvalidMessage,
    #[error("Buffer too small")]
    BufferTooSmall,
    #[error("Unknown message type")]
    UnknownMessageType,
}

impl ProtocolError {
    pub fn code(self) -> u8 {
        match self {
            Self::SerializationFailed => 1,
            Self::DeserializationFailed => 2,
            Self::InvalidMessage => 3,
            Self::BufferTooSmall => 4,
            Self::UnknownMessageType => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::SerializationFailed),
            2 => Some(Self::DeserializationFailed),
            3 => Some(Self::InvalidMessage),
            4 => Some(Self::BufferTooSmall),
            5 => Some(Self::UnknownMessageType),
            _ => None,
        }
    }
}

/// Renders a numeric protocol error code.
pub fn describe_protocol_error(code: u8) -> &'static str {
    if code == 0 {
        return "OK";
    }
    match ProtocolError::from_code(code) {
        Some(ProtocolError::SerializationFailed) => "Serialization failed",
        Some(ProtocolError::DeserializationFailed) => "Deserialization failed",
        Some(ProtocolError::InvalidMessage) => "Invalid message",
        Some(ProtocolError::BufferTooSmall) => "Buffer too small",
        Some(ProtocolError::UnknownMessageType) => "Unknown message type",
        None => "Unknown error",
    }
}

/// Link (connection manager) failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum LinkError {
    #[error("Bluetooth not supported")]
    NotSupported,
    #[error("Bluetooth is disabled")]
    NotEnabled,
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Failed to send data")]
    SendFailed,
    #[error("Failed to receive data")]
    ReceiveFailed,
    #[error("Operation timed out")]
    Timeout,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Internal error")]
    Internal,
}

/// Coarse grouping of [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The platform cannot do this at all until the environment changes.
    Capability,
    /// Caller-correctable.
    Precondition,
    /// Transient; a fresh connect may succeed.
    Transport,
    Internal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Precondition | Self::Transport)
    }
}

impl LinkError {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::NotSupported | Self::NotEnabled => ErrorClass::Capability,
            Self::AlreadyConnected | Self::NotConnected | Self::DeviceNotFound => {
                ErrorClass::Precondition
            }
            Self::ConnectionFailed
            | Self::ConnectionLost
            | Self::SendFailed
            | Self::ReceiveFailed
            | Self::Timeout => ErrorClass::Transport,
            Self::Internal => ErrorClass::Internal,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::NotSupported => 1,
            Self::NotEnabled => 2,
            Self::DeviceNotFound => 3,
            Self::ConnectionFailed => 4,
            Self::ConnectionLost => 5,
            Self::SendFailed => 6,
            Self::ReceiveFailed => 7,
            Self::Timeout => 8,
            Self::AlreadyConnected => 9,
            Self::NotConnected => 10,
            Self::Internal => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::NotSupported,
            2 => Self::NotEnabled,
            3 => Self::DeviceNotFound,
            4 => Self::ConnectionFailed,
            5 => Self::ConnectionLost,
            6 => Self::SendFailed,
            7 => Self::ReceiveFailed,
            8 => Self::Timeout,
            9 => Self::AlreadyConnected,
            10 => Self::NotConnected,
            11 => Self::Internal,
            _ => return None,
        })
    }
}

/// Renders a numeric link error code; unknown codes do not fail.
pub fn describe_link_error(code: u8) -> String {
    match (code, LinkError::from_code(code)) {
        (0, _) => "OK".to_string(),
        (_, Some(err)) => err.to_string(),
        (_, None) => "Unknown error".to_string(),
    }
}

/// Discovery agent faults, reported through the state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscoveryFault {
    #[error("Bluetooth is powered off")]
    PoweredOff,
    #[error("I/O error during discovery")]
    InputOutput,
    #[error("Invalid Bluetooth adapter")]
    InvalidAdapter,
    #[error("Platform does not support Bluetooth discovery")]
    UnsupportedPlatform,
    #[error("Unsupported discovery method")]
    UnsupportedMethod,
    #[error("Unknown discovery error")]
    Unknown,
}

impl DiscoveryFault {
    /// The error a caller sees when discovery cannot start.
    pub fn link_error(self) -> LinkError {
        match self {
            Self::PoweredOff => LinkError::NotEnabled,
            Self::InvalidAdapter | Self::UnsupportedPlatform | Self::UnsupportedMethod => {
                LinkError::NotSupported
            }
            Self::InputOutput | Self::Unknown => LinkError::Internal,
        }
    }
}

/// RFCOMM socket faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketFault {
    #[error("Unknown socket error")]
    Unknown,
    #[error("Device not found")]
    HostNotFound,
    #[error("Service not found on device")]
    ServiceNotFound,
    #[error("Network error")]
    Network,
    #[error("Unsupported protocol")]
    UnsupportedProtocol,
    #[error("Operation error")]
    Operation,
    #[error("Connection closed by remote device")]
    RemoteHostClosed,
    #[error("{0}")]
    Other(String),
}

impl SocketFault {
    /// The error a caller sees when a connect attempt is refused outright.
    pub fn link_error(&self) -> LinkError {
        match self {
            Self::HostNotFound => LinkError::DeviceNotFound,
            Self::RemoteHostClosed => LinkError::ConnectionLost,
            Self::UnsupportedProtocol => LinkError::NotSupported,
            Self::Unknown
            | Self::ServiceNotFound
            | Self::Network
            | Self::Operation
            | Self::Other(_) => LinkError::ConnectionFailed,
        }
    }
}
