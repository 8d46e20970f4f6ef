//! Protobuf envelopes shared with the servo firmware.
//!
//! Field tags and enum values are part of the firmware contract and must not
//! change. The firmware decodes every inbound buffer as a [`Command`] and
//! answers each one with exactly one [`Response`] carrying the same id.

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Position {
    #[prost(float, tag = "1")]
    pub pan: f32,
    #[prost(float, tag = "2")]
    pub tilt: f32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct MoveCommand {
    #[prost(message, optional, tag = "1")]
    pub target_position: Option<Position>,
    /// Set when the target was derived from a face centroid. The firmware
    /// treats both kinds of move alike.
    #[prost(bool, tag = "2")]
    pub use_face_tracking: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct CalibrateCommand {
    #[prost(enumeration = "calibrate_command::Mode", tag = "1")]
    pub mode: i32,
}

pub mod calibrate_command {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Mode {
        Unspecified = 0,
        Full = 1,
        Pan = 2,
        Tilt = 3,
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ServoConfig {
    #[prost(float, tag = "1")]
    pub servo_speed: f32,
    #[prost(float, tag = "2")]
    pub smoothing: f32,
    #[prost(float, tag = "3")]
    pub dead_zone: f32,
    #[prost(float, tag = "4")]
    pub pan_min: f32,
    #[prost(float, tag = "5")]
    pub pan_max: f32,
    #[prost(float, tag = "6")]
    pub tilt_min: f32,
    #[prost(float, tag = "7")]
    pub tilt_max: f32,
    #[prost(bool, tag = "8")]
    pub invert_pan: bool,
    #[prost(bool, tag = "9")]
    pub invert_tilt: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SetConfigCommand {
    #[prost(message, optional, tag = "1")]
    pub config: Option<ServoConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    Unspecified = 0,
    Move = 1,
    Home = 2,
    Calibrate = 3,
    Stop = 4,
    GetStatus = 5,
    SetConfig = 6,
    Ping = 7,
}

/// Client to device envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "CommandType", tag = "3")]
    pub r#type: i32,
    #[prost(oneof = "command::Payload", tags = "4, 5, 6")]
    pub payload: Option<command::Payload>,
}

pub mod command {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "4")]
        Move(super::MoveCommand),
        #[prost(message, tag = "5")]
        Calibrate(super::CalibrateCommand),
        #[prost(message, tag = "6")]
        SetConfig(super::SetConfigCommand),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Error = 1,
    NotCalibrated = 2,
    InvalidCommand = 3,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DeviceStatus {
    #[prost(message, optional, tag = "1")]
    pub current_position: Option<Position>,
    #[prost(message, optional, tag = "2")]
    pub target_position: Option<Position>,
    #[prost(bool, tag = "3")]
    pub is_calibrated: bool,
    #[prost(bool, tag = "4")]
    pub is_moving: bool,
    #[prost(uint64, tag = "5")]
    pub uptime_ms: u64,
    #[prost(uint32, tag = "6")]
    pub free_heap: u32,
    #[prost(int32, tag = "7")]
    pub wifi_rssi: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorInfo {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Device to client envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(uint32, tag = "1")]
    pub command_id: u32,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "StatusCode", tag = "3")]
    pub status: i32,
    #[prost(oneof = "response::Payload", tags = "4, 5")]
    pub payload: Option<response::Payload>,
}

pub mod response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "4")]
        DeviceStatus(super::DeviceStatus),
        #[prost(message, tag = "5")]
        Error(super::ErrorInfo),
    }
}

impl Command {
    /// Discriminant, or `None` for values this schema does not define.
    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::try_from(self.r#type).ok()
    }
}

impl Response {
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::try_from(self.status).ok()
    }
}
