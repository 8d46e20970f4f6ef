//! Domain messages exchanged with the pan/tilt rig.
//!
//! These are plain value objects. Only part of each one survives the wire
//! encoding, see [`crate::infrastructure::bluetooth::protocol`].

/// Servo steering command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoCommand {
    /// Pan angle in degrees (-90 to 90).
    pub pan_angle: f32,
    /// Tilt angle in degrees (-45 to 45).
    pub tilt_angle: f32,
    /// Movement speed multiplier (0.0 to 1.0).
    pub speed: f32,
    /// Use smooth interpolated movement.
    pub smooth: bool,
}

impl Default for ServoCommand {
    fn default() -> Self {
        Self {
            pan_angle: 0.0,
            tilt_angle: 0.0,
            speed: 1.0,
            smooth: true,
        }
    }
}

/// A single detected face, in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacePosition {
    /// Center X (0.0 to 1.0, image center = 0.5).
    pub x: f32,
    /// Center Y (0.0 to 1.0, image center = 0.5).
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detection confidence (0.0 to 1.0).
    pub confidence: f32,
    /// Tracker id, -1 when untracked.
    pub track_id: i32,
}

impl Default for FacePosition {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            confidence: 0.0,
            track_id: -1,
        }
    }
}

/// Faces detected in one camera frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceDataMessage {
    pub faces: Vec<FacePosition>,
    pub timestamp_ms: u64,
    pub frame_id: u32,
}

/// Device status as reported by the rig.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusMessage {
    pub pan_position: f32,
    pub tilt_position: f32,
    /// Battery level (0.0 to 1.0).
    pub battery_level: f32,
    pub is_calibrated: bool,
    pub is_tracking: bool,
    /// 0 means no error.
    pub error_code: u32,
}

impl Default for StatusMessage {
    fn default() -> Self {
        Self {
            pan_position: 0.0,
            tilt_position: 0.0,
            battery_level: 1.0,
            is_calibrated: false,
            is_tracking: false,
            error_code: 0,
        }
    }
}

/// Keep-alive message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub timestamp_ms: u64,
    pub sequence: u32,
}

/// Servo tuning pushed to the rig with a SetConfig command.
///
/// Defaults match the firmware's boot configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoConfig {
    pub speed: f32,
    pub smoothing: f32,
    /// Minimum movement in degrees before the servos react.
    pub dead_zone: f32,
    pub pan_min: f32,
    pub pan_max: f32,
    pub tilt_min: f32,
    pub tilt_max: f32,
    pub invert_pan: bool,
    pub invert_tilt: bool,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            smoothing: 0.5,
            dead_zone: 1.0,
            pan_min: -90.0,
            pan_max: 90.0,
            tilt_min: -45.0,
            tilt_max: 45.0,
            invert_pan: false,
            invert_tilt: false,
        }
    }
}

/// Best-effort classification of an opaque inbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Unknown,
    ServoCommand,
    FaceData,
    Calibration,
    Status,
    Heartbeat,
    Config,
}
