//! Servo Rig Wire Protocol
//!
//! Maps the domain messages onto the two protobuf envelopes defined in
//! [`super::wire`]. Every function here is pure: no state and no I/O.
//!
//! Several domain fields have no wire representation and are lost on encode:
//! `ServoCommand::{speed, smooth}`, every face after the first one, and
//! `StatusMessage::battery_level`. Decoders fill those in with fixed values.

use super::wire::{
    self, calibrate_command, command, response, Command, CommandType, Response, StatusCode,
};
use crate::domain::messages::{
    FaceDataMessage, FacePosition, HeartbeatMessage, MessageKind, ServoCommand, ServoConfig,
    StatusMessage,
};
use crate::error::ProtocolError;
use prost::Message;
use tracing::trace;

/// Version of the schema in [`super::wire`].
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Full pan sweep in degrees, mapped onto the normalized image width.
const PAN_RANGE_DEG: f32 = 180.0;
/// Full tilt sweep in degrees, mapped onto the normalized image height.
const TILT_RANGE_DEG: f32 = 90.0;

/// Size of the synthetic face produced by [`decode_face_data`].
const DECODED_FACE_SIZE: f32 = 0.1;

/// Error payload returned by the rig when a command fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub command_id: u32,
    pub status: StatusCode,
    pub message: String,
}

/// A decoded inbound buffer, see [`decode_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ServoCommand(ServoCommand),
    FaceData(FaceDataMessage),
    Calibration,
    Status(StatusMessage),
    Heartbeat(HeartbeatMessage),
    Config(ServoConfig),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ServoCommand(_) => MessageKind::ServoCommand,
            Self::FaceData(_) => MessageKind::FaceData,
            Self::Calibration => MessageKind::Calibration,
            Self::Status(_) => MessageKind::Status,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
            Self::Config(_) => MessageKind::Config,
        }
    }
}

fn encode_envelope<M: Message>(msg: &M) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut buf)
        .map_err(|_| ProtocolError::SerializationFailed)?;
    Ok(buf)
}

fn parse_command(data: &[u8]) -> Result<Command, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::DeserializationFailed);
    }
    Command::decode(data).map_err(|_| ProtocolError::DeserializationFailed)
}

fn parse_response(data: &[u8]) -> Result<Response, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::DeserializationFailed);
    }
    Response::decode(data).map_err(|_| ProtocolError::DeserializationFailed)
}

fn bare_command(id: u32, timestamp_ms: u64, kind: CommandType) -> Command {
    Command {
        id,
        timestamp_ms,
        r#type: kind as i32,
        payload: None,
    }
}

fn move_command(pan: f32, tilt: f32, use_face_tracking: bool) -> command::Payload {
    command::Payload::Move(wire::MoveCommand {
        target_position: Some(wire::Position { pan, tilt }),
        use_face_tracking,
    })
}

/// Encode a servo command as a `Move` envelope.
///
/// Only the two angles are carried; `speed` and `smooth` are dropped.
pub fn encode_servo_command(cmd: &ServoCommand) -> Result<Vec<u8>, ProtocolError> {
    let mut envelope = bare_command(0, 0, CommandType::Move);
    envelope.payload = Some(move_command(cmd.pan_angle, cmd.tilt_angle, false));
    encode_envelope(&envelope)
}

/// Decode a `Move` envelope. The result always has `speed = 1.0` and
/// `smooth = true`.
pub fn decode_servo_command(data: &[u8]) -> Result<ServoCommand, ProtocolError> {
    let envelope = parse_command(data)?;
    if envelope.command_type() != Some(CommandType::Move) {
        return Err(ProtocolError::InvalidMessage);
    }
    let Some(command::Payload::Move(mv)) = envelope.payload else {
        return Err(ProtocolError::InvalidMessage);
    };

    let target = mv.target_position.unwrap_or_default();
    Ok(ServoCommand {
        pan_angle: target.pan,
        tilt_angle: target.tilt,
        ..ServoCommand::default()
    })
}

/// Encode a detection frame.
///
/// The first face is converted into pan/tilt angles and sent as a face
/// tracking `Move`. With no faces the envelope carries no payload.
pub fn encode_face_data(frame: &FaceDataMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut envelope = bare_command(frame.frame_id, frame.timestamp_ms, CommandType::Move);
    if let Some(face) = frame.faces.first() {
        let pan = (face.x - 0.5) * PAN_RANGE_DEG;
        let tilt = (face.y - 0.5) * TILT_RANGE_DEG;
        envelope.payload = Some(move_command(pan, tilt, true));
    }
    encode_envelope(&envelope)
}

/// Decode a detection frame.
///
/// At most one face comes back, with fixed size, confidence and track id.
pub fn decode_face_data(data: &[u8]) -> Result<FaceDataMessage, ProtocolError> {
    let envelope = parse_command(data)?;

    let mut frame = FaceDataMessage {
        faces: Vec::new(),
        timestamp_ms: envelope.timestamp_ms,
        frame_id: envelope.id,
    };

    if let Some(command::Payload::Move(mv)) = envelope.payload {
        if mv.use_face_tracking {
            let target = mv.target_position.unwrap_or_default();
            frame.faces.push(FacePosition {
                x: target.pan / PAN_RANGE_DEG + 0.5,
                y: target.tilt / TILT_RANGE_DEG + 0.5,
                width: DECODED_FACE_SIZE,
                height: DECODED_FACE_SIZE,
                confidence: 1.0,
                track_id: 0,
            });
        }
    }

    Ok(frame)
}

/// Encode a status report as a `Response`.
///
/// A non-zero `error_code` becomes `StatusCode::Error`; the exact code is
/// not carried.
pub fn encode_status(status: &StatusMessage) -> Result<Vec<u8>, ProtocolError> {
    let code = if status.error_code == 0 {
        StatusCode::Ok
    } else {
        StatusCode::Error
    };

    let envelope = Response {
        command_id: 0,
        timestamp_ms: 0,
        status: code as i32,
        payload: Some(response::Payload::DeviceStatus(wire::DeviceStatus {
            current_position: Some(wire::Position {
                pan: status.pan_position,
                tilt: status.tilt_position,
            }),
            is_calibrated: status.is_calibrated,
            is_moving: status.is_tracking,
            ..Default::default()
        })),
    };
    encode_envelope(&envelope)
}

/// Decode a status `Response`.
///
/// `error_code` is 0 for `Ok` and the numeric status value otherwise.
/// `battery_level` is always 1.0.
pub fn decode_status(data: &[u8]) -> Result<StatusMessage, ProtocolError> {
    let envelope = parse_response(data)?;

    let mut status = StatusMessage {
        error_code: match envelope.status_code() {
            Some(StatusCode::Ok) => 0,
            _ => envelope.status as u32,
        },
        ..StatusMessage::default()
    };

    if let Some(response::Payload::DeviceStatus(device)) = envelope.payload {
        let current = device.current_position.unwrap_or_default();
        status.pan_position = current.pan;
        status.tilt_position = current.tilt;
        status.is_calibrated = device.is_calibrated;
        status.is_tracking = device.is_moving;
    }

    Ok(status)
}

/// Encode a heartbeat as a `Ping`. The sequence travels in the command id.
pub fn encode_heartbeat(heartbeat: &HeartbeatMessage) -> Result<Vec<u8>, ProtocolError> {
    encode_envelope(&bare_command(
        heartbeat.sequence,
        heartbeat.timestamp_ms,
        CommandType::Ping,
    ))
}

/// Decode a `Ping`. Any other command type is an invalid message.
pub fn decode_heartbeat(data: &[u8]) -> Result<HeartbeatMessage, ProtocolError> {
    let envelope = parse_command(data)?;
    if envelope.command_type() != Some(CommandType::Ping) {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(HeartbeatMessage {
        timestamp_ms: envelope.timestamp_ms,
        sequence: envelope.id,
    })
}

/// Encode a full calibration request.
pub fn encode_calibrate() -> Result<Vec<u8>, ProtocolError> {
    let mut envelope = bare_command(0, 0, CommandType::Calibrate);
    envelope.payload = Some(command::Payload::Calibrate(wire::CalibrateCommand {
        mode: calibrate_command::Mode::Full as i32,
    }));
    encode_envelope(&envelope)
}

/// Encode a request to return both axes to center.
pub fn encode_home() -> Result<Vec<u8>, ProtocolError> {
    encode_envelope(&bare_command(0, 0, CommandType::Home))
}

/// Encode a request to halt any movement in progress.
pub fn encode_stop() -> Result<Vec<u8>, ProtocolError> {
    encode_envelope(&bare_command(0, 0, CommandType::Stop))
}

/// Encode a status poll. The device answers with a `DeviceStatus`.
pub fn encode_get_status() -> Result<Vec<u8>, ProtocolError> {
    encode_envelope(&bare_command(0, 0, CommandType::GetStatus))
}

/// Encode a `SetConfig` carrying every servo tuning field.
pub fn encode_set_config(config: &ServoConfig) -> Result<Vec<u8>, ProtocolError> {
    let mut envelope = bare_command(0, 0, CommandType::SetConfig);
    envelope.payload = Some(command::Payload::SetConfig(wire::SetConfigCommand {
        config: Some(wire::ServoConfig {
            servo_speed: config.speed,
            smoothing: config.smoothing,
            dead_zone: config.dead_zone,
            pan_min: config.pan_min,
            pan_max: config.pan_max,
            tilt_min: config.tilt_min,
            tilt_max: config.tilt_max,
            invert_pan: config.invert_pan,
            invert_tilt: config.invert_tilt,
        }),
    }));
    encode_envelope(&envelope)
}

/// Decode a `SetConfig`. A missing config payload is an invalid message.
pub fn decode_set_config(data: &[u8]) -> Result<ServoConfig, ProtocolError> {
    let envelope = parse_command(data)?;
    if envelope.command_type() != Some(CommandType::SetConfig) {
        return Err(ProtocolError::InvalidMessage);
    }
    let Some(command::Payload::SetConfig(wire::SetConfigCommand { config: Some(cfg) })) =
        envelope.payload
    else {
        return Err(ProtocolError::InvalidMessage);
    };

    Ok(ServoConfig {
        speed: cfg.servo_speed,
        smoothing: cfg.smoothing,
        dead_zone: cfg.dead_zone,
        pan_min: cfg.pan_min,
        pan_max: cfg.pan_max,
        tilt_min: cfg.tilt_min,
        tilt_max: cfg.tilt_max,
        invert_pan: cfg.invert_pan,
        invert_tilt: cfg.invert_tilt,
    })
}

/// Decode the `error` payload of a failed command's `Response`.
pub fn decode_device_error(data: &[u8]) -> Result<DeviceError, ProtocolError> {
    let envelope = parse_response(data)?;
    let Some(response::Payload::Error(info)) = envelope.payload else {
        return Err(ProtocolError::InvalidMessage);
    };

    Ok(DeviceError {
        command_id: envelope.command_id,
        status: StatusCode::try_from(info.code).unwrap_or(StatusCode::Error),
        message: info.message,
    })
}

/// One step of [`detect_type`]: parse as some envelope and look at its
/// discriminant. `None` means "not recognized, try the next one".
type DetectAttempt = fn(&[u8]) -> Option<MessageKind>;

/// Attempts in priority order. `Command` goes first.
const DETECT_ORDER: &[DetectAttempt] = &[detect_as_command, detect_as_response];

fn detect_as_command(data: &[u8]) -> Option<MessageKind> {
    let envelope = parse_command(data).ok()?;
    match envelope.command_type()? {
        CommandType::Move => match envelope.payload {
            Some(command::Payload::Move(mv)) if mv.use_face_tracking => {
                Some(MessageKind::FaceData)
            }
            _ => Some(MessageKind::ServoCommand),
        },
        CommandType::Ping => Some(MessageKind::Heartbeat),
        CommandType::Calibrate => Some(MessageKind::Calibration),
        CommandType::SetConfig => Some(MessageKind::Config),
        CommandType::Unspecified
        | CommandType::Home
        | CommandType::Stop
        | CommandType::GetStatus => None,
    }
}

fn detect_as_response(data: &[u8]) -> Option<MessageKind> {
    let envelope = parse_response(data).ok()?;
    match envelope.payload {
        Some(response::Payload::DeviceStatus(_)) => Some(MessageKind::Status),
        _ => None,
    }
}

/// Best-effort classification of an opaque buffer.
///
/// The envelopes share no magic bytes, so a buffer that happens to parse as
/// the wrong envelope is misclassified. A status report with a non-zero
/// status, for instance, is also a valid `Move` command and is reported as
/// [`MessageKind::ServoCommand`]. Never panics.
pub fn detect_type(data: &[u8]) -> MessageKind {
    let kind = DETECT_ORDER
        .iter()
        .find_map(|attempt| attempt(data))
        .unwrap_or(MessageKind::Unknown);
    trace!(len = data.len(), ?kind, "Detected message type");
    kind
}

/// Classify a buffer with [`detect_type`] and decode it accordingly.
pub fn decode_message(data: &[u8]) -> Result<InboundMessage, ProtocolError> {
    match detect_type(data) {
        MessageKind::ServoCommand => decode_servo_command(data).map(InboundMessage::ServoCommand),
        MessageKind::FaceData => decode_face_data(data).map(InboundMessage::FaceData),
        MessageKind::Calibration => Ok(InboundMessage::Calibration),
        MessageKind::Status => decode_status(data).map(InboundMessage::Status),
        MessageKind::Heartbeat => decode_heartbeat(data).map(InboundMessage::Heartbeat),
        MessageKind::Config => decode_set_config(data).map(InboundMessage::Config),
        MessageKind::Unknown => Err(ProtocolError::UnknownMessageType),
    }
}
