use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::network::NetworkInfo;

/// Every message exchanged over any channel.
///
/// The variant index is the type tag on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Heartbeat(HeartbeatMessage),
    Command(CommandMessage),
    Telemetry(TelemetrySnapshot),
    SensorFrame(SensorFrame),
}

impl Packet {
    pub fn header(&self) -> &PacketHeader {
        match self {
            Self::Heartbeat(msg) => &msg.header,
            Self::Command(msg) => &msg.header,
            Self::Telemetry(msg) => &msg.header,
            Self::SensorFrame(msg) => &msg.header,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.header().sequence
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::Command(_) => "command",
            Self::Telemetry(_) => "telemetry",
            Self::SensorFrame(_) => "sensor frame",
        }
    }

    /// Short "<kind> seq <n>" label for log lines.
    pub fn describe(&self) -> String {
        format!("{} seq {}", self.kind(), self.sequence())
    }
}

impl From<HeartbeatMessage> for Packet {
    fn from(msg: HeartbeatMessage) -> Self {
        Self::Heartbeat(msg)
    }
}

impl From<CommandMessage> for Packet {
    fn from(msg: CommandMessage) -> Self {
        Self::Command(msg)
    }
}

impl From<TelemetrySnapshot> for Packet {
    fn from(msg: TelemetrySnapshot) -> Self {
        Self::Telemetry(msg)
    }
}

impl From<SensorFrame> for Packet {
    fn from(msg: SensorFrame) -> Self {
        Self::SensorFrame(msg)
    }
}

/// Fields shared by every packet.
///
/// Sequence numbers are per stream and only advisory; nothing retransmits on a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub sequence: u64,
    pub timestamp: SystemTime,
}

impl PacketHeader {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub header: PacketHeader,
    pub role: Role,
    pub network: NetworkInfo,
    pub running: bool,
    pub desired_interval_secs: f64,
}

impl HeartbeatMessage {
    pub fn request(sequence: u64, network: NetworkInfo, desired_interval_secs: f64) -> Self {
        Self {
            header: PacketHeader::new(sequence),
            role: Role::Client,
            network,
            running: true,
            desired_interval_secs,
        }
    }

    /// Builds the server reply; its sequence is always the request's plus one.
    pub fn response_to(
        request: &HeartbeatMessage,
        network: NetworkInfo,
        desired_interval_secs: f64,
    ) -> Self {
        Self {
            header: PacketHeader::new(request.header.sequence.wrapping_add(1)),
            role: Role::Server,
            network,
            running: true,
            desired_interval_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    GoForward,
    GoBackward,
    GoLeft,
    GoRight,
    TurnLeft,
    TurnRight,
    TurretLeft,
    TurretRight,
    TurretReset,
}

impl CommandKind {
    pub const ALL: [CommandKind; 9] = [
        Self::GoForward,
        Self::GoBackward,
        Self::GoLeft,
        Self::GoRight,
        Self::TurnLeft,
        Self::TurnRight,
        Self::TurretLeft,
        Self::TurretRight,
        Self::TurretReset,
    ];
}

/// Fire-and-forget movement intent. Always sequence 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub header: PacketHeader,
    pub kind: CommandKind,
    pub magnitude: u8,
}

impl CommandMessage {
    pub fn new(kind: CommandKind, magnitude: u8) -> Self {
        let magnitude = match kind {
            CommandKind::TurretReset => 0,
            _ => magnitude,
        };
        Self {
            header: PacketHeader::new(0),
            kind,
            magnitude,
        }
    }

    pub fn go_forward(magnitude: u8) -> Self {
        Self::new(CommandKind::GoForward, magnitude)
    }

    pub fn go_backward(magnitude: u8) -> Self {
        Self::new(CommandKind::GoBackward, magnitude)
    }

    pub fn go_left(magnitude: u8) -> Self {
        Self::new(CommandKind::GoLeft, magnitude)
    }

    pub fn go_right(magnitude: u8) -> Self {
        Self::new(CommandKind::GoRight, magnitude)
    }

    pub fn turn_left(magnitude: u8) -> Self {
        Self::new(CommandKind::TurnLeft, magnitude)
    }

    pub fn turn_right(magnitude: u8) -> Self {
        Self::new(CommandKind::TurnRight, magnitude)
    }

    pub fn turret_left(magnitude: u8) -> Self {
        Self::new(CommandKind::TurretLeft, magnitude)
    }

    pub fn turret_right(magnitude: u8) -> Self {
        Self::new(CommandKind::TurretRight, magnitude)
    }

    pub fn turret_reset() -> Self {
        Self::new(CommandKind::TurretReset, 0)
    }
}

/// Output port of the motor controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorPort {
    A,
    B,
    C,
    D,
}

/// Input port of the motor controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorPort {
    S1,
    S2,
    S3,
    S4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorState {
    pub port: MotorPort,
    /// Speed last written to the hardware.
    pub current_speed: i32,
    /// Speed requested by the latest command (or zeroed by the failsafe).
    pub desired_speed: i32,
    /// Encoder position.
    pub angle: i32,
}

impl MotorState {
    pub fn new(port: MotorPort) -> Self {
        Self {
            port,
            current_speed: 0,
            desired_speed: 0,
            angle: 0,
        }
    }

    pub fn stop(&mut self) {
        self.desired_speed = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorState {
    pub port: SensorPort,
    pub raw: i32,
}

impl SensorState {
    pub fn new(port: SensorPort) -> Self {
        Self { port, raw: 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub ram_used_mb: f64,
    pub ram_total_mb: f64,
    pub net_bytes_sent: u64,
    pub net_bytes_recv: u64,
    pub net_bandwidth_mbps: f64,
}

/// One control cycle's view of the robot. Never mutated after it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub header: PacketHeader,
    pub left_motor: MotorState,
    pub right_motor: MotorState,
    pub turret_motor: MotorState,
    pub ultrasound_sensor: SensorState,
    pub color_sensor: SensorState,
    pub voltage: f32,
    pub temperature_celsius: f32,
    pub system_stats: SystemStats,
}

/// Row-major RGB888 image. Encoded as PNG on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub const CHANNELS: usize = 3;

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::CHANNELS
    }
}

/// Row-major depth image of raw 11-bit readings. Encoded as 16-bit grayscale
/// PNG on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

impl DepthFrame {
    /// Largest raw reading; also what the sensor reports for "no return".
    pub const MAX_RAW: u16 = 2047;

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub header: PacketHeader,
    pub video: VideoFrame,
    pub depth: DepthFrame,
    // The capture driver does not report tilt yet; both stay zero.
    pub tilt_state: i32,
    pub tilt_degrees: f64,
}
