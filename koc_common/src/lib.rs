mod codec;
pub mod config;
mod error;
mod image_codec;
mod network;
mod packet;
mod translate;
pub mod transport;

pub use codec::{DecodeError, EncodeError, MAX_FRAME_LEN};
pub use error::{Error, Result};
pub use network::NetworkInfo;
pub use packet::{
    CommandKind, CommandMessage, DepthFrame, HeartbeatMessage, MotorPort, MotorState, Packet,
    PacketHeader, Role, SensorFrame, SensorPort, SensorState, SystemStats, TelemetrySnapshot,
    VideoFrame,
};
pub use translate::{translate, MotorTargets};
