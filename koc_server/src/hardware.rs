//! Interfaces to the robot's hardware. The register-level drivers live outside
//! this crate; [`crate::sim`] provides stand-ins for running without a robot.

use koc_common::{DepthFrame, MotorPort, SensorPort, VideoFrame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bus error: {0}")]
    Bus(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Motor controller board with its attached sensors.
///
/// Writes may be buffered until [`Actuator::update`], which exchanges one batch
/// of register values with the board; reads return what the last update fetched.
pub trait Actuator: Send {
    fn write_motor_speed(&mut self, port: MotorPort, speed: i32) -> Result<(), HardwareError>;

    fn update(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn read_encoder(&mut self, port: MotorPort) -> Result<i32, HardwareError>;
    fn read_sensor_raw(&mut self, port: SensorPort) -> Result<i32, HardwareError>;
    fn read_board_temperature(&mut self) -> Result<f32, HardwareError>;
    fn read_board_voltage(&mut self) -> Result<f32, HardwareError>;

    /// Stops every motor and gives the bus back. Called once when the control
    /// loop ends.
    fn release(&mut self) {}
}

/// Depth camera delivering paired video and depth frames.
pub trait FrameSource: Send {
    /// Blocks until the next video frame is available.
    fn capture_video(&mut self) -> Result<VideoFrame, HardwareError>;
    fn capture_depth(&mut self) -> Result<DepthFrame, HardwareError>;

    fn tilt_state(&mut self) -> i32 {
        0
    }

    fn tilt_degrees(&mut self) -> f64 {
        0.0
    }

    fn release(&mut self) {}
}

/// Which board port each part of the robot is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wiring {
    pub left_motor: MotorPort,
    pub right_motor: MotorPort,
    pub turret_motor: MotorPort,
    pub color_sensor: SensorPort,
    pub ultrasonic_sensor: SensorPort,
}

impl Default for Wiring {
    fn default() -> Self {
        Self {
            left_motor: MotorPort::A,
            right_motor: MotorPort::D,
            turret_motor: MotorPort::C,
            color_sensor: SensorPort::S1,
            ultrasonic_sensor: SensorPort::S4,
        }
    }
}
