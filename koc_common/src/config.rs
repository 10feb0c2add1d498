//! Defaults shared by the robot server and its clients.
//!
//! The binaries let every value be overridden from the command line or from the
//! environment variable of the same name.

use std::time::Duration;

pub const HELLO_PORT: u16 = 5556;
pub const BRICKPI_PORT: u16 = 5557;
pub const KINECT_PORT: u16 = 5558;
pub const TELEMETRY_PORT: u16 = 5559;
pub const COMMAND_PORT: u16 = 5560;

pub const LOCALHOST: &str = "127.0.0.1";

pub const CONTROL_CYCLE: Duration = Duration::from_millis(100);
pub const HELLO_SLEEP: Duration = Duration::from_secs(1);
pub const COMMAND_QUEUE_SIZE: usize = 100;
/// Control cycles without a command before the motors are stopped.
pub const COMMAND_GRACE_CYCLES: u32 = 3;
/// Control cycles between reads of voltage and board temperature.
pub const SLOW_TELEMETRY_PERIOD: u64 = 50;

pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);
/// Consecutive empty polls before the link is reported as lost.
pub const TIMEOUT_THRESHOLD: u32 = 4;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// The four externally visible channels plus the two internal fan-in ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub hello: u16,
    pub brickpi: u16,
    pub kinect: u16,
    pub telemetry: u16,
    pub command: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            hello: HELLO_PORT,
            brickpi: BRICKPI_PORT,
            kinect: KINECT_PORT,
            telemetry: TELEMETRY_PORT,
            command: COMMAND_PORT,
        }
    }
}
