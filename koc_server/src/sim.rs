//! Stand-in hardware for running the server on a development machine.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use koc_common::{DepthFrame, MotorPort, SensorPort, VideoFrame};

use crate::hardware::{Actuator, FrameSource, HardwareError};

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Board temperature in degrees Celsius from a Linux thermal zone file, which
/// reports milli-degrees.
pub fn read_thermal_zone(path: impl AsRef<Path>) -> Result<f32, HardwareError> {
    let raw = fs::read_to_string(path)?;
    let millis: i64 = raw
        .trim()
        .parse()
        .map_err(|e| HardwareError::Bus(format!("bad thermal reading {raw:?}: {e}")))?;
    Ok(millis as f32 / 1000.0)
}

/// Motors that integrate their speed into the encoder angle, and sensors that
/// report slowly varying values.
#[derive(Debug)]
pub struct SimulatedRobot {
    pending: HashMap<MotorPort, i32>,
    speeds: HashMap<MotorPort, i32>,
    angles: HashMap<MotorPort, f64>,
    last_update: Instant,
    ticks: u64,
}

impl SimulatedRobot {
    /// Encoder ticks per second at speed 1.
    const TICKS_PER_SPEED: f64 = 2.0;

    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            speeds: HashMap::new(),
            angles: HashMap::new(),
            last_update: Instant::now(),
            ticks: 0,
        }
    }

    pub fn speed(&self, port: MotorPort) -> i32 {
        self.speeds.get(&port).copied().unwrap_or(0)
    }
}

impl Default for SimulatedRobot {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for SimulatedRobot {
    fn write_motor_speed(&mut self, port: MotorPort, speed: i32) -> Result<(), HardwareError> {
        self.pending.insert(port, speed);
        Ok(())
    }

    fn update(&mut self) -> Result<(), HardwareError> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        for (port, speed) in &self.speeds {
            *self.angles.entry(*port).or_default() += *speed as f64 * Self::TICKS_PER_SPEED * dt;
        }
        self.speeds.extend(self.pending.drain());
        self.ticks += 1;
        Ok(())
    }

    fn read_encoder(&mut self, port: MotorPort) -> Result<i32, HardwareError> {
        Ok(self.angles.get(&port).copied().unwrap_or(0.0).round() as i32)
    }

    fn read_sensor_raw(&mut self, port: SensorPort) -> Result<i32, HardwareError> {
        let phase = self.ticks as f64 / 20.0;
        Ok(match port {
            // ultrasonic distance in cm
            SensorPort::S4 => (120.0 + 60.0 * phase.sin()) as i32,
            // reflected light
            SensorPort::S1 => (512.0 + 200.0 * phase.cos()) as i32,
            _ => 0,
        })
    }

    fn read_board_temperature(&mut self) -> Result<f32, HardwareError> {
        Ok(read_thermal_zone(THERMAL_ZONE).unwrap_or(42.0))
    }

    fn read_board_voltage(&mut self) -> Result<f32, HardwareError> {
        Ok(9.0 - (self.ticks as f32 * 1e-5).min(1.5))
    }

    fn release(&mut self) {
        self.pending.clear();
        self.speeds.clear();
    }
}

/// Moving gradient frames at the depth camera's native resolution and rate.
#[derive(Debug)]
pub struct SyntheticFrames {
    width: u32,
    height: u32,
    period: Duration,
    frame: u32,
}

impl SyntheticFrames {
    pub fn new(width: u32, height: u32, period: Duration) -> Self {
        Self {
            width,
            height,
            period,
            frame: 0,
        }
    }
}

impl Default for SyntheticFrames {
    fn default() -> Self {
        Self::new(640, 480, Duration::from_millis(33))
    }
}

impl FrameSource for SyntheticFrames {
    fn capture_video(&mut self) -> Result<VideoFrame, HardwareError> {
        thread::sleep(self.period);
        self.frame = self.frame.wrapping_add(1);
        let mut data = Vec::with_capacity((self.width * self.height) as usize * VideoFrame::CHANNELS);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x.wrapping_add(self.frame) & 0xff) as u8);
                data.push((y & 0xff) as u8);
                data.push((self.frame & 0xff) as u8);
            }
        }
        Ok(VideoFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn capture_depth(&mut self) -> Result<DepthFrame, HardwareError> {
        let span = u32::from(DepthFrame::MAX_RAW);
        let data = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x + y) % span))
            .map(|raw| raw as u16)
            .collect();
        Ok(DepthFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encoder_follows_applied_speed() {
        let mut robot = SimulatedRobot::new();
        robot.write_motor_speed(MotorPort::A, 200).unwrap();
        robot.update().unwrap();
        thread::sleep(Duration::from_millis(50));
        robot.update().unwrap();
        assert_eq!(robot.speed(MotorPort::A), 200);
        assert!(robot.read_encoder(MotorPort::A).unwrap() > 0);
        assert_eq!(robot.read_encoder(MotorPort::D).unwrap(), 0);
    }

    #[test]
    fn writes_apply_on_update() {
        let mut robot = SimulatedRobot::new();
        robot.write_motor_speed(MotorPort::C, -50).unwrap();
        assert_eq!(robot.speed(MotorPort::C), 0);
        robot.update().unwrap();
        assert_eq!(robot.speed(MotorPort::C), -50);
    }

    #[test]
    fn synthetic_frames_have_expected_size() {
        let mut frames = SyntheticFrames::new(8, 4, Duration::ZERO);
        let video = frames.capture_video().unwrap();
        let depth = frames.capture_depth().unwrap();
        assert_eq!(video.data.len(), video.expected_len());
        assert_eq!(depth.data.len(), depth.expected_len());
        assert!(depth.data.iter().all(|&raw| raw <= DepthFrame::MAX_RAW));
    }

    #[test]
    fn thermal_zone_reports_celsius() {
        let path = std::env::temp_dir().join(format!("koc_thermal_{}", std::process::id()));
        fs::write(&path, "48312\n").unwrap();
        assert_eq!(read_thermal_zone(&path).unwrap(), 48.312);
        fs::remove_file(&path).unwrap();
    }
}
