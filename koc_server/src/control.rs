use std::time::Duration;

use koc_common::{
    config, transport::PushSocket, translate, MotorState, Packet, PacketHeader, SensorState,
    SystemStats, TelemetrySnapshot,
};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    hardware::{Actuator, HardwareError, Wiring},
    queue::CommandQueue,
    stats::StatsSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlConfig {
    pub cycle: Duration,
    /// Cycles without a command before every motor is stopped.
    pub grace_cycles: u32,
    /// Voltage, temperature and host stats are sampled once per this many cycles.
    pub slow_telemetry_period: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle: config::CONTROL_CYCLE,
            grace_cycles: config::COMMAND_GRACE_CYCLES,
            slow_telemetry_period: config::SLOW_TELEMETRY_PERIOD,
        }
    }
}

/// Sole owner of the motor and sensor state.
///
/// Each cycle takes at most one command, drives the motors, reads the sensors
/// back and produces a [`TelemetrySnapshot`]. When no command has arrived for
/// `grace_cycles` cycles the motors are stopped, so the robot halts on its own
/// when its operator goes away.
pub struct ControlLoop {
    actuator: Box<dyn Actuator>,
    stats: Box<dyn StatsSource>,
    queue: CommandQueue,
    config: ControlConfig,
    left_motor: MotorState,
    right_motor: MotorState,
    turret_motor: MotorState,
    ultrasound_sensor: SensorState,
    color_sensor: SensorState,
    grace: u32,
    sequence: u64,
    voltage: f32,
    temperature: f32,
    system_stats: SystemStats,
}

impl ControlLoop {
    pub fn new(
        actuator: Box<dyn Actuator>,
        stats: Box<dyn StatsSource>,
        queue: CommandQueue,
        wiring: Wiring,
        config: ControlConfig,
    ) -> Self {
        let config = ControlConfig {
            grace_cycles: config.grace_cycles.max(1),
            slow_telemetry_period: config.slow_telemetry_period.max(1),
            ..config
        };
        Self {
            actuator,
            stats,
            queue,
            left_motor: MotorState::new(wiring.left_motor),
            right_motor: MotorState::new(wiring.right_motor),
            turret_motor: MotorState::new(wiring.turret_motor),
            ultrasound_sensor: SensorState::new(wiring.ultrasonic_sensor),
            color_sensor: SensorState::new(wiring.color_sensor),
            grace: config.grace_cycles,
            sequence: 0,
            voltage: 0.0,
            temperature: 0.0,
            system_stats: SystemStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Runs one cycle without sleeping. A hardware failure skips the cycle's
    /// snapshot; the command and failsafe bookkeeping still advance.
    pub fn step(&mut self) -> Result<TelemetrySnapshot, HardwareError> {
        self.take_command();
        self.exchange_with_hardware()?;
        self.sequence += 1;
        Ok(self.snapshot())
    }

    fn take_command(&mut self) {
        match self.queue.pop() {
            Some(command) => {
                self.grace = self.config.grace_cycles;
                translate(&command).apply(
                    &mut self.left_motor,
                    &mut self.right_motor,
                    &mut self.turret_motor,
                );
            }
            None => {
                self.grace = self.grace.saturating_sub(1);
                if self.grace == 0 {
                    self.grace = self.config.grace_cycles;
                    if self.moving() {
                        debug!("No commands for {} cycles, stopping motors", self.config.grace_cycles);
                    }
                    self.left_motor.stop();
                    self.right_motor.stop();
                    self.turret_motor.stop();
                }
            }
        }
    }

    fn moving(&self) -> bool {
        [&self.left_motor, &self.right_motor, &self.turret_motor]
            .iter()
            .any(|motor| motor.desired_speed != 0)
    }

    fn exchange_with_hardware(&mut self) -> Result<(), HardwareError> {
        for motor in [&self.left_motor, &self.right_motor, &self.turret_motor] {
            self.actuator
                .write_motor_speed(motor.port, motor.desired_speed)?;
        }
        self.actuator.update()?;
        for motor in [
            &mut self.left_motor,
            &mut self.right_motor,
            &mut self.turret_motor,
        ] {
            motor.current_speed = motor.desired_speed;
        }

        if self.sequence % self.config.slow_telemetry_period == 0 {
            self.temperature = self.actuator.read_board_temperature()?;
            self.voltage = self.actuator.read_board_voltage()?;
            self.system_stats = self.stats.sample();
        }

        for motor in [
            &mut self.left_motor,
            &mut self.right_motor,
            &mut self.turret_motor,
        ] {
            motor.angle = self.actuator.read_encoder(motor.port)?;
        }
        for sensor in [&mut self.color_sensor, &mut self.ultrasound_sensor] {
            sensor.raw = self.actuator.read_sensor_raw(sensor.port)?;
        }
        Ok(())
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            header: PacketHeader::new(self.sequence),
            left_motor: self.left_motor,
            right_motor: self.right_motor,
            turret_motor: self.turret_motor,
            ultrasound_sensor: self.ultrasound_sensor,
            color_sensor: self.color_sensor,
            voltage: self.voltage,
            temperature_celsius: self.temperature,
            system_stats: self.system_stats,
        }
    }

    /// Zeroes every motor and hands the hardware back.
    fn halt(&mut self) {
        for motor in [
            &mut self.left_motor,
            &mut self.right_motor,
            &mut self.turret_motor,
        ] {
            motor.stop();
            if let Err(e) = self.actuator.write_motor_speed(motor.port, 0) {
                warn!("Error stopping motor {:?}: {e}", motor.port);
            }
        }
        if let Err(e) = self.actuator.update() {
            warn!("Error stopping motors: {e}");
        }
        self.actuator.release();
    }

    /// Cycles until cancelled, pushing every snapshot to the aggregator, then
    /// releases the hardware.
    pub async fn run(mut self, telemetry: PushSocket, cancel: CancellationToken) {
        info!(cycle = ?self.config.cycle, grace = self.config.grace_cycles, "Control loop started");
        loop {
            match self.step() {
                Ok(snapshot) => match Packet::from(snapshot).encode() {
                    Ok(frame) => {
                        if let Err(e) = telemetry.send(frame) {
                            debug!("Telemetry snapshot {} dropped: {e}", self.sequence);
                        }
                    }
                    Err(e) => warn!("{e}"),
                },
                Err(e) => warn!("Hardware exchange failed, skipping cycle: {e}"),
            }
            select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.cycle) => {}
            }
        }
        self.halt();
        info!("Control loop stopped");
    }
}
