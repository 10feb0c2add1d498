//! Robot side of the remote-operation link.
//!
//! [`Server::start`] binds every channel immediately but leaves the hardware
//! idle: the control loop and the sensor stream are only started once a client
//! sends its first heartbeat to the handshake gate.

mod aggregator;
mod control;
mod gate;
pub mod hardware;
mod ingest;
mod queue;
mod sensor;
pub mod sim;
pub mod stats;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Context, Result};
use koc_common::{
    config::{self, Ports},
    transport::{PubSocket, PullSocket, PushSocket, RepSocket},
};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

pub use aggregator::Aggregator;
pub use control::{ControlConfig, ControlLoop};
pub use gate::{Component, HandshakeGate, Task};
pub use ingest::CommandIngest;
pub use queue::CommandQueue;
pub use sensor::SensorStream;

use crate::{
    hardware::{Actuator, FrameSource, Wiring},
    sim::{SimulatedRobot, SyntheticFrames},
    stats::{HostStats, StatsSource},
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host the handshake, telemetry and command channels bind to.
    pub bind_host: IpAddr,
    /// Host of the two internal fan-in channels.
    pub internal_host: IpAddr,
    pub ports: Ports,
    pub control: ControlConfig,
    pub handshake_sleep: Duration,
    pub queue_size: usize,
    pub shutdown_timeout: Duration,
    pub wiring: Wiring,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            internal_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: Ports::default(),
            control: ControlConfig::default(),
            handshake_sleep: config::HELLO_SLEEP,
            queue_size: config::COMMAND_QUEUE_SIZE,
            shutdown_timeout: config::SHUTDOWN_TIMEOUT,
            wiring: Wiring::default(),
        }
    }
}

impl ServerConfig {
    /// Loopback only, with every port chosen by the OS.
    pub fn ephemeral() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: Ports {
                hello: 0,
                brickpi: 0,
                kinect: 0,
                telemetry: 0,
                command: 0,
            },
            ..Self::default()
        }
    }
}

/// The hardware the server drives.
pub struct Collaborators {
    pub actuator: Box<dyn Actuator>,
    pub frames: Box<dyn FrameSource>,
    pub stats: Box<dyn StatsSource>,
}

impl Collaborators {
    pub fn simulated() -> Self {
        Self {
            actuator: Box::new(SimulatedRobot::new()),
            frames: Box::new(SyntheticFrames::default()),
            stats: Box::new(HostStats::new()),
        }
    }
}

/// Where clients reach a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddrs {
    pub hello: SocketAddr,
    pub telemetry: SocketAddr,
    pub command: SocketAddr,
}

pub struct Server {
    addrs: ServerAddrs,
    cancel: CancellationToken,
    /// Each task with the time it is given to stop.
    tasks: Vec<(&'static str, Duration, JoinHandle<()>)>,
    _cancel_guard: DropGuard,
}

impl Server {
    pub async fn start(config: ServerConfig, collaborators: Collaborators) -> Result<Self> {
        let ports = config.ports;
        let bind = |port| SocketAddr::new(config.bind_host, port);
        let internal = |port| SocketAddr::new(config.internal_host, port);

        let brick_pull = PullSocket::bind(internal(ports.brickpi))
            .await
            .context("binding telemetry fan-in")?;
        let sensor_pull = PullSocket::bind(internal(ports.kinect))
            .await
            .context("binding sensor fan-in")?;
        let publisher = PubSocket::bind(bind(ports.telemetry))
            .await
            .context("binding telemetry broadcast")?;
        let command_pull = PullSocket::bind(bind(ports.command))
            .await
            .context("binding command channel")?;
        let rep = RepSocket::bind(bind(ports.hello))
            .await
            .context("binding handshake channel")?;

        let addrs = ServerAddrs {
            hello: rep.local_addr(),
            telemetry: publisher.local_addr(),
            command: command_pull.local_addr(),
        };
        let brick_push = PushSocket::connect(brick_pull.local_addr());
        let sensor_push = PushSocket::connect(sensor_pull.local_addr());

        let queue = CommandQueue::new(config.queue_size);
        let control = ControlLoop::new(
            collaborators.actuator,
            collaborators.stats,
            queue.clone(),
            config.wiring,
            config.control,
        );
        let sensor = SensorStream::new(collaborators.frames);
        let components: Vec<Box<dyn Component>> = vec![
            Box::new(Task::new("control loop", config.shutdown_timeout, move |cancel| {
                tokio::spawn(control.run(brick_push, cancel))
            })),
            Box::new(Task::new("sensor stream", config.shutdown_timeout, move |cancel| {
                tokio::task::spawn_blocking(move || sensor.run(sensor_push, cancel))
            })),
        ];

        // The gate stops its components one after another before it returns.
        let gate_timeout = gate_shutdown_timeout(config.shutdown_timeout, components.len());

        let cancel = CancellationToken::new();
        let tasks = vec![
            (
                "command ingest",
                config.shutdown_timeout,
                tokio::spawn(CommandIngest::new(command_pull, queue).run(cancel.clone())),
            ),
            (
                "aggregator",
                config.shutdown_timeout,
                tokio::spawn(Aggregator::new(brick_pull, sensor_pull, publisher).run(cancel.clone())),
            ),
            (
                "handshake gate",
                gate_timeout,
                tokio::spawn(
                    HandshakeGate::new(rep, components, config.handshake_sleep).run(cancel.clone()),
                ),
            ),
        ];
        info!(
            "Server ready: handshake {}, telemetry {}, commands {}",
            addrs.hello, addrs.telemetry, addrs.command
        );

        Ok(Self {
            addrs,
            _cancel_guard: cancel.clone().drop_guard(),
            cancel,
            tasks,
        })
    }

    pub fn local_addrs(&self) -> ServerAddrs {
        self.addrs
    }

    /// Stops every task and waits for each one, giving up on a task after the
    /// time it was given.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, limit, handle) in self.tasks {
            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{name} failed: {e}"),
                Err(_) => warn!("{name} did not stop within {limit:?}"),
            }
        }
        info!("Server stopped");
    }
}

fn gate_shutdown_timeout(per_task: Duration, components: usize) -> Duration {
    per_task.saturating_mul(components as u32 + 1)
}
