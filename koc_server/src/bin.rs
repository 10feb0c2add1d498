use std::{net::IpAddr, time::Duration};

use anyhow::Result;
use clap::Parser;
use koc_common::config::{self, Ports};
use koc_server::{Collaborators, ControlConfig, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Robot side of the remote-operation link")]
struct Cli {
    /// Address the public channels bind to
    #[arg(long, env = "ROBOT_IP", default_value = "0.0.0.0")]
    robot_ip: IpAddr,

    #[arg(long, env = "HELLO_PORT", default_value_t = config::HELLO_PORT)]
    hello_port: u16,

    /// Internal fan-in port for motor telemetry
    #[arg(long, env = "BRICKPI_PORT", default_value_t = config::BRICKPI_PORT)]
    brickpi_port: u16,

    /// Internal fan-in port for depth camera frames
    #[arg(long, env = "KINECT_PORT", default_value_t = config::KINECT_PORT)]
    kinect_port: u16,

    #[arg(long, env = "TELEMETRY_PORT", default_value_t = config::TELEMETRY_PORT)]
    telemetry_port: u16,

    #[arg(long, env = "COMMAND_PORT", default_value_t = config::COMMAND_PORT)]
    command_port: u16,

    /// Control loop period in seconds
    #[arg(long, env = "BRICKPI_CLOCK", default_value_t = config::CONTROL_CYCLE.as_secs_f64())]
    brickpi_clock: f64,

    /// Pause between handshake requests in seconds
    #[arg(long, env = "HELLO_SLEEP", default_value_t = config::HELLO_SLEEP.as_secs_f64())]
    hello_sleep: f64,

    #[arg(long, env = "COMMAND_QUEUE_SIZE", default_value_t = config::COMMAND_QUEUE_SIZE)]
    command_queue_size: usize,

    /// Control cycles without a command before the motors stop
    #[arg(long, env = "COMMAND_GRACE_CYCLES", default_value_t = config::COMMAND_GRACE_CYCLES)]
    grace_cycles: u32,
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let seconds = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value).map_err(|e| anyhow::anyhow!("invalid {name} {value}: {e}"))
        };
        Ok(ServerConfig {
            bind_host: self.robot_ip,
            ports: Ports {
                hello: self.hello_port,
                brickpi: self.brickpi_port,
                kinect: self.kinect_port,
                telemetry: self.telemetry_port,
                command: self.command_port,
            },
            control: ControlConfig {
                cycle: seconds("BRICKPI_CLOCK", self.brickpi_clock)?,
                grace_cycles: self.grace_cycles,
                ..ControlConfig::default()
            },
            handshake_sleep: seconds("HELLO_SLEEP", self.hello_sleep)?,
            queue_size: self.command_queue_size,
            ..ServerConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let server = Server::start(cli.server_config()?, Collaborators::simulated()).await?;
    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
