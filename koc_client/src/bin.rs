use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use clap::Parser;
use koc_client::{Callbacks, Client, ClientConfig, ConnectionState};
use koc_common::{config, CommandMessage, TelemetrySnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const POWER_STEP: u8 = 50;
const MAX_POWER: u8 = 250;

const HELP: &str = "\
a,z     power up/down
w,s     forward/backward
h,l     strafe left/right
q,e     turn left/right
[,]     turret left/right
r       turret reset
c       reconnect
quit    exit";

#[derive(Parser, Debug)]
#[command(version, about = "Console operator for the robot")]
struct Cli {
    #[arg(long, env = "ROBOT_IP", default_value = config::LOCALHOST)]
    robot_ip: String,

    #[arg(long, env = "HELLO_PORT", default_value_t = config::HELLO_PORT)]
    hello_port: u16,

    #[arg(long, env = "TELEMETRY_PORT", default_value_t = config::TELEMETRY_PORT)]
    telemetry_port: u16,

    #[arg(long, env = "COMMAND_PORT", default_value_t = config::COMMAND_PORT)]
    command_port: u16,

    /// Print one telemetry snapshot in this many
    #[arg(long, default_value_t = 10)]
    every: u64,

    /// Print telemetry as JSON lines
    #[arg(long)]
    json: bool,
}

fn print_snapshot(snapshot: &TelemetrySnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Error serializing telemetry: {e}"),
        }
        return;
    }
    println!(
        "#{:<6} L {:>4}/{:<6} R {:>4}/{:<6} T {:>4}/{:<6} us {:>4} col {:>4} {:.2}V {:.1}C cpu {:.0}%",
        snapshot.header.sequence,
        snapshot.left_motor.current_speed,
        snapshot.left_motor.angle,
        snapshot.right_motor.current_speed,
        snapshot.right_motor.angle,
        snapshot.turret_motor.current_speed,
        snapshot.turret_motor.angle,
        snapshot.ultrasound_sensor.raw,
        snapshot.color_sensor.raw,
        snapshot.voltage,
        snapshot.temperature_celsius,
        snapshot.system_stats.cpu_percent,
    );
}

fn command_for(key: &str, power: u8) -> Option<CommandMessage> {
    Some(match key {
        "w" => CommandMessage::go_forward(power),
        "s" => CommandMessage::go_backward(power),
        "h" => CommandMessage::go_left(power),
        "l" => CommandMessage::go_right(power),
        "q" => CommandMessage::turn_left(power),
        "e" => CommandMessage::turn_right(power),
        "[" => CommandMessage::turret_left(power),
        "]" => CommandMessage::turret_right(power),
        "r" => CommandMessage::turret_reset(),
        _ => return None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig {
        hello_port: cli.hello_port,
        telemetry_port: cli.telemetry_port,
        command_port: cli.command_port,
        ..ClientConfig::default()
    };
    let json = cli.json;
    let every = cli.every.max(1);
    let received = AtomicU64::new(0);
    let callbacks = Callbacks::new()
        .on_state_changed(|_, new| eprintln!("[{new}]"))
        .on_error(|message| eprintln!("error: {message}"))
        .on_telemetry(move |snapshot| {
            if received.fetch_add(1, Ordering::Relaxed) % every == 0 {
                print_snapshot(snapshot, json);
            }
        });
    let mut client = Client::new(config, callbacks);
    client.connect(&cli.robot_ip).await?;
    eprintln!("{HELP}");

    let mut power = 0u8;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        match line.trim() {
            "quit" | "exit" => break,
            "a" => power = power.saturating_add(POWER_STEP).min(MAX_POWER),
            "z" => power = power.saturating_sub(POWER_STEP),
            "c" => {
                if client.state() != ConnectionState::Disconnected {
                    client.disconnect().await;
                }
                if let Err(e) = client.connect(&cli.robot_ip).await {
                    eprintln!("reconnect failed: {e}");
                }
            }
            key => match command_for(key, power) {
                Some(command) => {
                    if let Err(e) = client.send_command(command) {
                        eprintln!("command dropped: {e}");
                    }
                }
                None => eprintln!("{HELP}"),
            },
        }
        eprintln!("current power: {power}");
    }
    client.disconnect().await;
    Ok(())
}
