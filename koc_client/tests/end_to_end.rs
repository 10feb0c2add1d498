use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use koc_client::{Callbacks, Client, ClientConfig, ConnectionState, TIMEOUT_MESSAGE};
use koc_common::{CommandMessage, TelemetrySnapshot};
use koc_server::{sim::SyntheticFrames, Collaborators, ControlConfig, Server, ServerConfig};
use tokio::{sync::mpsc, time::timeout};

#[derive(Default)]
struct Observed {
    changes: Mutex<Vec<(ConnectionState, ConnectionState)>>,
    errors: Mutex<Vec<String>>,
}

fn observing_callbacks(observed: &Arc<Observed>) -> (Callbacks, mpsc::UnboundedReceiver<TelemetrySnapshot>) {
    let (telemetry, snapshots) = mpsc::unbounded_channel();
    let changes = observed.clone();
    let errors = observed.clone();
    let callbacks = Callbacks::new()
        .on_state_changed(move |old, new| changes.changes.lock().unwrap().push((old, new)))
        .on_error(move |message| errors.errors.lock().unwrap().push(message.to_owned()))
        .on_telemetry(move |snapshot| {
            telemetry.send(snapshot.clone()).ok();
        });
    (callbacks, snapshots)
}

async fn start_server(queue_size: usize, cycle: Duration) -> Server {
    let config = ServerConfig {
        handshake_sleep: Duration::from_millis(50),
        queue_size,
        control: ControlConfig {
            cycle,
            ..ControlConfig::default()
        },
        ..ServerConfig::ephemeral()
    };
    let collaborators = Collaborators {
        frames: Box::new(SyntheticFrames::new(64, 48, Duration::from_millis(50))),
        ..Collaborators::simulated()
    };
    Server::start(config, collaborators).await.unwrap()
}

fn client_config(server: &Server) -> ClientConfig {
    let addrs = server.local_addrs();
    ClientConfig {
        hello_port: addrs.hello.port(),
        telemetry_port: addrs.telemetry.port(),
        command_port: addrs.command.port(),
        heartbeat_interval: Duration::from_millis(200),
        ..ClientConfig::default()
    }
}

/// Waits for a snapshot matching `pred`, sending `command` before every wait.
async fn await_snapshot(
    client: &Client,
    snapshots: &mut mpsc::UnboundedReceiver<TelemetrySnapshot>,
    command: Option<CommandMessage>,
    pred: impl Fn(&TelemetrySnapshot) -> bool,
) -> TelemetrySnapshot {
    timeout(Duration::from_secs(10), async {
        loop {
            if let Some(command) = command {
                client.send_command(command).unwrap();
            }
            if let Some(snapshot) = snapshots.recv().await {
                if pred(&snapshot) {
                    return snapshot;
                }
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_and_drive_forward() {
    let server = start_server(100, Duration::from_millis(100)).await;
    let observed = Arc::new(Observed::default());
    let (callbacks, mut snapshots) = observing_callbacks(&observed);
    let mut client = Client::new(client_config(&server), callbacks);

    client.connect("127.0.0.1").await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(
        *observed.changes.lock().unwrap(),
        [
            (ConnectionState::Disconnected, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Connected),
        ]
    );

    // Telemetry only flows once the heartbeat has opened the gate.
    await_snapshot(&client, &mut snapshots, None, |_| true).await;
    let snapshot = await_snapshot(
        &client,
        &mut snapshots,
        Some(CommandMessage::go_forward(100)),
        |s| s.left_motor.desired_speed == -100,
    )
    .await;
    assert_eq!(snapshot.right_motor.desired_speed, 100);
    assert_eq!(snapshot.turret_motor.desired_speed, 0);

    let heartbeat = client.last_heartbeat().unwrap();
    assert_eq!(heartbeat.role, koc_client::Role::Server);

    // Connecting again while connected changes nothing.
    client.connect("127.0.0.1").await.unwrap();
    assert_eq!(observed.changes.lock().unwrap().len(), 2);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.address().is_none());
    assert!(client.send_command(CommandMessage::go_forward(1)).is_err());
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_loss_is_reported_once() {
    let server = start_server(100, Duration::from_millis(100)).await;
    let observed = Arc::new(Observed::default());
    let (callbacks, mut snapshots) = observing_callbacks(&observed);
    let mut client = Client::new(client_config(&server), callbacks);
    let mut state = client.watch_state();

    client.connect("127.0.0.1").await.unwrap();
    await_snapshot(&client, &mut snapshots, None, |_| true).await;
    server.shutdown().await;

    timeout(
        Duration::from_secs(10),
        state.wait_for(|state| *state == ConnectionState::Error),
    )
    .await
    .unwrap()
    .unwrap();
    // Long enough for the detector to fire again on continued silence.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(client.state(), ConnectionState::Error);
    let errors = observed.errors.lock().unwrap().clone();
    assert_eq!(errors, [TIMEOUT_MESSAGE]);
    let to_error = observed
        .changes
        .lock()
        .unwrap()
        .iter()
        .filter(|change| **change == (ConnectionState::Connected, ConnectionState::Error))
        .count();
    assert_eq!(to_error, 1);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn empty_address_starts_nothing() {
    let observed = Arc::new(Observed::default());
    let (callbacks, _snapshots) = observing_callbacks(&observed);
    let mut client = Client::new(ClientConfig::default(), callbacks);

    assert!(client.connect("").await.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.has_session());
    assert!(observed.changes.lock().unwrap().is_empty());
    assert_eq!(observed.errors.lock().unwrap().len(), 1);
    assert!(!observed.errors.lock().unwrap()[0].is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn burst_beyond_queue_capacity_keeps_latest_command() {
    const CAPACITY: usize = 4;
    let server = start_server(CAPACITY, Duration::from_millis(50)).await;
    let observed = Arc::new(Observed::default());
    let (callbacks, mut snapshots) = observing_callbacks(&observed);
    let mut client = Client::new(client_config(&server), callbacks);

    client.connect("127.0.0.1").await.unwrap();
    await_snapshot(&client, &mut snapshots, None, |_| true).await;

    let last = (CAPACITY + 5) as u8;
    for magnitude in 1..=last {
        client
            .send_command(CommandMessage::turn_left(magnitude * 10))
            .unwrap();
    }
    let expected = -i32::from(last) * 10;
    await_snapshot(&client, &mut snapshots, None, |s| {
        s.left_motor.desired_speed == expected && s.right_motor.desired_speed == expected
    })
    .await;
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().await;
    server.shutdown().await;
}
