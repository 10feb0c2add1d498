//! Operator side of the remote-operation link.
//!
//! A [`Client`] keeps a handshake going with the robot, subscribes to its
//! telemetry broadcast and pushes movement commands. Link loss is detected from
//! telemetry silence and reported as [`ConnectionState::Error`]; recovering is
//! up to the operator.

mod heartbeat;
mod telemetry;

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use koc_common::{
    config,
    transport::{PushSocket, ReqSocket, SubSocket},
    CommandMessage, EncodeError, HeartbeatMessage, Packet, SensorFrame, TelemetrySnapshot,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

pub use koc_common::{CommandKind, Role};
pub use telemetry::TimeoutDetector;

pub const TIMEOUT_MESSAGE: &str = "Connection timeout - robot may be offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Robot address is required")]
    EmptyAddress,
    #[error("cannot resolve {0}: {1}")]
    Resolve(String, std::io::Error),
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] koc_common::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientConfig {
    pub hello_port: u16,
    pub telemetry_port: u16,
    pub command_port: u16,
    /// Longest a single telemetry poll waits.
    pub poll_timeout: Duration,
    /// Consecutive empty polls before the link counts as lost.
    pub timeout_threshold: u32,
    pub heartbeat_interval: Duration,
    /// Longest a heartbeat waits for its reply.
    pub heartbeat_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hello_port: config::HELLO_PORT,
            telemetry_port: config::TELEMETRY_PORT,
            command_port: config::COMMAND_PORT,
            poll_timeout: config::POLL_TIMEOUT,
            timeout_threshold: config::TIMEOUT_THRESHOLD,
            heartbeat_interval: config::HEARTBEAT_INTERVAL,
            heartbeat_timeout: config::SHUTDOWN_TIMEOUT,
            shutdown_timeout: config::SHUTDOWN_TIMEOUT,
        }
    }
}

type StateCallback = Box<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Observers of a [`Client`]. They run on the client's tasks and must not block.
pub struct Callbacks {
    on_state_changed: StateCallback,
    on_error: Box<dyn Fn(&str) + Send + Sync>,
    on_telemetry: Box<dyn Fn(&TelemetrySnapshot) + Send + Sync>,
    on_sensor_frame: Box<dyn Fn(&SensorFrame) + Send + Sync>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_state_changed: Box::new(|_, _| {}),
            on_error: Box::new(|_| {}),
            on_telemetry: Box::new(|_| {}),
            on_sensor_frame: Box::new(|_| {}),
        }
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the old and the new state.
    pub fn on_state_changed(
        mut self,
        f: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_changed = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }

    pub fn on_telemetry(mut self, f: impl Fn(&TelemetrySnapshot) + Send + Sync + 'static) -> Self {
        self.on_telemetry = Box::new(f);
        self
    }

    pub fn on_sensor_frame(mut self, f: impl Fn(&SensorFrame) + Send + Sync + 'static) -> Self {
        self.on_sensor_frame = Box::new(f);
        self
    }
}

/// State shared between the client handle and its tasks.
pub(crate) struct Shared {
    callbacks: Callbacks,
    state: watch::Sender<ConnectionState>,
    last_heartbeat: watch::Sender<Option<HeartbeatMessage>>,
}

impl Shared {
    fn set_state(&self, new: ConnectionState) {
        let old = self.state.send_replace(new);
        if old != new {
            info!("Connection state: {old} -> {new}");
            (self.callbacks.on_state_changed)(old, new);
        }
    }

    fn report_error(&self, message: &str) {
        error!("{message}");
        (self.callbacks.on_error)(message);
    }

    /// Only a connected client is moved to the error state.
    fn on_timeout(&self) {
        let moved = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Error;
                true
            } else {
                false
            }
        });
        if moved {
            info!(
                "Connection state: {} -> {}",
                ConnectionState::Connected,
                ConnectionState::Error
            );
            (self.callbacks.on_state_changed)(ConnectionState::Connected, ConnectionState::Error);
            self.report_error(TIMEOUT_MESSAGE);
        }
    }
}

/// Tasks running for one connection attempt.
struct Session {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    commands: Option<PushSocket>,
    _cancel_guard: DropGuard,
}

impl Session {
    fn new() -> Self {
        let cancel = CancellationToken::new();
        Self {
            _cancel_guard: cancel.clone().drop_guard(),
            cancel,
            tasks: Vec::new(),
            commands: None,
        }
    }

    async fn stop(self, limit: Duration) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Error stopping {name}: {e}"),
                Err(_) => warn!("{name} did not stop within {limit:?}"),
            }
        }
    }
}

pub struct Client {
    config: ClientConfig,
    shared: Arc<Shared>,
    address: Option<String>,
    session: Option<Session>,
}

impl Client {
    pub fn new(config: ClientConfig, callbacks: Callbacks) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                callbacks,
                state: watch::Sender::new(ConnectionState::Disconnected),
                last_heartbeat: watch::Sender::new(None),
            }),
            address: None,
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The robot address of the current connection attempt.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// The robot's most recent handshake reply.
    pub fn last_heartbeat(&self) -> Option<HeartbeatMessage> {
        self.shared.last_heartbeat.borrow().clone()
    }

    /// Whether heartbeat and telemetry tasks exist for this client.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Starts talking to the robot at `address` (a host name or IP).
    ///
    /// Does nothing while already connected. An empty address is reported to
    /// the error observer and leaves the state untouched.
    pub async fn connect(&mut self, address: &str) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Connected {
            warn!("Already connected, disconnect first");
            return Ok(());
        }
        let address = address.trim();
        if address.is_empty() {
            let e = ClientError::EmptyAddress;
            self.shared.report_error(&e.to_string());
            return Err(e);
        }
        if let Some(stale) = self.session.take() {
            stale.stop(self.config.shutdown_timeout).await;
        }

        self.address = Some(address.to_owned());
        self.shared.set_state(ConnectionState::Connecting);
        match self.start_session(address).await {
            Ok(session) => {
                self.session = Some(session);
                self.shared.set_state(ConnectionState::Connected);
                info!("Connected to robot at {address}");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Error);
                self.shared.report_error(&format!("Failed to connect: {e}"));
                Err(e)
            }
        }
    }

    async fn start_session(&self, address: &str) -> Result<Session, ClientError> {
        let ip = resolve(address).await?;
        let mut session = Session::new();

        let heartbeat = ReqSocket::new(SocketAddr::new(ip, self.config.hello_port));
        session.tasks.push((
            "heartbeat sender",
            tokio::spawn(heartbeat::heartbeat_loop(
                heartbeat,
                self.shared.clone(),
                self.config.heartbeat_interval,
                self.config.heartbeat_timeout,
                session.cancel.clone(),
            )),
        ));

        let sub = SubSocket::connect(SocketAddr::new(ip, self.config.telemetry_port));
        session.tasks.push((
            "telemetry subscriber",
            tokio::spawn(telemetry::telemetry_loop(
                sub,
                self.shared.clone(),
                self.config.poll_timeout,
                self.config.timeout_threshold,
                session.cancel.clone(),
            )),
        ));

        session.commands = Some(PushSocket::connect(SocketAddr::new(
            ip,
            self.config.command_port,
        )));
        Ok(session)
    }

    /// Stops every task, waiting a bounded time for each, and forgets the
    /// robot address.
    pub async fn disconnect(&mut self) {
        if self.state() == ConnectionState::Disconnected {
            warn!("Already disconnected");
            return;
        }
        info!("Disconnecting from robot...");
        if let Some(session) = self.session.take() {
            session.stop(self.config.shutdown_timeout).await;
        }
        self.address = None;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Queues a command for the robot. Dropped with a warning unless connected.
    pub fn send_command(&self, command: CommandMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            warn!("Cannot send command: not connected");
            return Err(ClientError::NotConnected);
        }
        let Some(commands) = self.session.as_ref().and_then(|s| s.commands.as_ref()) else {
            return Err(ClientError::NotConnected);
        };
        commands.send(Packet::from(command).encode()?)?;
        Ok(())
    }
}

async fn resolve(address: &str) -> Result<IpAddr, ClientError> {
    if let Ok(ip) = address.parse() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| ClientError::Resolve(address.to_owned(), e))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ClientError::NoAddress(address.to_owned()))
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn empty_address_reports_error_without_starting() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let changes = Arc::new(Mutex::new(Vec::new()));
        let callbacks = {
            let errors = errors.clone();
            let changes = changes.clone();
            Callbacks::new()
                .on_error(move |message| errors.lock().unwrap().push(message.to_owned()))
                .on_state_changed(move |old, new| changes.lock().unwrap().push((old, new)))
        };
        let mut client = Client::new(ClientConfig::default(), callbacks);
        assert!(matches!(client.connect("  ").await, Err(ClientError::EmptyAddress)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_session());
        assert!(client.address().is_none());
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(changes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commands_need_a_connection() {
        let client = Client::new(ClientConfig::default(), Callbacks::new());
        assert!(matches!(
            client.send_command(CommandMessage::go_forward(10)),
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_a_no_op() {
        let changes = Arc::new(Mutex::new(0));
        let callbacks = {
            let changes = changes.clone();
            Callbacks::new().on_state_changed(move |_, _| *changes.lock().unwrap() += 1)
        };
        let mut client = Client::new(ClientConfig::default(), callbacks);
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(*changes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unresolvable_address_ends_in_error() {
        let mut client = Client::new(ClientConfig::default(), Callbacks::new());
        assert!(client.connect("no-such-robot.invalid").await.is_err());
        assert_eq!(client.state(), ConnectionState::Error);
        assert!(!client.has_session());

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn states_display_lowercase() {
        assert_eq!(
            format!("{} -> {}", ConnectionState::Connected, ConnectionState::Error),
            "connected -> error"
        );
    }
}
