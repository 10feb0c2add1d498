use std::time::Duration;

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use koc_common::{transport::RepSocket, HeartbeatMessage, NetworkInfo, Packet, Role};
use tokio::{select, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A long-running part of the server that stays idle until the first client
/// checks in.
pub trait Component: Send {
    fn name(&self) -> &str;
    fn is_running(&self) -> bool;
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> BoxFuture<'_, ()>;
}

type Launch = Box<dyn FnOnce(CancellationToken) -> JoinHandle<()> + Send>;

/// [`Component`] backed by a task that is launched at most once.
pub struct Task {
    name: &'static str,
    launch: Option<Launch>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Task {
    pub fn new(
        name: &'static str,
        shutdown_timeout: Duration,
        launch: impl FnOnce(CancellationToken) -> JoinHandle<()> + Send + 'static,
    ) -> Self {
        Self {
            name,
            launch: Some(Box::new(launch)),
            cancel: CancellationToken::new(),
            handle: None,
            shutdown_timeout,
        }
    }
}

impl Component for Task {
    fn name(&self) -> &str {
        self.name
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let Some(launch) = self.launch.take() else {
            anyhow::bail!("{} cannot be restarted", self.name);
        };
        self.handle = Some(launch(self.cancel.clone()));
        Ok(())
    }

    fn stop(&mut self) -> BoxFuture<'_, ()> {
        async move {
            self.cancel.cancel();
            let Some(handle) = self.handle.take() else {
                return;
            };
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => debug!("{} stopped", self.name),
                Ok(Err(e)) => error!("{} failed: {e}", self.name),
                Err(_) => warn!("{} did not stop within {:?}", self.name, self.shutdown_timeout),
            }
        }
        .boxed()
    }
}

/// Answers client heartbeats and starts the hardware-facing components on
/// the first one.
pub struct HandshakeGate {
    rep: RepSocket,
    components: Vec<Box<dyn Component>>,
    sleep: Duration,
}

impl HandshakeGate {
    pub fn new(rep: RepSocket, components: Vec<Box<dyn Component>>, sleep: Duration) -> Self {
        Self {
            rep,
            components,
            sleep,
        }
    }

    /// The reply to send, or `None` if the frame is not a client heartbeat.
    pub fn handle_request(&mut self, frame: &[u8]) -> Option<Bytes> {
        let request = match Packet::decode(frame) {
            Ok(Packet::Heartbeat(heartbeat)) if heartbeat.role == Role::Client => heartbeat,
            Ok(other) => {
                warn!("Ignoring {} on the handshake channel", other.describe());
                return None;
            }
            Err(e) => {
                warn!("Error decoding handshake request: {e}");
                return None;
            }
        };
        debug!("Heartbeat {} from client", request.header.sequence);
        self.start_components();

        let response = HeartbeatMessage::response_to(
            &request,
            NetworkInfo::collect(),
            self.sleep.as_secs_f64(),
        );
        match Packet::from(response).encode() {
            Ok(encoded) => Some(encoded.into()),
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    fn start_components(&mut self) {
        for component in &mut self.components {
            if component.is_running() {
                continue;
            }
            match component.start() {
                Ok(()) => info!("Started {}", component.name()),
                Err(e) => debug!("Not starting {}: {e}", component.name()),
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Handshake gate listening on {}", self.rep.local_addr());
        loop {
            let request = select! {
                _ = cancel.cancelled() => break,
                request = self.rep.recv() => request,
            };
            let Some(request) = request else {
                break;
            };
            // Dropping an unanswered request closes that requester's connection.
            if let Some(reply) = self.handle_request(&request.frame) {
                request.reply(reply);
            }
            select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.sleep) => {}
            }
        }
        for component in &mut self.components {
            component.stop().await;
        }
        info!("Handshake gate stopped");
    }
}
