use koc_common::transport::{PubSocket, PullSocket};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Republishes every frame from the internal telemetry and sensor channels to
/// the external telemetry broadcast, byte for byte.
pub struct Aggregator {
    telemetry: PullSocket,
    sensor: PullSocket,
    publisher: PubSocket,
}

impl Aggregator {
    pub fn new(telemetry: PullSocket, sensor: PullSocket, publisher: PubSocket) -> Self {
        Self {
            telemetry,
            sensor,
            publisher,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Forwarding {} and {} to {}",
            self.telemetry.local_addr(),
            self.sensor.local_addr(),
            self.publisher.local_addr()
        );
        loop {
            let frame = select! {
                _ = cancel.cancelled() => break,
                frame = self.telemetry.recv() => frame,
                frame = self.sensor.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            let len = frame.len();
            let receivers = self.publisher.publish(frame);
            trace!(len, receivers, "Forwarded frame");
        }
        info!("Aggregator stopped");
    }
}
