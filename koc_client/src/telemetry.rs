use std::{sync::Arc, time::Duration};

use koc_common::{transport::SubSocket, Packet};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Shared;

/// Counts consecutive empty polls of the telemetry stream.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutDetector {
    empty_polls: u32,
    threshold: u32,
}

impl TimeoutDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            empty_polls: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn on_receive(&mut self) {
        self.empty_polls = 0;
    }

    /// True on the poll that reaches the threshold. The count then starts
    /// over, so continued silence fires again only after another full run.
    pub fn on_empty_poll(&mut self) -> bool {
        self.empty_polls += 1;
        if self.empty_polls >= self.threshold {
            self.empty_polls = 0;
            true
        } else {
            false
        }
    }
}

pub(crate) async fn telemetry_loop(
    mut sub: SubSocket,
    shared: Arc<Shared>,
    poll_timeout: Duration,
    threshold: u32,
    cancel: CancellationToken,
) {
    let mut detector = TimeoutDetector::new(threshold);
    info!("Telemetry subscriber started");
    loop {
        let polled = select! {
            _ = cancel.cancelled() => break,
            polled = sub.poll(poll_timeout) => polled,
        };
        match polled {
            Ok(Some(frame)) => {
                detector.on_receive();
                match Packet::decode(&frame) {
                    Ok(Packet::Telemetry(snapshot)) => (shared.callbacks.on_telemetry)(&snapshot),
                    Ok(Packet::SensorFrame(frame)) => (shared.callbacks.on_sensor_frame)(&frame),
                    Ok(other) => debug!("Ignoring {} on the telemetry channel", other.describe()),
                    Err(e) => warn!("Error decoding telemetry: {e}"),
                }
            }
            Ok(None) => {
                if detector.on_empty_poll() {
                    warn!(
                        "Connection timeout - no data for {:?}",
                        poll_timeout * detector.threshold
                    );
                    shared.on_timeout();
                }
            }
            Err(e) => {
                warn!("Telemetry subscriber closed: {e}");
                break;
            }
        }
    }
    info!("Telemetry subscriber stopped");
}
