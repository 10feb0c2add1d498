use std::{sync::Arc, time::Duration};

use koc_common::{transport::ReqSocket, HeartbeatMessage, NetworkInfo, Packet, Role};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Shared;

/// Keeps the handshake going: one request per interval, each carrying the
/// sequence the server last answered with.
pub(crate) async fn heartbeat_loop(
    mut req: ReqSocket,
    shared: Arc<Shared>,
    interval: Duration,
    limit: Duration,
    cancel: CancellationToken,
) {
    info!("Heartbeat sender started for {}", req.addr());
    let network = NetworkInfo::collect();
    let mut sequence = 0;
    loop {
        let request = HeartbeatMessage::request(sequence, network.clone(), interval.as_secs_f64());
        let reply = match Packet::from(request).encode() {
            Ok(frame) => {
                select! {
                    _ = cancel.cancelled() => break,
                    reply = req.request(frame, limit) => reply,
                }
            }
            Err(e) => {
                warn!("{e}");
                break;
            }
        };
        match reply.and_then(|reply| Ok(Packet::decode(&reply)?)) {
            Ok(Packet::Heartbeat(response)) if response.role == Role::Server => {
                debug!("Heartbeat {} answered", response.header.sequence);
                sequence = response.header.sequence;
                shared.last_heartbeat.send_replace(Some(response));
            }
            Ok(other) => warn!("Unexpected handshake reply: {}", other.describe()),
            Err(e) => warn!("Heartbeat failed: {e}"),
        }
        select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    info!("Heartbeat sender stopped");
}
