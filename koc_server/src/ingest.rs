use koc_common::{transport::PullSocket, Packet};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::CommandQueue;

/// Moves commands from the command channel into the control loop's queue.
pub struct CommandIngest {
    socket: PullSocket,
    queue: CommandQueue,
}

impl CommandIngest {
    pub fn new(socket: PullSocket, queue: CommandQueue) -> Self {
        Self { socket, queue }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Accepting commands on {}", self.socket.local_addr());
        loop {
            let frame = select! {
                _ = cancel.cancelled() => break,
                frame = self.socket.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            match Packet::decode(&frame) {
                Ok(Packet::Command(command)) => {
                    if let Some(evicted) = self.queue.push(command) {
                        debug!("Command queue full, dropped {:?}({})", evicted.kind, evicted.magnitude);
                    }
                }
                Ok(other) => warn!("Ignoring {} on the command channel", other.describe()),
                Err(e) => warn!("Error decoding command: {e}"),
            }
        }
        info!("Command ingest stopped");
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use koc_common::{transport::PushSocket, CommandKind, CommandMessage, HeartbeatMessage, NetworkInfo};

    use super::*;

    #[tokio::test]
    async fn only_commands_reach_the_queue() {
        let socket = PullSocket::bind("127.0.0.1:0").await.unwrap();
        let push = PushSocket::connect(socket.local_addr());
        let queue = CommandQueue::new(8);
        let cancel = CancellationToken::new();
        tokio::spawn(CommandIngest::new(socket, queue.clone()).run(cancel.clone()));

        let heartbeat = HeartbeatMessage::request(1, NetworkInfo::default(), 1.0);
        push.send(Packet::from(heartbeat).encode().unwrap()).unwrap();
        push.send(vec![0xff, 0xff, 0xff]).unwrap();
        push.send(Packet::from(CommandMessage::turret_right(12)).encode().unwrap())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let command = queue.pop().unwrap();
        assert_eq!(command.kind, CommandKind::TurretRight);
        assert_eq!(command.magnitude, 12);
        assert!(queue.is_empty());
        cancel.cancel();
    }
}
