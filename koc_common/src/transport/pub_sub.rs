use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::{broadcast, mpsc},
    time::{sleep, timeout},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::{CancellationToken, DropGuard},
};
use tracing::{debug, info, warn};

use super::{frame_codec, BUFFER_FRAMES, RECONNECT_INTERVAL};
use crate::error::{Error, Result};

/// Broadcasting end: every published frame goes to every connected subscriber.
///
/// A subscriber that falls behind skips the frames it missed rather than
/// stalling the publisher.
#[derive(Debug)]
pub struct PubSocket {
    local_addr: SocketAddr,
    frames: broadcast::Sender<Bytes>,
    _cancel: DropGuard,
}

impl PubSocket {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (frames, _) = broadcast::channel(BUFFER_FRAMES);
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, frames.clone(), cancel.clone()));
        info!("Publisher bound to {local_addr}");
        Ok(Self {
            local_addr,
            frames,
            _cancel: cancel.drop_guard(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns how many subscribers the frame was queued for.
    pub fn publish(&self, frame: impl Into<Bytes>) -> usize {
        self.frames.send(frame.into()).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames.receiver_count()
    }
}

async fn accept_loop(
    listener: TcpListener,
    frames: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!("Subscriber connected from {peer}");
                tokio::spawn(write_frames(stream, peer, frames.subscribe(), cancel.clone()));
            }
            Err(e) => {
                warn!("Error accepting subscriber: {e}");
            }
        }
    }
}

async fn write_frames(
    stream: TcpStream,
    peer: SocketAddr,
    mut frames: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {e}");
    }
    let mut writer = FramedWrite::new(stream, frame_codec());
    loop {
        let frame = select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Subscriber {peer} lagged, skipped {skipped} frames");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let sent = select! {
            _ = cancel.cancelled() => break,
            sent = writer.send(frame) => sent,
        };
        if let Err(e) = sent {
            info!("Subscriber {peer} disconnected: {e}");
            break;
        }
    }
}

/// Receiving end of a broadcast channel. Subscribes to everything.
#[derive(Debug)]
pub struct SubSocket {
    frames: mpsc::Receiver<Bytes>,
    _cancel: DropGuard,
}

impl SubSocket {
    /// Must be called from within a tokio runtime.
    pub fn connect(addr: SocketAddr) -> Self {
        let (sender, frames) = mpsc::channel(BUFFER_FRAMES);
        let cancel = CancellationToken::new();
        tokio::spawn(subscribe_loop(addr, sender, cancel.clone()));
        Self {
            frames,
            _cancel: cancel.drop_guard(),
        }
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Waits at most `slice` for a frame. `Ok(None)` means nothing arrived.
    pub async fn poll(&mut self, slice: Duration) -> Result<Option<Bytes>> {
        match timeout(slice, self.frames.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(Error::Closed),
            Err(_) => Ok(None),
        }
    }
}

async fn subscribe_loop(addr: SocketAddr, sender: mpsc::Sender<Bytes>, cancel: CancellationToken) {
    loop {
        let connected = select! {
            _ = cancel.cancelled() => return,
            connected = TcpStream::connect(addr) => connected,
        };
        match connected {
            Ok(stream) => {
                debug!("Subscribed to {addr}");
                let mut reader = FramedRead::new(stream, frame_codec());
                loop {
                    let frame = select! {
                        _ = cancel.cancelled() => return,
                        frame = reader.next() => frame,
                    };
                    match frame {
                        Some(Ok(frame)) => {
                            if sender.send(frame.freeze()).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Error reading from publisher {addr}: {e}");
                            break;
                        }
                        None => {
                            debug!("Publisher {addr} closed the connection");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                debug!("Subscribing to {addr} failed: {e}");
            }
        }
        select! {
            _ = cancel.cancelled() => return,
            _ = sleep(RECONNECT_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn wait_for_subscribers(publisher: &PubSocket, count: usize) {
        for _ in 0..100 {
            if publisher.subscriber_count() >= count {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("subscribers did not connect");
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_frame() {
        let publisher = PubSocket::bind("127.0.0.1:0").await.unwrap();
        let mut first = SubSocket::connect(publisher.local_addr());
        let mut second = SubSocket::connect(publisher.local_addr());
        wait_for_subscribers(&publisher, 2).await;

        assert_eq!(publisher.publish(&b"one"[..]), 2);
        publisher.publish(&b"two"[..]);

        for sub in [&mut first, &mut second] {
            let one = sub.poll(Duration::from_secs(5)).await.unwrap().unwrap();
            let two = sub.poll(Duration::from_secs(5)).await.unwrap().unwrap();
            assert_eq!((&one[..], &two[..]), (&b"one"[..], &b"two"[..]));
        }
    }

    #[tokio::test]
    async fn poll_times_out_without_traffic() {
        let publisher = PubSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sub = SubSocket::connect(publisher.local_addr());
        let polled = sub.poll(Duration::from_millis(50)).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let publisher = PubSocket::bind("127.0.0.1:0").await.unwrap();
        assert_eq!(publisher.publish(&b"nobody"[..]), 0);
    }
}
