use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::mpsc,
    time::sleep,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::{CancellationToken, DropGuard},
};
use tracing::{debug, info, warn};

use super::{frame_codec, BUFFER_FRAMES, RECONNECT_INTERVAL};
use crate::error::{Error, Result};

/// Receiving end of a fan-in channel. Any number of [`PushSocket`]s may connect.
#[derive(Debug)]
pub struct PullSocket {
    local_addr: SocketAddr,
    frames: mpsc::Receiver<Bytes>,
    _cancel: DropGuard,
}

impl PullSocket {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (sender, frames) = mpsc::channel(BUFFER_FRAMES);
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, sender, cancel.clone()));
        info!("Pull socket bound to {local_addr}");
        Ok(Self {
            local_addr,
            frames,
            _cancel: cancel.drop_guard(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next frame from any connected pusher, in arrival order.
    /// Waits indefinitely; returns `None` once the socket is shut down.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

async fn accept_loop(listener: TcpListener, sender: mpsc::Sender<Bytes>, cancel: CancellationToken) {
    loop {
        let accepted = select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!("Pusher connected from {peer}");
                tokio::spawn(read_frames(stream, peer, sender.clone(), cancel.clone()));
            }
            Err(e) => {
                warn!("Error accepting pusher: {e}");
            }
        }
    }
}

async fn read_frames(
    stream: TcpStream,
    peer: SocketAddr,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) {
    let mut reader = FramedRead::new(stream, frame_codec());
    loop {
        let frame = select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => frame,
        };
        match frame {
            Some(Ok(frame)) => {
                if sender.send(frame.freeze()).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Error reading from pusher {peer}: {e}");
                break;
            }
            None => {
                debug!("Pusher {peer} disconnected");
                break;
            }
        }
    }
}

/// Sending end of a fan-in channel.
///
/// Connects lazily and reconnects whenever the link drops. [`PushSocket::send`]
/// never waits: frames are buffered up to a fixed depth and rejected beyond it.
#[derive(Debug)]
pub struct PushSocket {
    frames: mpsc::Sender<Bytes>,
    _cancel: DropGuard,
}

impl PushSocket {
    /// Must be called from within a tokio runtime.
    pub fn connect(addr: SocketAddr) -> Self {
        let (frames, receiver) = mpsc::channel(BUFFER_FRAMES);
        let cancel = CancellationToken::new();
        tokio::spawn(push_loop(addr, receiver, cancel.clone()));
        Self {
            frames,
            _cancel: cancel.drop_guard(),
        }
    }

    pub fn send(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.frames.try_send(frame.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Full,
            mpsc::error::TrySendError::Closed(_) => Error::Closed,
        })
    }
}

async fn push_loop(addr: SocketAddr, mut frames: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
    loop {
        let connected = select! {
            _ = cancel.cancelled() => return,
            connected = TcpStream::connect(addr) => connected,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Connecting to {addr} failed: {e}");
                select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(RECONNECT_INTERVAL) => continue,
                }
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {e}");
        }
        debug!("Pusher connected to {addr}");
        let mut writer = FramedWrite::new(stream, frame_codec());
        loop {
            let frame = select! {
                _ = cancel.cancelled() => return,
                frame = frames.recv() => frame,
            };
            let Some(frame) = frame else {
                return;
            };
            let sent = select! {
                _ = cancel.cancelled() => return,
                sent = writer.send(frame) => sent,
            };
            if let Err(e) = sent {
                warn!("Error sending to {addr}: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn fan_in_from_two_pushers() {
        let mut pull = PullSocket::bind("127.0.0.1:0").await.unwrap();
        let first = PushSocket::connect(pull.local_addr());
        let second = PushSocket::connect(pull.local_addr());
        first.send(&b"a1"[..]).unwrap();
        second.send(&b"b1"[..]).unwrap();
        first.send(&b"a2"[..]).unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            let frame = timeout(Duration::from_secs(5), pull.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(frame);
        }
        let from_first: Vec<_> = received.iter().filter(|f| f[0] == b'a').collect();
        assert_eq!(from_first, [&Bytes::from_static(b"a1"), &Bytes::from_static(b"a2")]);
        assert!(received.contains(&Bytes::from_static(b"b1")));
    }

    #[tokio::test]
    async fn pusher_waits_for_late_binder() {
        let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = vacant.local_addr().unwrap();
        drop(vacant);

        let push = PushSocket::connect(addr);
        push.send(&b"early"[..]).unwrap();
        sleep(RECONNECT_INTERVAL * 2).await;

        let mut pull = PullSocket::bind(addr).await.unwrap();
        let frame = timeout(Duration::from_secs(5), pull.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"early");
    }

    #[tokio::test]
    async fn send_rejects_when_buffer_is_full() {
        let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = vacant.local_addr().unwrap();
        drop(vacant);

        let push = PushSocket::connect(addr);
        let results: Vec<_> = (0..BUFFER_FRAMES + 10)
            .map(|i| push.send(vec![i as u8]))
            .collect();
        assert!(results.iter().any(|r| matches!(r, Err(Error::Full))));
    }
}
