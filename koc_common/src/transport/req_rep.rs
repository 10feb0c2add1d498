use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::{CancellationToken, DropGuard},
};
use tracing::{debug, info, warn};

use super::{frame_codec, BUFFER_FRAMES};
use crate::error::{Error, Result};

/// One request awaiting its reply. Dropping it without replying closes the
/// requester's connection.
#[derive(Debug)]
pub struct Request {
    pub frame: Bytes,
    pub peer: SocketAddr,
    reply: oneshot::Sender<Bytes>,
}

impl Request {
    pub fn reply(self, frame: impl Into<Bytes>) {
        if self.reply.send(frame.into()).is_err() {
            debug!("Requester {} went away before the reply", self.peer);
        }
    }
}

/// Serving end of a request/response channel.
#[derive(Debug)]
pub struct RepSocket {
    local_addr: SocketAddr,
    requests: mpsc::Receiver<Request>,
    _cancel: DropGuard,
}

impl RepSocket {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (sender, requests) = mpsc::channel(BUFFER_FRAMES);
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, sender, cancel.clone()));
        info!("Reply socket bound to {local_addr}");
        Ok(Self {
            local_addr,
            requests,
            _cancel: cancel.drop_guard(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn recv(&mut self) -> Option<Request> {
        self.requests.recv().await
    }
}

async fn accept_loop(listener: TcpListener, sender: mpsc::Sender<Request>, cancel: CancellationToken) {
    loop {
        let accepted = select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!("Requester connected from {peer}");
                tokio::spawn(serve_connection(stream, peer, sender.clone(), cancel.clone()));
            }
            Err(e) => {
                warn!("Error accepting requester: {e}");
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sender: mpsc::Sender<Request>,
    cancel: CancellationToken,
) {
    let mut framed = Framed::new(stream, frame_codec());
    loop {
        let frame = select! {
            _ = cancel.cancelled() => break,
            frame = framed.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame.freeze(),
            Some(Err(e)) => {
                warn!("Error reading request from {peer}: {e}");
                break;
            }
            None => {
                debug!("Requester {peer} disconnected");
                break;
            }
        };
        let (reply, pending) = oneshot::channel();
        if sender.send(Request { frame, peer, reply }).await.is_err() {
            break;
        }
        // An issued reply is always written, even if the socket closes meanwhile.
        let reply = select! {
            biased;
            reply = pending => reply,
            _ = cancel.cancelled() => break,
        };
        let Ok(reply) = reply else {
            debug!("Request from {peer} left unanswered, closing");
            break;
        };
        if let Err(e) = framed.send(reply).await {
            warn!("Error replying to {peer}: {e}");
            break;
        }
    }
}

/// Requesting end: one outstanding request at a time, each bounded by a timeout.
///
/// The connection is (re)established on demand; any failure drops it so the
/// next request starts fresh.
#[derive(Debug)]
pub struct ReqSocket {
    addr: SocketAddr,
    conn: Option<Framed<TcpStream, LengthDelimitedCodec>>,
}

impl ReqSocket {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, conn: None }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn request(&mut self, frame: impl Into<Bytes>, limit: Duration) -> Result<Bytes> {
        let result = match timeout(limit, self.exchange(frame.into())).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        };
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    async fn exchange(&mut self, frame: Bytes) -> Result<Bytes> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(self.addr).await?;
            self.conn = Some(Framed::new(stream, frame_codec()));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::Closed);
        };
        conn.send(frame).await?;
        match conn.next().await {
            Some(reply) => Ok(reply?.freeze()),
            None => Err(Error::Closed),
        }
    }
}
