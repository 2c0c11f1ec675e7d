//! # UDP Endpoints
//!
//! Datagram server and client on the same dispatch model as TCP sessions.
//!
//! Each received datagram is copied into its own [`ByteBuffer`] and delivered to the
//! read handler on the dispatch pool together with the sender's address. There is
//! no framing: one datagram is one buffer.
//!
//! - [`UdpServer`] survives receive errors: it reports a close event for the last
//!   peer and keeps receiving.
//! - [`UdpClient`] is connected to a single remote; a receive error closes it.

use crate::core::buffer::ByteBuffer;
use crate::error::{CloseReason, ProtocolError, Result};
use crate::transport::session::IoContext;
use parking_lot::{Mutex, RwLock};
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Largest datagram read in one call
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

pub type DatagramHandler = Arc<dyn Fn(SocketAddr, ByteBuffer) + Send + Sync>;
pub type DatagramCloseHandler = Arc<dyn Fn(SocketAddr, CloseReason) + Send + Sync>;

#[derive(Default, Clone)]
struct Handlers {
    read: Option<DatagramHandler>,
    close: Option<DatagramCloseHandler>,
}

struct Bound {
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    remote: Option<SocketAddr>,
}

struct Endpoint {
    ctx: IoContext,
    bound: Mutex<Option<Bound>>,
    handlers: RwLock<Handlers>,
}

impl Endpoint {
    fn new(ctx: IoContext) -> Self {
        Self {
            ctx,
            bound: Mutex::new(None),
            handlers: RwLock::new(Handlers::default()),
        }
    }

    fn install(&self, socket: StdUdpSocket, remote: Option<SocketAddr>) -> Result<(Arc<UdpSocket>, CancellationToken)> {
        let mut bound = self.bound.lock();
        if bound.is_some() {
            return Err(ProtocolError::ActivatedSession);
        }
        socket.set_nonblocking(true)?;
        let socket = {
            let _guard = self.ctx.handle.enter();
            Arc::new(UdpSocket::from_std(socket)?)
        };
        let cancel = CancellationToken::new();
        *bound = Some(Bound {
            socket: socket.clone(),
            cancel: cancel.clone(),
            remote,
        });
        Ok((socket, cancel))
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.bound
            .lock()
            .as_ref()
            .map(|b| b.socket.clone())
            .ok_or(ProtocolError::NotConnected)
    }

    fn deliver(&self, peer: SocketAddr, bytes: &[u8]) {
        self.ctx.metrics.datagram_received(bytes.len() as u64);
        if let Some(handler) = self.handlers.read().read.clone() {
            let datagram = ByteBuffer::from_slice(bytes);
            self.ctx.post(move || handler(peer, datagram));
        }
    }

    fn report_close(&self, peer: SocketAddr, reason: CloseReason) {
        if let Some(handler) = self.handlers.read().close.clone() {
            self.ctx.post(move || handler(peer, reason));
        }
    }

    /// Drop the socket; returns the remote (or local) address it was bound to.
    fn unbind(&self) -> Option<SocketAddr> {
        let bound = self.bound.lock().take()?;
        bound.cancel.cancel();
        bound.remote.or_else(|| bound.socket.local_addr().ok())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
            .lock()
            .as_ref()
            .and_then(|b| b.socket.local_addr().ok())
    }
}

/// Bound UDP socket receiving from any peer.
#[derive(Clone)]
pub struct UdpServer {
    endpoint: Arc<Endpoint>,
}

impl UdpServer {
    pub fn new(ctx: IoContext) -> Self {
        Self {
            endpoint: Arc::new(Endpoint::new(ctx)),
        }
    }

    pub fn on_read<F>(&self, handler: F)
    where
        F: Fn(SocketAddr, ByteBuffer) + Send + Sync + 'static,
    {
        self.endpoint.handlers.write().read = Some(Arc::new(handler));
    }

    /// Handler for receive errors and for [`UdpServer::close`].
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(SocketAddr, CloseReason) + Send + Sync + 'static,
    {
        self.endpoint.handlers.write().close = Some(Arc::new(handler));
    }

    /// Bind `addr` and start receiving. Returns the bound address.
    #[instrument(skip(self))]
    pub fn bind(&self, addr: &str) -> Result<SocketAddr> {
        let socket = StdUdpSocket::bind(addr)?;
        let local = socket.local_addr()?;
        let (socket, cancel) = self.endpoint.install(socket, None)?;
        self.endpoint
            .ctx
            .handle
            .spawn(server_loop(self.endpoint.clone(), socket, cancel, local));
        info!(address = %local, "UDP server bound");
        Ok(local)
    }

    /// Send one datagram without blocking.
    pub fn send_to(&self, peer: SocketAddr, bytes: &[u8]) -> Result<usize> {
        let sent = self.endpoint.socket()?.try_send_to(bytes, peer)?;
        self.endpoint.ctx.metrics.datagram_sent(sent as u64);
        Ok(sent)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr()
    }

    pub fn close(&self) -> bool {
        match self.endpoint.unbind() {
            Some(local) => {
                self.endpoint.report_close(local, CloseReason::ClosedByUser);
                info!(address = %local, "UDP server closed");
                true
            }
            None => false,
        }
    }
}

async fn server_loop(
    endpoint: Arc<Endpoint>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    local: SocketAddr,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut last_peer = local;
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        match received {
            Ok((n, peer)) => {
                last_peer = peer;
                endpoint.deliver(peer, &buf[..n]);
            }
            Err(e) => {
                debug!(error = %e, peer = %last_peer, "UDP receive failed");
                endpoint.report_close(last_peer, CloseReason::ClosedByRemote);
                tokio::task::yield_now().await;
            }
        }
    }
}

/// UDP socket connected to a single remote.
#[derive(Clone)]
pub struct UdpClient {
    endpoint: Arc<Endpoint>,
}

impl UdpClient {
    pub fn new(ctx: IoContext) -> Self {
        Self {
            endpoint: Arc::new(Endpoint::new(ctx)),
        }
    }

    pub fn on_read<F>(&self, handler: F)
    where
        F: Fn(SocketAddr, ByteBuffer) + Send + Sync + 'static,
    {
        self.endpoint.handlers.write().read = Some(Arc::new(handler));
    }

    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(SocketAddr, CloseReason) + Send + Sync + 'static,
    {
        self.endpoint.handlers.write().close = Some(Arc::new(handler));
    }

    /// Bind an ephemeral local port, connect to `remote` and start receiving.
    #[instrument(skip(self))]
    pub fn connect(&self, remote: SocketAddr) -> Result<SocketAddr> {
        let any: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = StdUdpSocket::bind(any)?;
        socket
            .connect(remote)
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{remote}: {e}")))?;
        let local = socket.local_addr()?;
        let (socket, cancel) = self.endpoint.install(socket, Some(remote))?;
        self.endpoint
            .ctx
            .handle
            .spawn(client_loop(self.clone(), socket, cancel, remote));
        debug!(local = %local, remote = %remote, "UDP client connected");
        Ok(local)
    }

    /// Send one datagram to the connected remote without blocking.
    pub fn send(&self, bytes: &[u8]) -> Result<usize> {
        let sent = self.endpoint.socket()?.try_send(bytes)?;
        self.endpoint.ctx.metrics.datagram_sent(sent as u64);
        Ok(sent)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.bound.lock().is_some()
    }

    pub fn close(&self) -> bool {
        self.close_with(CloseReason::ClosedByUser)
    }

    fn close_with(&self, reason: CloseReason) -> bool {
        match self.endpoint.unbind() {
            Some(remote) => {
                self.endpoint.report_close(remote, reason);
                true
            }
            None => false,
        }
    }
}

async fn client_loop(
    client: UdpClient,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    remote: SocketAddr,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => received,
        };
        match received {
            Ok(n) => client.endpoint.deliver(remote, &buf[..n]),
            Err(e) => {
                warn!(error = %e, remote = %remote, "UDP client receive failed");
                // only close the socket this loop was started for
                let current = client.endpoint.socket().ok();
                if current.is_some_and(|s| Arc::ptr_eq(&s, &socket)) {
                    client.close_with(CloseReason::ClosedByRemote);
                }
                break;
            }
        }
    }
}
