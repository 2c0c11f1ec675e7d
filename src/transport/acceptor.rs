//! # Acceptor
//!
//! Listening socket with a cancellable accept loop.
//!
//! [`Acceptor::listen`] binds synchronously so bind errors reach the caller. The loop
//! hands each socket to its callback and re-arms at once; accept errors are logged
//! and retried after a short backoff.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout::ACCEPT_BACKOFF;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Called for every accepted socket, on the runtime.
pub type AcceptCallback = Arc<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

struct Running {
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

/// TCP listener with a self re-arming accept loop.
pub struct Acceptor {
    handle: Handle,
    running: Mutex<Option<Running>>,
}

impl Acceptor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            running: Mutex::new(None),
        }
    }

    /// Bind `addr` and start accepting. Bind failures are returned immediately.
    ///
    /// Returns the bound address, useful with port 0.
    #[instrument(skip(self, on_accepted))]
    pub fn listen(&self, addr: &str, on_accepted: AcceptCallback) -> Result<SocketAddr> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ProtocolError::AcceptorRunning);
        }

        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;
        let listener = {
            let _guard = self.handle.enter();
            TcpListener::from_std(std_listener)?
        };

        let cancel = CancellationToken::new();
        self.handle
            .spawn(accept_loop(listener, cancel.clone(), on_accepted));
        *running = Some(Running { cancel, local_addr });

        info!(address = %local_addr, "Listening");
        Ok(local_addr)
    }

    /// Stop accepting. Returns `false` if the acceptor was not running.
    pub fn close(&self) -> bool {
        match self.running.lock().take() {
            Some(running) => {
                running.cancel.cancel();
                info!(address = %running.local_addr, "Acceptor closed");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, cancel: CancellationToken, on_accepted: AcceptCallback) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    on_accepted(stream, peer);
                }
                Err(e) => {
                    warn!(error = %e, "Error accepting connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}
