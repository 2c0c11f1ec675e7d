//! # Channel
//!
//! A named session pool with an optional listening acceptor.
//!
//! Every session created by the channel belongs to exactly one of three sets: active
//! (owning a socket), closing (socket gone, close still being reported) or inactive
//! (pooled for reuse). A closing session is not reusable until its pending requests
//! are canceled and its close event is queued. With a non-zero `max_session_count`
//! the three sets together never exceed the ceiling; an inbound connection that finds
//! no reusable session and no room for a new one is closed immediately.

use crate::config::ChannelConfig;
use crate::error::{constants, CloseReason, Result};
use crate::transport::acceptor::{AcceptCallback, Acceptor};
use crate::transport::session::{IoContext, Session};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Builds a new pooled session. Invoked once per session, never for reuse.
pub type SessionFactory = Arc<dyn Fn(&IoContext) -> Session + Send + Sync>;

#[derive(Default)]
struct Pool {
    active: HashMap<u64, Session>,
    closing: HashMap<u64, Session>,
    inactive: VecDeque<Session>,
}

impl Pool {
    fn total(&self) -> usize {
        self.active.len() + self.closing.len() + self.inactive.len()
    }
}

pub(crate) struct ChannelInner {
    name: String,
    max_session_count: usize,
    factory: SessionFactory,
    ctx: IoContext,
    pool: Mutex<Pool>,
    acceptor: Acceptor,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("max_session_count", &self.inner.max_session_count)
            .field("active", &self.active_count())
            .field("inactive", &self.inactive_count())
            .finish()
    }
}

impl Channel {
    pub fn new(config: &ChannelConfig, factory: SessionFactory, ctx: IoContext) -> Self {
        let acceptor = Acceptor::new(ctx.handle.clone());
        Self {
            inner: Arc::new(ChannelInner {
                name: config.name.clone(),
                max_session_count: config.max_session_count,
                factory,
                ctx,
                pool: Mutex::new(Pool::default()),
                acceptor,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_session_count(&self) -> usize {
        self.inner.max_session_count
    }

    /// Reserve a session: a pooled one if available, otherwise a new one unless the
    /// ceiling is reached. The returned session is already counted as active.
    pub fn pop_inactive_session(&self) -> Option<Session> {
        let mut pool = self.inner.pool.lock();
        let session = match pool.inactive.pop_front() {
            Some(session) => session,
            None => {
                let max = self.inner.max_session_count;
                if max > 0 && pool.total() >= max {
                    return None;
                }
                let session = (self.inner.factory)(&self.inner.ctx);
                session.bind_channel(Arc::downgrade(&self.inner));
                session
            }
        };
        pool.active.insert(session.id(), session.clone());
        Some(session)
    }

    /// First half of a close: the session leaves the active set but cannot be
    /// reused yet.
    pub(crate) fn begin_release(&self, session: &Session) {
        let mut pool = self.inner.pool.lock();
        if let Some(session) = pool.active.remove(&session.id()) {
            pool.closing.insert(session.id(), session);
        }
    }

    /// Second half of a close: the session becomes available for reuse.
    pub(crate) fn finish_release(&self, session: &Session) {
        let mut pool = self.inner.pool.lock();
        if let Some(session) = pool.closing.remove(&session.id()) {
            pool.inactive.push_back(session);
        }
    }

    /// Move a session that never got a socket from the active set back to the
    /// inactive pool.
    pub(crate) fn deactivate(&self, session: &Session) {
        let mut pool = self.inner.pool.lock();
        if let Some(session) = pool.active.remove(&session.id()) {
            pool.inactive.push_back(session);
        }
    }

    /// Return a reserved but unused session to the pool. Active sessions are left
    /// alone; closing them releases them.
    pub fn release(&self, session: &Session) -> bool {
        if session.is_active() {
            return false;
        }
        let mut pool = self.inner.pool.lock();
        match pool.active.remove(&session.id()) {
            Some(session) => {
                pool.inactive.push_back(session);
                true
            }
            None => false,
        }
    }

    /// Hand an accepted socket to a pooled session, refusing it when the pool is full.
    pub fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(session) = self.pop_inactive_session() else {
            self.inner.ctx.metrics.session_refused();
            warn!(
                channel = %self.inner.name,
                peer = %peer,
                "{}",
                constants::ERR_NO_SESSION_AVAILABLE
            );
            return;
        };
        if let Err(e) = session.attach(stream) {
            warn!(channel = %self.inner.name, peer = %peer, error = %e, "Failed to attach session");
            self.deactivate(&session);
        }
    }

    /// Start accepting on `addr`, returning the bound address.
    pub fn listen(&self, addr: &str) -> Result<SocketAddr> {
        let channel: Weak<ChannelInner> = Arc::downgrade(&self.inner);
        let on_accepted: AcceptCallback = Arc::new(move |stream, peer| {
            match channel.upgrade() {
                Some(inner) => Channel::from_inner(inner).accept(stream, peer),
                None => drop(stream),
            }
        });
        let local = self.inner.acceptor.listen(addr, on_accepted)?;
        info!(channel = %self.inner.name, address = %local, "Channel listening");
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.acceptor.local_addr()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.acceptor.is_running()
    }

    /// Stop the acceptor and close every active session.
    pub fn close(&self) {
        self.inner.acceptor.close();
        let active: Vec<Session> = self.inner.pool.lock().active.values().cloned().collect();
        for session in &active {
            session.close_with(CloseReason::Normal);
        }
        info!(channel = %self.inner.name, closed = active.len(), "Channel closed");
    }

    pub fn active_count(&self) -> usize {
        self.inner.pool.lock().active.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.inner.pool.lock().inactive.len()
    }

    /// Every session the channel owns, closing ones included.
    pub fn session_count(&self) -> usize {
        self.inner.pool.lock().total()
    }

    /// Snapshot of the active sessions.
    pub fn active_sessions(&self) -> Vec<Session> {
        self.inner.pool.lock().active.values().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, WorkerConfig};
    use crate::core::packet::packet_validator;
    use crate::utils::metrics::Metrics;
    use crate::utils::worker::Workers;
    use tokio::runtime::Runtime;

    fn pool_channel(runtime: &Runtime, max_session_count: usize) -> Channel {
        let metrics = Arc::new(Metrics::new());
        let workers = Workers::new(&WorkerConfig::default(), metrics.clone()).unwrap();
        let ctx = IoContext::new(
            runtime.handle().clone(),
            workers,
            metrics,
            SessionConfig::default(),
        );
        let factory: SessionFactory =
            Arc::new(|ctx: &IoContext| Session::with_validator(ctx.clone(), packet_validator()));
        let config = ChannelConfig {
            name: "pool".to_string(),
            max_session_count,
            ..ChannelConfig::default()
        };
        Channel::new(&config, factory, ctx)
    }

    #[test]
    fn closing_session_counts_toward_ceiling() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let channel = pool_channel(&runtime, 1);
        let session = channel.pop_inactive_session().unwrap();
        assert!(channel.pop_inactive_session().is_none());

        channel.begin_release(&session);
        assert_eq!(channel.active_count(), 0);
        assert_eq!(channel.session_count(), 1);
        assert!(channel.pop_inactive_session().is_none());

        channel.finish_release(&session);
        assert_eq!(channel.inactive_count(), 1);
        assert_eq!(channel.pop_inactive_session().unwrap().id(), session.id());
    }

    #[test]
    fn unbounded_channel_creates_on_demand() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let channel = pool_channel(&runtime, 0);
        let first = channel.pop_inactive_session().unwrap();
        let second = channel.pop_inactive_session().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(channel.active_count(), 2);
        assert!(channel.release(&first));
        assert_eq!(channel.pop_inactive_session().unwrap().id(), first.id());
    }
}
