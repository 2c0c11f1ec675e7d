//! # Awaitable Requests
//!
//! Send a packet and await the matching response as a future.
//!
//! The wait is registered with the session's [`ResponseCorrelator`] before the
//! request is queued, so a response cannot slip past it. Each wait resolves exactly
//! once:
//!
//! - **match**: the response packet
//! - **timeout**: [`ProtocolError::WaitTimeout`], the wait is removed
//! - **session close**: [`ProtocolError::Canceled`]
//!
//! [`ResponseCorrelator`]: crate::protocol::correlator::ResponseCorrelator

use crate::core::buffer::{ByteBuffer, WireBuffer};
use crate::core::packet::{id_of, Packet};
use crate::error::{ProtocolError, Result};
use crate::protocol::correlator::ResponsePredicate;
use crate::transport::session::Session;
use futures::channel::oneshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Request/response helper bound to one session.
#[derive(Clone)]
pub struct AwaitableRequest {
    session: Session,
    timeout: Duration,
}

impl AwaitableRequest {
    pub(crate) fn new(session: Session, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// Override the response timeout for requests made through this value.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` and wait for the next packet with id `response_id`.
    pub async fn send_and_wait<B>(&self, request: &B, response_id: u16) -> Result<Packet>
    where
        B: WireBuffer + ?Sized,
    {
        let predicate: ResponsePredicate =
            Arc::new(move |frame: &ByteBuffer| id_of(frame.as_slice()) == Some(response_id));
        self.wait(request.as_bytes(), response_id, predicate).await
    }

    /// Send `request` and wait for a packet with id `response_id` that also satisfies
    /// `predicate`.
    pub async fn send_and_wait_with<B, P>(
        &self,
        request: &B,
        response_id: u16,
        predicate: P,
    ) -> Result<Packet>
    where
        B: WireBuffer + ?Sized,
        P: Fn(&ByteBuffer) -> bool + Send + Sync + 'static,
    {
        let predicate: ResponsePredicate = Arc::new(move |frame: &ByteBuffer| {
            id_of(frame.as_slice()) == Some(response_id) && predicate(frame)
        });
        self.wait(request.as_bytes(), response_id, predicate).await
    }

    async fn wait(
        &self,
        request: &[u8],
        response_id: u16,
        predicate: ResponsePredicate,
    ) -> Result<Packet> {
        let correlator = self.session.correlator();
        let (wait_id, mut rx) = correlator.register_future(predicate);

        if let Err(e) = self.session.send(request) {
            correlator.remove(wait_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(outcome) => settle(outcome),
            Err(_) => {
                if correlator.remove(wait_id) {
                    self.session.context().metrics.wait_timeout();
                    debug!(
                        session_id = self.session.id(),
                        packet_id = response_id,
                        "Response wait timed out"
                    );
                    Err(ProtocolError::WaitTimeout {
                        packet_id: response_id,
                    })
                } else {
                    // matched or canceled concurrently with the deadline
                    settle(rx.await)
                }
            }
        }
    }
}

fn settle(outcome: std::result::Result<Result<ByteBuffer>, oneshot::Canceled>) -> Result<Packet> {
    let frame = outcome.map_err(|_| ProtocolError::Canceled)??;
    Packet::from_bytes(frame.as_slice())
}
