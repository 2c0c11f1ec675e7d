//! # Response Correlator
//!
//! Matches inbound frames against pending predicate waits.
//!
//! Waits are kept in registration order. [`ResponseCorrelator::dispatch`] evaluates
//! the predicates of a snapshot outside the lock, so predicates and completions may
//! freely call back into the correlator. A wait is completed at most once: whichever
//! of match, [`ResponseCorrelator::remove`] or [`ResponseCorrelator::cancel_all`]
//! takes it out of the list first owns it.

use crate::core::buffer::ByteBuffer;
use crate::error::{ProtocolError, Result};
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub type ResponsePredicate = Arc<dyn Fn(&ByteBuffer) -> bool + Send + Sync>;

pub type ResponseHandler = Box<dyn FnOnce(ByteBuffer) + Send>;

pub(crate) type ResponseReceiver = oneshot::Receiver<Result<ByteBuffer>>;

enum Completion {
    Handler(ResponseHandler),
    Future(oneshot::Sender<Result<ByteBuffer>>),
}

struct PendingWait {
    id: u64,
    predicate: ResponsePredicate,
    completion: Completion,
}

#[derive(Default)]
pub struct ResponseCorrelator {
    next_id: AtomicU64,
    pending: Mutex<Vec<PendingWait>>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, predicate: ResponsePredicate, completion: Completion) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push(PendingWait {
            id,
            predicate,
            completion,
        });
        id
    }

    /// Register a one-shot callback, invoked with the first frame accepted by `predicate`.
    pub fn register_handler<P, H>(&self, predicate: P, handler: H) -> u64
    where
        P: Fn(&ByteBuffer) -> bool + Send + Sync + 'static,
        H: FnOnce(ByteBuffer) + Send + 'static,
    {
        self.push(Arc::new(predicate), Completion::Handler(Box::new(handler)))
    }

    pub(crate) fn register_future(&self, predicate: ResponsePredicate) -> (u64, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        (self.push(predicate, Completion::Future(tx)), rx)
    }

    /// Drop a pending wait without completing it. Returns `false` if it is already gone.
    pub fn remove(&self, id: u64) -> bool {
        self.take(id).is_some()
    }

    fn take(&self, id: u64) -> Option<PendingWait> {
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|w| w.id == id)?;
        Some(pending.remove(index))
    }

    /// Complete the first pending wait whose predicate accepts `frame`.
    pub fn dispatch(&self, frame: &ByteBuffer) -> bool {
        let snapshot: Vec<(u64, ResponsePredicate)> = self
            .pending
            .lock()
            .iter()
            .map(|w| (w.id, w.predicate.clone()))
            .collect();

        for (id, predicate) in snapshot {
            if !predicate(frame) {
                continue;
            }
            // lost a race with remove/cancel, try the next candidate
            let Some(wait) = self.take(id) else {
                continue;
            };
            match wait.completion {
                Completion::Handler(handler) => handler(frame.clone()),
                Completion::Future(tx) => {
                    let _ = tx.send(Ok(frame.clone()));
                }
            }
            return true;
        }
        false
    }

    /// Fail every pending future with `Canceled` and drop every pending handler.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingWait> = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for wait in drained {
            if let Completion::Future(tx) = wait.completion {
                let _ = tx.send(Err(ProtocolError::Canceled));
            }
        }
        if count > 0 {
            debug!(count, "Canceled pending response waits");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
