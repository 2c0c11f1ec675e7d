//! # Blocking Queue
//!
//! Thread-safe FIFO with a blocking pop and cooperative cancellation.
//!
//! Cancellation takes priority over queued items: once [`BlockingQueue::cancel`] has
//! been called every `dequeue` fails with [`ProtocolError::JobCanceled`] until
//! [`BlockingQueue::clear`] resets the queue.

use crate::error::{ProtocolError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct State<T> {
    items: VecDeque<T>,
    canceled: bool,
}

pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                canceled: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Push an item and wake one waiting consumer.
    pub fn enqueue(&self, item: T) {
        self.state.lock().items.push_back(item);
        self.available.notify_one();
    }

    /// Block until an item is available or the queue is canceled.
    pub fn dequeue(&self) -> Result<T> {
        let mut state = self.state.lock();
        loop {
            if state.canceled {
                return Err(ProtocolError::JobCanceled);
            }
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            self.available.wait(&mut state);
        }
    }

    /// Pop without blocking. Returns `None` when empty or canceled.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.canceled {
            return None;
        }
        state.items.pop_front()
    }

    /// Wake every waiter; they fail with `JobCanceled`.
    pub fn cancel(&self) {
        self.state.lock().canceled = true;
        self.available.notify_all();
    }

    /// Drop queued items and reset cancellation.
    pub fn clear(&self) {
        let drained: Vec<T> = {
            let mut state = self.state.lock();
            state.canceled = false;
            state.items.drain(..).collect()
        };
        self.available.notify_all();
        drop(drained);
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }
        let out: Vec<i32> = (0..5).map(|_| queue.dequeue().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn dequeue_blocks_until_enqueue() {
        let queue = Arc::new(BlockingQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        queue.enqueue("job");
        assert_eq!(consumer.join().unwrap().unwrap(), "job");
    }

    #[test]
    fn cancel_wins_over_items() {
        let queue = BlockingQueue::new();
        queue.enqueue(1);
        queue.cancel();
        assert!(matches!(queue.dequeue(), Err(ProtocolError::JobCanceled)));
        assert!(queue.try_dequeue().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_resets_cancellation() {
        let queue = BlockingQueue::new();
        queue.enqueue(1);
        queue.cancel();
        queue.clear();
        assert!(!queue.is_canceled());
        assert!(queue.is_empty());
        queue.enqueue(2);
        assert_eq!(queue.dequeue().unwrap(), 2);
    }
}
