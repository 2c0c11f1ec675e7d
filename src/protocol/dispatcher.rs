//! # Packet Dispatcher
//!
//! Per-session handler table keyed by a `u16` routing key. Frames without a handler
//! fall through to the session's receive handler.

use crate::core::buffer::ByteBuffer;
use crate::core::packet::id_of;
use crate::error::{ProtocolError, Result};
use crate::transport::session::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type PacketHandler = Arc<dyn Fn(&Session, &ByteBuffer) -> Result<()> + Send + Sync + 'static>;

/// Extracts the routing key from a received frame.
pub type KeySelector = Arc<dyn Fn(&ByteBuffer) -> Option<u16> + Send + Sync + 'static>;

/// Routes received frames to handlers by key, the packet id unless a custom
/// selector is installed.
pub struct PacketDispatcher {
    handlers: RwLock<HashMap<u16, PacketHandler>>,
    selector: RwLock<KeySelector>,
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            selector: RwLock::new(Arc::new(|frame: &ByteBuffer| id_of(frame.as_slice()))),
        }
    }

    /// Replace the key selector, e.g. for frames whose id is not at offset 2.
    pub fn set_key_selector<F>(&self, selector: F)
    where
        F: Fn(&ByteBuffer) -> Option<u16> + Send + Sync + 'static,
    {
        *self.selector.write() = Arc::new(selector);
    }

    pub fn register<F>(&self, key: u16, handler: F) -> Result<()>
    where
        F: Fn(&Session, &ByteBuffer) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&key) {
            return Err(ProtocolError::AlreadyExists(format!("packet handler {key}")));
        }
        handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    pub fn unregister(&self, key: u16) -> bool {
        self.handlers.write().remove(&key).is_some()
    }

    pub fn contains(&self, key: u16) -> bool {
        self.handlers.read().contains_key(&key)
    }

    /// Run the handler registered for `frame`'s key.
    ///
    /// Returns `Ok(false)` when no handler is registered so the caller can fall back
    /// to its generic receive path.
    pub fn dispatch(&self, session: &Session, frame: &ByteBuffer) -> Result<bool> {
        let selector = self.selector.read().clone();
        let Some(key) = selector(frame) else {
            return Ok(false);
        };

        let handler = self.handlers.read().get(&key).cloned();
        match handler {
            Some(handler) => handler(session, frame).map(|()| true),
            None => Ok(false),
        }
    }
}
