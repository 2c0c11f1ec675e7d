//! # Receive Buffer
//!
//! Accumulates socket reads for one session and cuts them into frames with the
//! session's validator. The buffer doubles when a read finds it full.

use crate::core::buffer::{ByteBuffer, WireBuffer};
use crate::core::packet::FrameValidator;
use crate::error::{constants, ProtocolError, Result};

/// Per-session receive buffer.
///
/// Socket reads land in [`ReceiveBuffer::spare_mut`]; [`ReceiveBuffer::drain_frames`]
/// then cuts every complete frame out of the accumulated bytes and compacts the
/// remainder to the front.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: ByteBuffer,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: ByteBuffer::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.readable_len()
    }

    /// Free space for the next read. Doubles the capacity when the buffer is full.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.buf.writable_len() == 0 {
            let doubled = self.buf.capacity() * 2;
            self.buf.resize(doubled);
        }
        self.buf.spare_mut()
    }

    pub fn commit(&mut self, n: usize) {
        self.buf.commit(n);
    }

    /// Copy out every complete frame, in arrival order.
    ///
    /// A validator answer of zero bytes, or of more bytes than are buffered, is a
    /// protocol error.
    pub fn drain_frames(&mut self, validator: &FrameValidator) -> Result<Vec<ByteBuffer>> {
        let mut frames = Vec::new();
        loop {
            let pending = self.buf.remaining();
            if pending.is_empty() {
                break;
            }
            let len = match validator(pending) {
                None => break,
                Some(0) => {
                    return Err(ProtocolError::DeserializeError(
                        constants::ERR_EMPTY_FRAME.to_string(),
                    ))
                }
                Some(len) if len > pending.len() => {
                    return Err(ProtocolError::DeserializeError(
                        constants::ERR_OVERSIZED_FRAME.to_string(),
                    ))
                }
                Some(len) => len,
            };
            frames.push(ByteBuffer::from_slice(&pending[..len]));
            self.buf.skip(len)?;
        }
        self.buf.compact();
        Ok(frames)
    }

    pub fn clear(&mut self) {
        self.buf.truncate(0);
    }
}
