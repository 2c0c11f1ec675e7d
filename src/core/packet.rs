//! # Packet
//!
//! Length-prefixed packet built on [`ByteBuffer`].
//!
//! ## Wire Format
//! ```text
//! [Size(2, LE)] [Id(2, LE)] [Body(N)]
//! ```
//!
//! `Size` covers the whole packet including the header and is rewritten after every
//! write, so it always equals the number of written bytes. Only the id is
//! user-settable.

use crate::core::buffer::{ByteBuffer, Internal, WireBuffer};
use crate::error::{ProtocolError, Result};
use std::sync::Arc;

/// Size of the `[size][id]` header
pub const HEADER_SIZE: usize = 4;

/// Largest size the 16-bit size field can describe
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Frame validator contract: given the unread bytes of a receive buffer, return the
/// length of the first complete frame, or `None` if more bytes are needed.
pub type FrameValidator = Arc<dyn Fn(&[u8]) -> Option<usize> + Send + Sync>;

/// Validator for plain [`Packet`] framing.
pub fn packet_validator() -> FrameValidator {
    Arc::new(is_valid_packet)
}

/// Length of the first complete packet in `bytes`, if there is one.
///
/// The declared size is read from the first two bytes. A declared size of zero is
/// never complete.
pub fn is_valid_packet(bytes: &[u8]) -> Option<usize> {
    declared_size(bytes, HEADER_SIZE)
}

pub(crate) fn declared_size(bytes: &[u8], header_size: usize) -> Option<usize> {
    if bytes.len() < header_size {
        return None;
    }
    let size = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if size > 0 && bytes.len() >= size {
        Some(size)
    } else {
        None
    }
}

/// Packet id of a raw frame without copying it.
pub fn id_of(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    Some(u16::from_le_bytes([bytes[2], bytes[3]]))
}

/// A [`ByteBuffer`] carrying the `[size][id]` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    buf: ByteBuffer,
}

impl Packet {
    pub fn new(id: u16) -> Self {
        Self::with_capacity(id, 0)
    }

    /// New packet whose storage fits `body_capacity` bytes after the header.
    pub fn with_capacity(id: u16, body_capacity: usize) -> Self {
        let mut buf = ByteBuffer::with_capacity(HEADER_SIZE + body_capacity);
        write_header(&mut buf, HEADER_SIZE, id);
        Self { buf }
    }

    /// Copy a received frame into a new packet. The size field is resynchronized to
    /// `bytes.len()`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::BufferUnderflow);
        }
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::BufferOverflow);
        }
        let mut packet = Self {
            buf: ByteBuffer::from_slice(bytes),
        };
        packet.on_written()?;
        Ok(packet)
    }

    pub fn size(&self) -> u16 {
        let bytes = self.buf.as_slice();
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    pub fn id(&self) -> u16 {
        let bytes = self.buf.as_slice();
        u16::from_le_bytes([bytes[2], bytes[3]])
    }

    pub fn set_id(&mut self, id: u16) {
        self.buf.written_mut()[2..4].copy_from_slice(&id.to_le_bytes());
    }

    /// Move the read cursor to the first body byte.
    pub fn skip_header(&mut self) {
        let _ = self.buf.seek(HEADER_SIZE);
    }

    pub fn body(&self) -> &[u8] {
        &self.buf.as_slice()[HEADER_SIZE..]
    }

    pub fn into_buffer(self) -> ByteBuffer {
        self.buf
    }
}

impl WireBuffer for Packet {
    fn buffer(&self) -> &ByteBuffer {
        &self.buf
    }

    fn buffer_mut(&mut self, _: Internal) -> &mut ByteBuffer {
        &mut self.buf
    }

    fn max_len(&self) -> usize {
        MAX_PACKET_SIZE
    }

    fn on_written(&mut self) -> Result<()> {
        sync_size(&mut self.buf)
    }

    /// Drop the body and rewind; the id is kept.
    fn reset_write(&mut self) -> Result<()> {
        let id = self.id();
        self.buf.truncate(0);
        write_header(&mut self.buf, HEADER_SIZE, id);
        Ok(())
    }
}

pub(crate) fn write_header(buf: &mut ByteBuffer, header_size: usize, id: u16) {
    let mut header = vec![0u8; header_size];
    header[0..2].copy_from_slice(&(header_size as u16).to_le_bytes());
    header[2..4].copy_from_slice(&id.to_le_bytes());
    // header_size is far below any limit, the store cannot fail
    let _ = buf.store(&header, 0, MAX_PACKET_SIZE);
    buf.reset_read();
}

pub(crate) fn sync_size(buf: &mut ByteBuffer) -> Result<()> {
    let len = buf.write_index();
    if len > MAX_PACKET_SIZE {
        return Err(ProtocolError::BufferOverflow);
    }
    if len >= 2 {
        buf.written_mut()[0..2].copy_from_slice(&(len as u16).to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_packet_has_header_only() {
        let packet = Packet::new(0x1234);
        assert_eq!(packet.len(), HEADER_SIZE);
        assert_eq!(packet.size(), 4);
        assert_eq!(packet.id(), 0x1234);
        assert_eq!(packet.as_bytes(), &[4, 0, 0x34, 0x12]);
    }

    #[test]
    fn size_tracks_every_write() {
        let mut packet = Packet::new(1);
        packet.put_u32(7).unwrap();
        assert_eq!(packet.size(), 8);
        packet.put_str_utf8("ab").unwrap();
        assert_eq!(packet.size(), 11);
        packet.overwrite(&[1, 2, 3, 4, 5], 8).unwrap();
        assert_eq!(packet.size(), 13);
    }

    #[test]
    fn clear_keeps_id() {
        let mut packet = Packet::new(42);
        packet.put_u64(1).unwrap();
        packet.clear().unwrap();
        assert_eq!(packet.id(), 42);
        assert_eq!(packet.size() as usize, HEADER_SIZE);
    }

    #[test]
    fn header_survives_reset_and_overwrite() {
        let mut packet = Packet::new(8);
        packet.put_u16(1).unwrap();
        packet.reset_write().unwrap();
        assert_eq!(packet.size() as usize, HEADER_SIZE);
        assert_eq!(packet.id(), 8);

        // overwriting the size field is undone by the resync
        packet.overwrite(&[0, 0, 9, 0], 0).unwrap();
        assert_eq!(packet.size() as usize, HEADER_SIZE);
        assert_eq!(packet.id(), 9);
    }

    #[test]
    fn writing_past_u16_size_overflows() {
        let mut packet = Packet::new(1);
        let chunk = vec![0u8; MAX_PACKET_SIZE - HEADER_SIZE];
        packet.write(&chunk).unwrap();
        assert_eq!(packet.size() as usize, MAX_PACKET_SIZE);
        assert!(matches!(packet.put_u8(0), Err(ProtocolError::BufferOverflow)));
        assert_eq!(packet.len(), MAX_PACKET_SIZE);
    }

    #[test]
    fn skip_header_then_read_body() {
        let mut packet = Packet::new(3);
        packet.put_i32(-5).unwrap();
        let mut copy = Packet::from_bytes(packet.as_bytes()).unwrap();
        copy.skip_header();
        assert_eq!(copy.get_i32().unwrap(), -5);
        assert_eq!(copy.body(), &(-5i32).to_le_bytes());
    }

    #[test]
    fn validator_requires_complete_frame() {
        assert_eq!(is_valid_packet(&[]), None);
        assert_eq!(is_valid_packet(&[6, 0, 1]), None);
        assert_eq!(is_valid_packet(&[6, 0, 1, 0, 9]), None);
        assert_eq!(is_valid_packet(&[6, 0, 1, 0, 9, 9, 7]), Some(6));
        assert_eq!(is_valid_packet(&[0, 0, 1, 0]), None);
    }

    #[test]
    fn id_of_reads_raw_frame() {
        assert_eq!(id_of(&[4, 0, 0x10, 0x00]), Some(16));
        assert_eq!(id_of(&[4, 0]), None);
    }
}
