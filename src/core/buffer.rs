//! # Byte Buffer
//!
//! Growable read/write byte cursor with typed little-endian accessors.
//!
//! A [`ByteBuffer`] keeps `read <= written <= capacity` at all times. Reads never
//! go past the write cursor and fail with [`ProtocolError::BufferUnderflow`]
//! instead of returning short data. Writes past the capacity reallocate, rounding
//! the new capacity up to [`ALLOC_BLOCK_SIZE`].
//!
//! The accessors live on the [`WireBuffer`] trait so that packet types wrapping a
//! `ByteBuffer` get them for free and can react to every write through
//! [`WireBuffer::on_written`] (used to keep the packet size header in sync).
//!
//! ## Encoding
//! - Scalars: fixed-width little-endian (`bool` is one byte, non-zero is `true`)
//! - UTF-8 strings: bytes followed by a single `0x00` terminator
//! - UTF-16 strings: little-endian code units followed by a `0x0000` terminator
//!
//! The terminator is consumed by the reader but never part of the returned string.

use crate::error::{ProtocolError, Result};

mod sealed {
    /// Capability for raw storage access. Only this crate can construct it, so cursors
    /// of a packet move through the typed accessors alone.
    #[derive(Clone, Copy, Debug)]
    pub struct Internal(());

    impl Internal {
        pub(crate) const fn new() -> Self {
            Self(())
        }
    }
}

pub(crate) use sealed::Internal;

/// Allocation granularity for every (re)allocation
pub const ALLOC_BLOCK_SIZE: usize = 128;

/// Capacity of a buffer created with [`ByteBuffer::new`]
pub const DEFAULT_CAPACITY: usize = 256;

#[inline]
fn round_to_block(n: usize) -> usize {
    n.div_ceil(ALLOC_BLOCK_SIZE).max(1) * ALLOC_BLOCK_SIZE
}

/// Growable byte storage with independent read and write cursors.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read: usize,
    written: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.data.len())
            .field("read", &self.read)
            .field("written", &self.written)
            .finish()
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; round_to_block(capacity)],
            read: 0,
            written: 0,
        }
    }

    /// Create a buffer holding a copy of `bytes`, read cursor at 0.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = Self::with_capacity(bytes.len());
        buf.data[..bytes.len()].copy_from_slice(bytes);
        buf.written = bytes.len();
        buf
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn read_index(&self) -> usize {
        self.read
    }

    pub fn write_index(&self) -> usize {
        self.written
    }

    /// Bytes between the read and write cursors.
    pub fn readable_len(&self) -> usize {
        self.written - self.read
    }

    /// Bytes that can be written before the next reallocation.
    pub fn writable_len(&self) -> usize {
        self.data.len() - self.written
    }

    /// Every written byte, independent of the read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.written]
    }

    /// The unread part of the written bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.read..self.written]
    }

    /// Replace the storage with a fresh allocation of at least `capacity` bytes.
    pub fn allocate(&mut self, capacity: usize) {
        self.data = vec![0; round_to_block(capacity)];
        self.read = 0;
        self.written = 0;
    }

    /// Grow the capacity to at least `capacity` bytes. Never shrinks.
    pub fn resize(&mut self, capacity: usize) {
        if capacity > self.data.len() {
            self.data.resize(round_to_block(capacity), 0);
        }
    }

    /// Shift the unread bytes to offset 0.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.copy_within(self.read..self.written, 0);
        self.written -= self.read;
        self.read = 0;
    }

    /// Move the read cursor to an absolute position within the written bytes.
    pub fn seek(&mut self, index: usize) -> Result<()> {
        if index > self.written {
            return Err(ProtocolError::BufferUnderflow);
        }
        self.read = index;
        Ok(())
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.written = len.min(self.written);
        self.read = self.read.min(self.written);
    }

    /// Unwritten storage after the write cursor, for socket reads.
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.written..]
    }

    /// Mark `n` bytes of [`Self::spare_mut`] as written.
    pub(crate) fn commit(&mut self, n: usize) {
        self.written = (self.written + n).min(self.data.len());
    }

    /// Mutable access to already written bytes; cursors are untouched.
    pub(crate) fn written_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.written]
    }

    pub(crate) fn store(&mut self, src: &[u8], at: usize, limit: usize) -> Result<()> {
        let end = at.checked_add(src.len()).ok_or(ProtocolError::BufferOverflow)?;
        if end > limit {
            return Err(ProtocolError::BufferOverflow);
        }
        self.resize(end);
        self.data[at..end].copy_from_slice(src);
        if end > self.written {
            self.written = end;
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.peek::<N>(self.read)?;
        self.read += N;
        Ok(bytes)
    }

    fn peek<const N: usize>(&self, index: usize) -> Result<[u8; N]> {
        let end = index.checked_add(N).ok_or(ProtocolError::BufferUnderflow)?;
        if end > self.written {
            return Err(ProtocolError::BufferUnderflow);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[index..end]);
        Ok(out)
    }
}

macro_rules! scalar_accessors {
    ($($ty:ty => $put:ident, $get:ident, $get_at:ident;)*) => {
        $(
            #[doc = concat!("Append a little-endian `", stringify!($ty), "`, returning the offset it was stored at.")]
            fn $put(&mut self, value: $ty) -> Result<usize> {
                self.write(&value.to_le_bytes())
            }

            #[doc = concat!("Read a little-endian `", stringify!($ty), "` at the read cursor.")]
            fn $get(&mut self) -> Result<$ty> {
                const N: usize = std::mem::size_of::<$ty>();
                self.buffer_mut(Internal::new()).take::<N>().map(<$ty>::from_le_bytes)
            }

            #[doc = concat!("Read a little-endian `", stringify!($ty), "` at `index` without moving the cursor.")]
            fn $get_at(&self, index: usize) -> Result<$ty> {
                const N: usize = std::mem::size_of::<$ty>();
                self.buffer().peek::<N>(index).map(<$ty>::from_le_bytes)
            }
        )*
    };
}

/// Typed cursor access over anything backed by a [`ByteBuffer`].
///
/// Mutable storage is not reachable from outside the crate, so a packet header can
/// only change through these accessors:
///
/// ```compile_fail
/// use sessionnet::core::buffer::WireBuffer;
/// use sessionnet::core::packet::Packet;
///
/// let mut packet = Packet::new(1);
/// packet.buffer_mut().truncate(0);
/// ```
pub trait WireBuffer {
    fn buffer(&self) -> &ByteBuffer;

    #[doc(hidden)]
    fn buffer_mut(&mut self, access: Internal) -> &mut ByteBuffer;

    /// Upper bound on the write cursor. Writes past it fail with `BufferOverflow`.
    fn max_len(&self) -> usize {
        usize::MAX
    }

    /// Invoked after every change of the write cursor.
    fn on_written(&mut self) -> Result<()> {
        Ok(())
    }

    /// Number of written bytes.
    fn len(&self) -> usize {
        self.buffer().write_index()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_bytes(&self) -> &[u8] {
        self.buffer().as_slice()
    }

    /// Append raw bytes, returning the offset they were stored at.
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        let limit = self.max_len();
        let buf = self.buffer_mut(Internal::new());
        let at = buf.written;
        buf.store(src, at, limit)?;
        self.on_written()?;
        Ok(at)
    }

    /// Write raw bytes at `index`; the write cursor only moves if the write extends past it.
    fn overwrite(&mut self, src: &[u8], index: usize) -> Result<()> {
        if index > self.len() {
            return Err(ProtocolError::BufferOverflow);
        }
        let limit = self.max_len();
        self.buffer_mut(Internal::new()).store(src, index, limit)?;
        self.on_written()
    }

    /// Consume `n` bytes at the read cursor.
    fn read(&mut self, n: usize) -> Result<&[u8]> {
        let buf = self.buffer_mut(Internal::new());
        let end = buf.read.checked_add(n).ok_or(ProtocolError::BufferUnderflow)?;
        if end > buf.written {
            return Err(ProtocolError::BufferUnderflow);
        }
        let start = buf.read;
        buf.read = end;
        Ok(&buf.data[start..end])
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.read(n).map(|_| ())
    }

    fn reset_read(&mut self) {
        self.buffer_mut(Internal::new()).read = 0;
    }

    fn reset_write(&mut self) -> Result<()> {
        self.buffer_mut(Internal::new()).truncate(0);
        self.on_written()
    }

    fn clear(&mut self) -> Result<()> {
        self.reset_write()
    }

    fn put_bool(&mut self, value: bool) -> Result<usize> {
        self.write(&[u8::from(value)])
    }

    fn get_bool(&mut self) -> Result<bool> {
        self.get_u8().map(|v| v != 0)
    }

    fn get_bool_at(&self, index: usize) -> Result<bool> {
        self.get_u8_at(index).map(|v| v != 0)
    }

    scalar_accessors! {
        i8 => put_i8, get_i8, get_i8_at;
        u8 => put_u8, get_u8, get_u8_at;
        i16 => put_i16, get_i16, get_i16_at;
        u16 => put_u16, get_u16, get_u16_at;
        i32 => put_i32, get_i32, get_i32_at;
        u32 => put_u32, get_u32, get_u32_at;
        i64 => put_i64, get_i64, get_i64_at;
        u64 => put_u64, get_u64, get_u64_at;
        f32 => put_f32, get_f32, get_f32_at;
        f64 => put_f64, get_f64, get_f64_at;
    }

    /// Append a null-terminated UTF-8 string.
    fn put_str_utf8(&mut self, value: &str) -> Result<usize> {
        let mut encoded = Vec::with_capacity(value.len() + 1);
        encoded.extend_from_slice(value.as_bytes());
        encoded.push(0);
        self.write(&encoded)
    }

    /// Read a null-terminated UTF-8 string; the terminator is consumed.
    fn get_str_utf8(&mut self) -> Result<String> {
        let remaining = self.buffer().remaining();
        let len = remaining
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::BufferUnderflow)?;
        let value = std::str::from_utf8(&remaining[..len])
            .map_err(|e| ProtocolError::DeserializeError(format!("invalid UTF-8 string: {e}")))?
            .to_owned();
        self.skip(len + 1)?;
        Ok(value)
    }

    /// Append a null-terminated UTF-16LE string.
    fn put_str_utf16(&mut self, value: &str) -> Result<usize> {
        let mut encoded: Vec<u8> = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
        encoded.extend_from_slice(&[0, 0]);
        self.write(&encoded)
    }

    /// Read a null-terminated UTF-16LE string; the terminator is consumed.
    fn get_str_utf16(&mut self) -> Result<String> {
        let units: Vec<u16> = self
            .buffer()
            .remaining()
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        let consumed = (units.len() + 1) * 2;
        if consumed > self.buffer().readable_len() {
            return Err(ProtocolError::BufferUnderflow);
        }
        let value = String::from_utf16(&units)
            .map_err(|e| ProtocolError::DeserializeError(format!("invalid UTF-16 string: {e}")))?;
        self.skip(consumed)?;
        Ok(value)
    }
}

impl WireBuffer for ByteBuffer {
    fn buffer(&self) -> &ByteBuffer {
        self
    }

    fn buffer_mut(&mut self, _: Internal) -> &mut ByteBuffer {
        self
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_to_block() {
        assert_eq!(ByteBuffer::new().capacity(), 256);
        assert_eq!(ByteBuffer::with_capacity(1).capacity(), 128);
        assert_eq!(ByteBuffer::with_capacity(129).capacity(), 256);
        assert_eq!(ByteBuffer::with_capacity(0).capacity(), 128);
    }

    #[test]
    fn resize_never_shrinks() {
        let mut buf = ByteBuffer::with_capacity(512);
        buf.resize(10);
        assert_eq!(buf.capacity(), 512);
        buf.resize(513);
        assert_eq!(buf.capacity(), 640);
    }

    #[test]
    fn write_grows_past_capacity() {
        let mut buf = ByteBuffer::with_capacity(128);
        buf.write(&[7u8; 300]).unwrap();
        assert_eq!(buf.capacity(), 384);
        assert_eq!(buf.len(), 300);
    }

    #[test]
    fn put_returns_previous_write_index() {
        let mut buf = ByteBuffer::new();
        assert_eq!(buf.put_u32(1).unwrap(), 0);
        assert_eq!(buf.put_u16(2).unwrap(), 4);
        assert_eq!(buf.put_bool(true).unwrap(), 6);
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn scalars_are_little_endian() {
        let mut buf = ByteBuffer::new();
        buf.put_u32(0x0403_0201).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(buf.get_u16_at(2).unwrap(), 0x0403);
        assert_eq!(buf.get_u32().unwrap(), 0x0403_0201);
    }

    #[test]
    fn read_past_write_cursor_underflows() {
        let mut buf = ByteBuffer::new();
        buf.put_u16(5).unwrap();
        assert!(matches!(buf.get_u32(), Err(ProtocolError::BufferUnderflow)));
        // a failed read leaves the cursor untouched
        assert_eq!(buf.get_u16().unwrap(), 5);
        assert!(matches!(buf.get_u8_at(2), Err(ProtocolError::BufferUnderflow)));
    }

    #[test]
    fn utf8_terminator_is_consumed_not_returned() {
        let mut buf = ByteBuffer::new();
        buf.put_str_utf8("héllo").unwrap();
        buf.put_u8(9).unwrap();
        assert_eq!(buf.len(), "héllo".len() + 2);
        assert_eq!(buf.get_str_utf8().unwrap(), "héllo");
        assert_eq!(buf.get_u8().unwrap(), 9);
    }

    #[test]
    fn utf16_round_trip_with_terminator() {
        let mut buf = ByteBuffer::new();
        buf.put_str_utf16("日本").unwrap();
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.get_str_utf16().unwrap(), "日本");
        assert_eq!(buf.readable_len(), 0);
    }

    #[test]
    fn string_that_does_not_fit_leaves_buffer_untouched() {
        let mut packet = crate::core::packet::Packet::new(1);
        let filler = vec![0u8; crate::core::packet::MAX_PACKET_SIZE - 7];
        packet.write(&filler).unwrap();
        let before = packet.clone();

        // "abc" fits, its terminator does not
        assert!(matches!(packet.put_str_utf8("abc"), Err(ProtocolError::BufferOverflow)));
        assert_eq!(packet, before);
        assert!(matches!(packet.put_str_utf16("a"), Err(ProtocolError::BufferOverflow)));
        assert_eq!(packet, before);
    }

    #[test]
    fn unterminated_string_underflows() {
        let mut buf = ByteBuffer::from_slice(b"abc");
        assert!(matches!(buf.get_str_utf8(), Err(ProtocolError::BufferUnderflow)));
        let mut buf = ByteBuffer::from_slice(&[0x41, 0x00]);
        assert!(matches!(buf.get_str_utf16(), Err(ProtocolError::BufferUnderflow)));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut buf = ByteBuffer::from_slice(&[0xff, 0xfe, 0x00]);
        assert!(matches!(
            buf.get_str_utf8(),
            Err(ProtocolError::DeserializeError(_))
        ));
    }

    #[test]
    fn overwrite_extends_only_past_cursor() {
        let mut buf = ByteBuffer::from_slice(&[1, 2, 3, 4]);
        buf.overwrite(&[9, 9], 1).unwrap();
        assert_eq!(buf.as_slice(), &[1, 9, 9, 4]);
        buf.overwrite(&[8, 8], 3).unwrap();
        assert_eq!(buf.as_slice(), &[1, 9, 9, 8, 8]);
        assert!(buf.overwrite(&[0], 6).is_err());
    }

    #[test]
    fn compact_moves_unread_to_front() {
        let mut buf = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        buf.skip(3).unwrap();
        buf.compact();
        assert_eq!(buf.read_index(), 0);
        assert_eq!(buf.as_slice(), &[4, 5]);
    }

    #[test]
    fn allocate_resets_cursors() {
        let mut buf = ByteBuffer::from_slice(&[1, 2, 3]);
        buf.allocate(1000);
        assert_eq!(buf.capacity(), 1024);
        assert!(buf.is_empty());
        assert_eq!(buf.read_index(), 0);
    }
}
