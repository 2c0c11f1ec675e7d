//! # Secure Packet
//!
//! Packet variant with a sequence number and in-place CRC32 + AES-128-CBC protection.
//!
//! ## Wire Format
//! ```text
//! [Size(2)] [Id(2)] [Sequence(4)] [Body(N)]
//! ```
//!
//! After [`SecurePacket::encrypt`] everything from offset 2 onwards is ciphertext:
//! ```text
//! [Size(2)] | AES-128-CBC( [Id][Sequence][Body][Zero padding][CRC32(4)] )
//! ```
//!
//! The zero padding makes `Id..CRC32` a whole number of 16-byte blocks. The CRC32
//! (IEEE, reflected) covers every byte from offset 2 up to the checksum itself.
//! The size prefix stays in the clear so receivers can frame encrypted packets.
//! Decryption leaves padding and checksum in place; readers consume the fields they
//! expect and ignore the tail.

use crate::core::buffer::{ByteBuffer, Internal, WireBuffer};
use crate::core::packet::{self, FrameValidator, MAX_PACKET_SIZE};
use crate::error::{constants, ProtocolError, Result};
use aes::Aes128;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::sync::Arc;
use tracing::{debug, warn};

/// Size of the `[size][id][sequence]` header
pub const HEADER_SIZE: usize = 8;

/// AES block size, also the required key and IV length
pub const BLOCK_SIZE: usize = 16;

const CRC_SIZE: usize = 4;

/// Offset at which the encrypted region starts
const CIPHER_OFFSET: usize = 2;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Zero bytes appended before the checksum for a packet of `size` bytes.
///
/// With `r = (size - 2) % 16` this is `12 - r` for `r <= 12` and `28 - r` otherwise,
/// so that `size - 2 + padding + 4` is a multiple of 16.
pub fn padding_len(size: usize) -> usize {
    let r = size.saturating_sub(CIPHER_OFFSET) % BLOCK_SIZE;
    if r <= BLOCK_SIZE - CRC_SIZE {
        BLOCK_SIZE - CRC_SIZE - r
    } else {
        2 * BLOCK_SIZE - CRC_SIZE - r
    }
}

/// CRC32 (IEEE 802.3, reflected, init and final xor `0xffffffff`).
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Length of the first complete secure packet in `bytes`, if there is one.
pub fn is_valid_secure_packet(bytes: &[u8]) -> Option<usize> {
    packet::declared_size(bytes, HEADER_SIZE)
}

/// Validator for [`SecurePacket`] framing.
pub fn secure_packet_validator() -> FrameValidator {
    Arc::new(is_valid_secure_packet)
}

fn check_key_iv(iv: &[u8], key: &[u8]) -> Result<()> {
    if key.len() != BLOCK_SIZE {
        return Err(ProtocolError::InvalidArgument(
            constants::ERR_INVALID_KEY_LENGTH.to_string(),
        ));
    }
    if iv.len() != BLOCK_SIZE {
        return Err(ProtocolError::InvalidArgument(
            constants::ERR_INVALID_IV_LENGTH.to_string(),
        ));
    }
    Ok(())
}

/// A [`ByteBuffer`] carrying the `[size][id][sequence]` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurePacket {
    buf: ByteBuffer,
}

impl SecurePacket {
    pub fn new(id: u16) -> Self {
        let mut buf = ByteBuffer::new();
        packet::write_header(&mut buf, HEADER_SIZE, id);
        Self { buf }
    }

    /// Copy a received frame into a new secure packet.
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

    pub fn sequence(&self) -> i32 {
        let bytes = self.buf.as_slice();
        i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
    }

    pub fn set_sequence(&mut self, sequence: i32) {
        self.buf.written_mut()[4..8].copy_from_slice(&sequence.to_le_bytes());
    }

    pub fn skip_header(&mut self) {
        let _ = self.buf.seek(HEADER_SIZE);
    }

    /// Pad, checksum and encrypt everything after the size field in place.
    ///
    /// Key and IV must both be 16 bytes, and padding plus checksum must fit below
    /// [`MAX_PACKET_SIZE`]. The packet is untouched when either check fails.
    pub fn encrypt(&mut self, iv: &[u8], key: &[u8]) -> Result<()> {
        check_key_iv(iv, key)?;
        let padding = padding_len(self.len());
        if self.len() + padding + CRC_SIZE > MAX_PACKET_SIZE {
            return Err(ProtocolError::BufferOverflow);
        }
        let cipher = Encryptor::new_from_slices(key, iv)
            .map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?;

        if padding > 0 {
            self.write(&[0u8; BLOCK_SIZE][..padding])?;
        }
        let checksum = crc32(&self.as_bytes()[CIPHER_OFFSET..]);
        self.put_u32(checksum)?;

        let region = &mut self.buf.written_mut()[CIPHER_OFFSET..];
        let len = region.len();
        cipher
            .encrypt_padded_mut::<NoPadding>(region, len)
            .map_err(|_| ProtocolError::InvalidBlockSize(len))?;
        Ok(())
    }

    /// Decrypt in place and verify the trailing checksum.
    ///
    /// Returns `Ok(false)` when the checksum does not match. A ciphertext region that
    /// is not a whole number of blocks is an error.
    pub fn decrypt(&mut self, iv: &[u8], key: &[u8]) -> Result<bool> {
        check_key_iv(iv, key)?;
        let len = self.len().saturating_sub(CIPHER_OFFSET);
        if len == 0 || len % BLOCK_SIZE != 0 {
            debug!(size = self.len(), "Secure packet has a malformed block size");
            return Err(ProtocolError::InvalidBlockSize(len));
        }
        let cipher = Decryptor::new_from_slices(key, iv)
            .map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?;
        cipher
            .decrypt_padded_mut::<NoPadding>(&mut self.buf.written_mut()[CIPHER_OFFSET..])
            .map_err(|_| ProtocolError::InvalidBlockSize(len))?;

        let end = self.len() - CRC_SIZE;
        let expected = self.get_u32_at(end)?;
        let actual = crc32(&self.as_bytes()[CIPHER_OFFSET..end]);
        if expected != actual {
            warn!(
                packet_id = self.id(),
                expected = expected,
                actual = actual,
                "Secure packet checksum mismatch"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl WireBuffer for SecurePacket {
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
        packet::sync_size(&mut self.buf)
    }

    fn reset_write(&mut self) -> Result<()> {
        let id = self.id();
        let sequence = self.sequence();
        self.buf.truncate(0);
        packet::write_header(&mut self.buf, HEADER_SIZE, id);
        self.set_sequence(sequence);
        Ok(())
    }
}
