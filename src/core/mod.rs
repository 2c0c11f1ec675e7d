//! # Core Components
//!
//! Byte buffers, packet framing and the packet wire formats.
//!
//! ## Components
//! - **ByteBuffer**: growable cursor buffer with typed little-endian accessors
//! - **Packet**: `[size][id]` framed buffer whose size follows every write
//! - **SecurePacket**: `[size][id][sequence]` framed buffer with CRC32 + AES-128-CBC
//! - **FrameCodec**: `tokio_util` codec driven by a pluggable frame validator
//!
//! ## Wire Format
//! ```text
//! [Size(2, LE)] [Id(2, LE)] [Body(N)]
//! ```
//!
//! ## Safety Limits
//! - Packets never exceed 65535 bytes; writes past it fail with `BufferOverflow`
//! - Reads never pass the write cursor; failures are `BufferUnderflow`

pub mod buffer;
pub mod codec;
pub mod packet;
pub mod secure;
