//! # Error Types
//!
//! Error handling for buffers, sessions, channels and worker pools.
//!
//! ## Error Categories
//! - **Codec Errors**: buffer underflow/overflow, malformed strings, bad cipher blocks
//! - **Lifecycle Errors**: activating an active session, duplicate names, stopped pools
//! - **Transport Errors**: I/O failures, refused or timed out connections
//! - **Correlation Errors**: response wait timeouts and cancellations
//!
//! Transport failures that happen inside a session's I/O tasks never reach a caller
//! directly; they close the session and are reported as a [`CloseReason`].
//!
//! ## Example Usage
//! ```rust
//! use sessionnet::core::buffer::{ByteBuffer, WireBuffer};
//! use sessionnet::error::{ProtocolError, Result};
//!
//! fn read_id(buf: &mut ByteBuffer) -> Result<u16> {
//!     buf.get_u16()
//! }
//!
//! let mut empty = ByteBuffer::new();
//! assert!(matches!(read_id(&mut empty), Err(ProtocolError::BufferUnderflow)));
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Session lifecycle
    pub const ERR_VALIDATOR_REQUIRED: &str = "Session requires a frame validator";
    pub const ERR_NO_SESSION_AVAILABLE: &str = "Cannot activate any more sessions";

    /// Secure packets
    pub const ERR_INVALID_KEY_LENGTH: &str = "AES-128 key must be 16 bytes";
    pub const ERR_INVALID_IV_LENGTH: &str = "AES-128-CBC IV must be 16 bytes";

    /// Framing
    pub const ERR_EMPTY_FRAME: &str = "Frame validator reported a zero-length frame";
    pub const ERR_OVERSIZED_FRAME: &str = "Frame validator reported more bytes than received";

    /// File logging was enabled without a path
    pub const ERR_LOG_FILE_REQUIRED: &str = "log_to_file requires log_file_path";
}

/// ProtocolError is the primary error type for all framework operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Buffer underflow")]
    BufferUnderflow,

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Name already exists: {0}")]
    AlreadyExists(String),

    #[error("Name does not exist: {0}")]
    NotExist(String),

    #[error("Session is already activated")]
    ActivatedSession,

    #[error("Acceptor is already running")]
    AcceptorRunning,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out waiting for response to packet {packet_id}")]
    WaitTimeout { packet_id: u16 },

    #[error("Operation canceled")]
    Canceled,

    #[error("Job queue canceled")]
    JobCanceled,

    #[error("Invalid cipher block size: {0} bytes")]
    InvalidBlockSize(usize),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why a session or datagram endpoint was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Closed by the framework (channel shutdown, pool teardown)
    Normal,
    /// The peer closed the connection
    ClosedByRemote,
    /// Closed by application code
    ClosedByUser,
    /// A socket read or write failed
    IoError,
    /// The frame validator rejected the inbound byte stream
    ProtocolViolation,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Normal => "normal",
            CloseReason::ClosedByRemote => "closed by remote",
            CloseReason::ClosedByUser => "closed by user",
            CloseReason::IoError => "i/o error",
            CloseReason::ProtocolViolation => "protocol violation",
        };
        f.write_str(s)
    }
}
