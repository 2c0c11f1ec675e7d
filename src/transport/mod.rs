//! # Transport Layer
//!
//! Sockets, sessions and session pools.
//!
//! ## Components
//! - **Session**: reusable per-connection state machine with reader/writer tasks
//! - **ReceiveBuffer**: growable receive buffer that cuts complete frames
//! - **Acceptor**: TCP listener with a self re-arming accept loop
//! - **Channel**: named session pool with a session-count ceiling
//! - **UDP**: datagram server and connected client
//!
//! All socket I/O runs on the engine's tokio runtime; all callbacks run on the
//! engine's dispatch pool.

pub mod acceptor;
pub mod channel;
pub mod receive;
pub mod session;
pub mod udp;

pub use channel::{Channel, SessionFactory};
pub use session::{IoContext, Session, SessionStatus};
pub use udp::{UdpClient, UdpServer};
