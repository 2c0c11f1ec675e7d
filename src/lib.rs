//! # sessionnet
//!
//! Building blocks for length-prefixed, event-driven TCP and UDP servers and clients.
//!
//! ## Layers
//! - [`core`]: byte buffers, packet framing, encrypted packets
//! - [`protocol`]: response correlation, awaitable requests, packet-id dispatch
//! - [`transport`]: sessions, acceptors, session pools (channels), UDP endpoints
//! - [`utils`]: blocking queue, worker pools, logging, metrics, timeouts
//! - [`engine`]: the owner of runtime, pools, metrics and registries
//!
//! ## Quick Start
//! ```rust,no_run
//! use sessionnet::config::{ChannelConfig, NetworkConfig};
//! use sessionnet::core::buffer::WireBuffer;
//! use sessionnet::engine::Engine;
//!
//! # fn main() -> sessionnet::error::Result<()> {
//! let engine = Engine::new(NetworkConfig::default())?;
//! engine.register_session_factory("echo", |ctx| {
//!     let session = sessionnet::transport::Session::with_validator(
//!         ctx.clone(),
//!         sessionnet::core::packet::packet_validator(),
//!     );
//!     session.on_receive(|session, frame| {
//!         let _ = session.send(frame.as_bytes());
//!     });
//!     session
//! })?;
//! let channel = engine.create_channel(&ChannelConfig {
//!     name: "echo".into(),
//!     session_factory: "echo".into(),
//!     ..ChannelConfig::default()
//! })?;
//! channel.listen("127.0.0.1:10100")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use engine::Engine;
pub use error::{CloseReason, ProtocolError, Result};
