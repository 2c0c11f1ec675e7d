//! # Protocol Layer
//!
//! Routing of received frames above the transport.
//!
//! A frame read by a session is offered, in order, to:
//! 1. the session's **ResponseCorrelator** (pending request/response waits)
//! 2. the session's **PacketDispatcher** (handlers keyed by packet id)
//! 3. the session's receive handler
//!
//! The first one that takes the frame consumes it.

pub mod awaitable;
pub mod correlator;
pub mod dispatcher;

pub use awaitable::AwaitableRequest;
pub use correlator::ResponseCorrelator;
pub use dispatcher::PacketDispatcher;
