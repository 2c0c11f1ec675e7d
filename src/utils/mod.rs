//! # Utility Modules
//!
//! Concurrency primitives, logging, timing and observability shared by every layer.
//!
//! ## Components
//! - **BlockingQueue**: FIFO with blocking pop and cooperative cancellation
//! - **Worker**: named OS-thread pools for background work and callback dispatch
//! - **Logging**: `tracing-subscriber` setup from [`crate::config::LoggingConfig`]
//! - **Timeout**: default deadlines and async timeout wrappers
//! - **Metrics**: thread-safe observability counters

pub mod blocking_queue;
pub mod logging;
pub mod metrics;
pub mod timeout;
pub mod worker;

pub use blocking_queue::BlockingQueue;
pub use worker::{WorkerPool, Workers};
