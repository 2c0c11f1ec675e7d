//! Observability and Metrics
//!
//! Atomic counters for sessions, traffic, correlation and worker pools. One
//! [`Metrics`] block is owned by each engine and shared with its channels,
//! sessions and pools.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Sessions activated by an acceptor
    pub sessions_accepted: AtomicU64,
    /// Sessions activated by an outbound connect
    pub sessions_connected: AtomicU64,
    /// Inbound sockets dropped because the channel was full
    pub sessions_refused: AtomicU64,
    /// Currently active sessions
    pub sessions_active: AtomicU64,
    /// Total session closes
    pub sessions_closed: AtomicU64,
    /// Failed outbound connects
    pub connect_failures: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub datagrams_received: AtomicU64,
    /// Awaitable requests that timed out
    pub wait_timeouts: AtomicU64,
    /// Inbound streams rejected by a frame validator
    pub protocol_errors: AtomicU64,
    pub jobs_executed: AtomicU64,
    pub jobs_panicked: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_accepted: AtomicU64::new(0),
            sessions_connected: AtomicU64::new(0),
            sessions_refused: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            wait_timeouts: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_accepted(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_connected(&self) {
        self.sessions_connected.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_refused(&self) {
        self.sessions_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        // never below zero
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn datagram_sent(&self, byte_count: u64) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_executed(&self) {
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_panicked(&self) {
        self.jobs_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_connected: self.sessions_connected.load(Ordering::Relaxed),
            sessions_refused: self.sessions_refused.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_accepted = snapshot.sessions_accepted,
            sessions_connected = snapshot.sessions_connected,
            sessions_refused = snapshot.sessions_refused,
            sessions_active = snapshot.sessions_active,
            sessions_closed = snapshot.sessions_closed,
            connect_failures = snapshot.connect_failures,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            datagrams_sent = snapshot.datagrams_sent,
            datagrams_received = snapshot.datagrams_received,
            wait_timeouts = snapshot.wait_timeouts,
            protocol_errors = snapshot.protocol_errors,
            jobs_executed = snapshot.jobs_executed,
            jobs_panicked = snapshot.jobs_panicked,
            uptime_seconds = snapshot.uptime_seconds,
            "Network metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_accepted: u64,
    pub sessions_connected: u64,
    pub sessions_refused: u64,
    pub sessions_active: u64,
    pub sessions_closed: u64,
    pub connect_failures: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub wait_timeouts: u64,
    pub protocol_errors: u64,
    pub jobs_executed: u64,
    pub jobs_panicked: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_sessions_never_underflow() {
        let metrics = Metrics::new();
        metrics.session_closed();
        assert_eq!(metrics.snapshot().sessions_active, 0);
        metrics.session_accepted();
        metrics.session_connected();
        metrics.session_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_active, 1);
        assert_eq!(snapshot.sessions_closed, 2);
    }

    #[test]
    fn traffic_counters_accumulate_bytes() {
        let metrics = Metrics::new();
        metrics.packet_sent(10);
        metrics.datagram_sent(5);
        metrics.packet_received(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.datagrams_sent, 1);
        assert_eq!(snapshot.bytes_received, 3);
    }
}
