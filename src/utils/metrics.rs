//! Observability and Metrics
//!
//! Counters for connections, frames and handler activity, collected with
//! atomics so every connection task can update them without locking.
//!
//! Only raw totals are kept. Rates are left to whatever scrapes the snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Global metrics collector for framing operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections refused (limit reached or rejected by on_connect)
    pub connections_rejected: AtomicU64,
    /// Frames decoded successfully
    pub frames_decoded: AtomicU64,
    /// Frames written to a socket
    pub frames_encoded: AtomicU64,
    /// Messages run through a handler
    pub messages_handled: AtomicU64,
    /// Total bytes received in complete frames
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Decode failures of any kind
    pub decode_errors: AtomicU64,
    /// Decode failures caused by an unregistered discriminator
    pub undefined_type_errors: AtomicU64,
    /// Handler failures
    pub handler_errors: AtomicU64,
    /// Accumulated handler run time in microseconds
    pub handle_time_micros: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            messages_handled: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            undefined_type_errors: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            handle_time_micros: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self, byte_count: u64) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_encoded(&self, byte_count: u64) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a failed decode; `undefined` marks an unregistered discriminator
    pub fn decode_error(&self, undefined: bool) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        if undefined {
            self.undefined_type_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one handler invocation and how long it ran
    pub fn message_handled(&self, elapsed: Duration) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
        self.handle_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            undefined_type_errors: self.undefined_type_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            handle_time_micros: self.handle_time_micros.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            frames_decoded = snapshot.frames_decoded,
            frames_encoded = snapshot.frames_encoded,
            messages_handled = snapshot.messages_handled,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            decode_errors = snapshot.decode_errors,
            undefined_type_errors = snapshot.undefined_type_errors,
            handler_errors = snapshot.handler_errors,
            handle_time_micros = snapshot.handle_time_micros,
            uptime_seconds = snapshot.uptime_seconds,
            "Framing metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub messages_handled: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub decode_errors: u64,
    pub undefined_type_errors: u64,
    pub handler_errors: u64,
    pub handle_time_micros: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
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
    fn test_connection_counters() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
    }

    #[test]
    fn test_decode_error_split() {
        let metrics = Metrics::new();
        metrics.decode_error(false);
        metrics.decode_error(true);

        let snap = metrics.snapshot();
        assert_eq!(snap.decode_errors, 2);
        assert_eq!(snap.undefined_type_errors, 1);
    }

    #[test]
    fn test_handle_time_accumulates() {
        let metrics = Metrics::new();
        metrics.message_handled(Duration::from_micros(150));
        metrics.message_handled(Duration::from_micros(50));
        metrics.frame_decoded(32);

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_handled, 2);
        assert_eq!(snap.handle_time_micros, 200);
        assert_eq!(snap.frames_decoded, 1);
        assert_eq!(snap.bytes_received, 32);
    }
}
