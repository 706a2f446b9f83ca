//! Observability and Metrics
//!
//! Process-wide counters for sessions, routing, fragmentation and games.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for server operations
#[derive(Debug)]
pub struct Metrics {
    /// Stream connections accepted
    pub connections_total: AtomicU64,
    /// Stream connections currently open
    pub connections_active: AtomicU64,
    /// Connections refused at the connection limit
    pub connections_rejected: AtomicU64,
    /// Successful registrations
    pub sessions_registered: AtomicU64,
    /// Currently registered identities
    pub sessions_active: AtomicU64,
    /// Registrations refused because the identity was taken
    pub name_conflicts: AtomicU64,
    /// Messages handed to a peer's outbound queue
    pub messages_sent: AtomicU64,
    /// Messages decoded from peers
    pub messages_received: AtomicU64,
    /// Bytes written to transports
    pub bytes_sent: AtomicU64,
    /// Bytes read from transports
    pub bytes_received: AtomicU64,
    /// Datagram frames written
    pub frames_sent: AtomicU64,
    /// Datagram frames read
    pub frames_received: AtomicU64,
    /// Reassemblies completed
    pub reassemblies_completed: AtomicU64,
    /// Reassemblies dropped by TTL
    pub reassemblies_expired: AtomicU64,
    /// Reassemblies discarded on error or replacement
    pub reassemblies_rejected: AtomicU64,
    /// Games started
    pub games_started: AtomicU64,
    /// Games ended by win, draw or disconnect
    pub games_finished: AtomicU64,
    /// Deliveries dropped on a full or closed queue
    pub deliveries_dropped: AtomicU64,
    /// Connection errors
    pub connection_errors: AtomicU64,
    /// Protocol errors
    pub protocol_errors: AtomicU64,
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
            sessions_registered: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            name_conflicts: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            reassemblies_completed: AtomicU64::new(0),
            reassemblies_expired: AtomicU64::new(0),
            reassemblies_rejected: AtomicU64::new(0),
            games_started: AtomicU64::new(0),
            games_finished: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
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

    pub fn session_registered(&self) {
        self.sessions_registered.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn name_conflict(&self) {
        self.name_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message queued for a peer
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message decoded from a peer
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes consumed by the stream codec
    pub fn bytes_read(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record bytes produced by the stream codec
    pub fn bytes_written(&self, byte_count: u64) {
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn reassembly_completed(&self) {
        self.reassemblies_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reassembly_expired(&self) {
        self.reassemblies_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reassembly_rejected(&self) {
        self.reassemblies_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_started(&self) {
        self.games_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_finished(&self) {
        self.games_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_dropped(&self) {
        self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection error
    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            sessions_registered: self.sessions_registered.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            name_conflicts: self.name_conflicts.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reassemblies_completed: self.reassemblies_completed.load(Ordering::Relaxed),
            reassemblies_expired: self.reassemblies_expired.load(Ordering::Relaxed),
            reassemblies_rejected: self.reassemblies_rejected.load(Ordering::Relaxed),
            games_started: self.games_started.load(Ordering::Relaxed),
            games_finished: self.games_finished.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
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
            sessions_registered = snapshot.sessions_registered,
            sessions_active = snapshot.sessions_active,
            name_conflicts = snapshot.name_conflicts,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            reassemblies_completed = snapshot.reassemblies_completed,
            reassemblies_expired = snapshot.reassemblies_expired,
            reassemblies_rejected = snapshot.reassemblies_rejected,
            games_started = snapshot.games_started,
            games_finished = snapshot.games_finished,
            deliveries_dropped = snapshot.deliveries_dropped,
            connection_errors = snapshot.connection_errors,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Chat metrics snapshot"
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
    pub sessions_registered: u64,
    pub sessions_active: u64,
    pub name_conflicts: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub reassemblies_completed: u64,
    pub reassemblies_expired: u64,
    pub reassemblies_rejected: u64,
    pub games_started: u64,
    pub games_finished: u64,
    pub deliveries_dropped: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
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
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
