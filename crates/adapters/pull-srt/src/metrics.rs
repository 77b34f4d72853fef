//! Metrics collection for the SRT pull adapter
//!
//! [`Metrics`] holds adapter-wide totals. Each session records through a
//! [`StreamRecorder`], which updates its own [`StreamMetrics`] and the totals
//! together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Adapter-wide metrics collector
#[derive(Default)]
pub struct Metrics {
    /// Successful session starts (including reconnects)
    sessions_started: AtomicU64,

    /// Failed connect attempts
    connect_failures: AtomicU64,

    /// Reconnect attempts granted by the policy
    reconnect_attempts: AtomicU64,

    /// Total bytes received from origins
    bytes_received: AtomicU64,

    /// Total packets handed to the router
    packets_dispatched: AtomicU64,

    /// Elementary units dropped for unpublished tracks
    units_dropped: AtomicU64,

    /// Startup timestamp (unix seconds)
    startup_time: AtomicU64,

    streams: Mutex<HashMap<String, Arc<StreamMetrics>>>,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            startup_time: AtomicU64::new(Utc::now().timestamp().max(0) as u64),
            ..Default::default()
        }
    }

    /// Recorder for one stream; streams with the same name share counters
    pub fn stream(self: &Arc<Self>, name: &str) -> StreamRecorder {
        let stream = self
            .streams
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(StreamMetrics::default()))
            .clone();

        StreamRecorder {
            global: Arc::clone(self),
            stream,
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now().timestamp().max(0) as u64;
        let uptime_secs = now.saturating_sub(self.startup_time.load(Ordering::Relaxed));

        let mut streams: Vec<StreamMetricsSnapshot> = self
            .streams
            .lock()
            .iter()
            .map(|(name, stream)| stream.snapshot(name))
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));

        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            units_dropped: self.units_dropped.load(Ordering::Relaxed),
            uptime_secs,
            streams,
        }
    }
}

/// Per-stream counters and origin timings
#[derive(Default)]
pub struct StreamMetrics {
    origin_connection_time_ms: AtomicU64,
    origin_subscribe_time_ms: AtomicU64,
    bytes_received: AtomicU64,
    packets_dispatched: AtomicU64,
    units_dropped: AtomicU64,
    connect_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    sessions_started: AtomicU64,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

impl StreamMetrics {
    fn snapshot(&self, name: &str) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            name: name.to_string(),
            origin_connection_time_ms: self.origin_connection_time_ms.load(Ordering::Relaxed),
            origin_subscribe_time_ms: self.origin_subscribe_time_ms.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_dispatched: self.packets_dispatched.load(Ordering::Relaxed),
            units_dropped: self.units_dropped.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            last_connected_at: *self.last_connected_at.lock(),
        }
    }
}

/// Session-side handle updating stream and adapter-wide metrics
#[derive(Clone)]
pub struct StreamRecorder {
    global: Arc<Metrics>,
    stream: Arc<StreamMetrics>,
}

impl StreamRecorder {
    /// Record the time taken to establish the origin connection
    pub fn origin_connected(&self, elapsed: Duration) {
        self.stream
            .origin_connection_time_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        *self.stream.last_connected_at.lock() = Some(Utc::now());
    }

    /// Record the time from start request until the session was ready
    pub fn origin_subscribed(&self, elapsed: Duration) {
        self.stream
            .origin_subscribe_time_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.stream.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.global.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failed(&self) {
        self.stream.connect_failures.fetch_add(1, Ordering::Relaxed);
        self.global.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempted(&self) {
        self.stream.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.global.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_received(&self, bytes: u64) {
        self.stream.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.global.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn packet_dispatched(&self) {
        self.stream.packets_dispatched.fetch_add(1, Ordering::Relaxed);
        self.global.packets_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unit_dropped(&self) {
        self.stream.units_dropped.fetch_add(1, Ordering::Relaxed);
        self.global.units_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes received on this stream so far
    pub fn stream_bytes_received(&self) -> u64 {
        self.stream.bytes_received.load(Ordering::Relaxed)
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub connect_failures: u64,
    pub reconnect_attempts: u64,
    pub bytes_received: u64,
    pub packets_dispatched: u64,
    pub units_dropped: u64,
    pub uptime_secs: u64,
    pub streams: Vec<StreamMetricsSnapshot>,
}

/// Snapshot of one stream's metrics
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetricsSnapshot {
    pub name: String,
    pub origin_connection_time_ms: u64,
    pub origin_subscribe_time_ms: u64,
    pub bytes_received: u64,
    pub packets_dispatched: u64,
    pub units_dropped: u64,
    pub connect_failures: u64,
    pub reconnect_attempts: u64,
    pub sessions_started: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_updates_stream_and_totals() {
        let metrics = Arc::new(Metrics::new());
        let cam1 = metrics.stream("cam1");
        let cam2 = metrics.stream("cam2");

        cam1.bytes_received(1000);
        cam2.bytes_received(500);
        cam1.packet_dispatched();
        cam1.unit_dropped();
        cam2.reconnect_attempted();
        cam2.connect_failed();
        cam1.origin_connected(Duration::from_millis(42));
        cam1.origin_subscribed(Duration::from_millis(50));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_received, 1500);
        assert_eq!(snapshot.packets_dispatched, 1);
        assert_eq!(snapshot.units_dropped, 1);
        assert_eq!(snapshot.reconnect_attempts, 1);
        assert_eq!(snapshot.sessions_started, 1);
        assert_eq!(snapshot.connect_failures, 1);

        assert_eq!(snapshot.streams.len(), 2);
        let first = &snapshot.streams[0];
        assert_eq!(first.name, "cam1");
        assert_eq!(first.bytes_received, 1000);
        assert_eq!(first.origin_connection_time_ms, 42);
        assert_eq!(first.origin_subscribe_time_ms, 50);
        assert!(first.last_connected_at.is_some());
        assert_eq!(first.connect_failures, 0);
        assert_eq!(cam1.stream_bytes_received(), 1000);

        let second = &snapshot.streams[1];
        assert_eq!(second.connect_failures, 1);
        assert_eq!(second.reconnect_attempts, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Arc::new(Metrics::new());
        metrics.stream("cam1").bytes_received(10);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["bytes_received"], 10);
        assert_eq!(json["streams"][0]["name"], "cam1");
    }
}
