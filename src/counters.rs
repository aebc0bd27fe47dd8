//! Process-wide statistics exported to the status endpoints.
//!
//! Each counter has exactly one writer: the broadcaster owns the listener
//! counts and bytes-out, the producers own bytes-in, and the source
//! acceptor owns the connected flag. Readers never lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::ring::RingBuffer;

/// Atomic counters updated by the data plane and read by the status
/// endpoints.
pub struct Counters {
    listeners_current: AtomicU64,
    listeners_peak: AtomicU64,
    bytes_in_total: AtomicU64,
    bytes_out_total: AtomicU64,
    source_connected: AtomicBool,
    started_at: Instant,
}

impl Counters {
    /// Creates a zeroed counter set with the uptime clock starting now.
    pub fn new() -> Self {
        Self {
            listeners_current: AtomicU64::new(0),
            listeners_peak: AtomicU64::new(0),
            bytes_in_total: AtomicU64::new(0),
            bytes_out_total: AtomicU64::new(0),
            source_connected: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Records a listener registration and updates the peak.
    pub fn listener_connected(&self) {
        let current = self.listeners_current.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners_peak.fetch_max(current, Ordering::SeqCst);
    }

    /// Records a listener leaving.
    pub fn listener_disconnected(&self) {
        self.listeners_current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Current number of registered listeners.
    pub fn listeners_current(&self) -> u64 {
        self.listeners_current.load(Ordering::SeqCst)
    }

    /// Adds produced bytes (playlist or source into the ring).
    pub fn add_bytes_in(&self, n: u64) {
        self.bytes_in_total.fetch_add(n, Ordering::SeqCst);
    }

    /// Adds delivered bytes (chunks enqueued to listeners).
    pub fn add_bytes_out(&self, n: u64) {
        self.bytes_out_total.fetch_add(n, Ordering::SeqCst);
    }

    /// Total bytes accepted into the ring.
    pub fn bytes_in_total(&self) -> u64 {
        self.bytes_in_total.load(Ordering::SeqCst)
    }

    /// Flags whether a live source currently owns the ring.
    pub fn set_source_connected(&self, connected: bool) {
        self.source_connected.store(connected, Ordering::SeqCst);
    }

    /// Whether a live source currently owns the ring.
    pub fn source_connected(&self) -> bool {
        self.source_connected.load(Ordering::SeqCst)
    }

    /// Seconds since the server started.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Takes a consistent-enough snapshot for the status endpoints.
    ///
    /// Ring fill is sampled here rather than stored, so the snapshot
    /// reflects the ring at read time.
    pub fn snapshot(&self, ring: &RingBuffer) -> CountersSnapshot {
        CountersSnapshot {
            listeners_current: self.listeners_current.load(Ordering::SeqCst),
            listeners_peak: self.listeners_peak.load(Ordering::SeqCst),
            bytes_in_total: self.bytes_in_total.load(Ordering::SeqCst),
            bytes_out_total: self.bytes_out_total.load(Ordering::SeqCst),
            ring_fill_percent: ring.fill_percent() * 100.0,
            source_connected: self.source_connected.load(Ordering::SeqCst),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of [`Counters`], serializable for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    /// Listeners currently registered.
    pub listeners_current: u64,
    /// High-water mark of concurrent listeners.
    pub listeners_peak: u64,
    /// Total bytes accepted into the ring.
    pub bytes_in_total: u64,
    /// Total bytes enqueued to listeners.
    pub bytes_out_total: u64,
    /// Ring fill at snapshot time, 0-100.
    pub ring_fill_percent: f64,
    /// Whether a live source owns the ring.
    pub source_connected: bool,
    /// Seconds since startup.
    pub uptime_seconds: u64,
}
