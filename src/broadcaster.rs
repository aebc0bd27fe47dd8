//! Chunk fan-out from the ring to all connected listeners.
//!
//! The broadcaster is the sole reader of the ring. Each cycle it reads one
//! fixed-size chunk and enqueues it on every listener's bounded queue with
//! a non-blocking put. A listener whose queue is full is evicted on the
//! spot: one stalled client must never cause head-of-line blocking for the
//! rest. Eviction closes the queue, which the listener's HTTP task observes
//! as end-of-stream.
//!
//! Between reads the broadcaster sleeps on a tier chosen by ring fill, so a
//! starved ring costs almost no CPU while a full ring drains near-flat-out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::config::BroadcasterConfig;
use crate::counters::Counters;
use crate::ring::RingBuffer;

/// Sleep while the ring has data but less than a full chunk.
const SLEEP_SHORT: Duration = Duration::from_millis(5);

/// Sleep after ten or more consecutive empty reads.
const SLEEP_EMPTY: Duration = Duration::from_millis(20);

/// Empty reads before dropping to the long idle sleep.
const EMPTY_READS_BEFORE_IDLE: u32 = 10;

/// One registered listener as seen by the broadcaster: the queue handle
/// plus accounting. The HTTP task owns the receiving end.
struct ListenerSlot {
    tx: mpsc::Sender<Bytes>,
    addr: SocketAddr,
    connected_at: Instant,
    bytes_sent: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<u64, ListenerSlot>,
}

/// Per-listener detail for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStats {
    /// Listener id, unique for the life of the process.
    pub id: u64,
    /// Remote address of the client.
    pub addr: String,
    /// Bytes enqueued to this listener so far.
    pub bytes_sent: u64,
    /// Seconds since the listener registered.
    pub connected_seconds: u64,
}

/// Fan-out hub: owns the ring read role and the listener registry.
pub struct Broadcaster {
    ring: Arc<RingBuffer>,
    counters: Arc<Counters>,
    registry: Mutex<Registry>,
    config: BroadcasterConfig,
    max_listeners: usize,
}

impl Broadcaster {
    /// Creates a broadcaster over `ring`. `max_listeners` of 0 means
    /// unlimited.
    pub fn new(
        ring: Arc<RingBuffer>,
        counters: Arc<Counters>,
        config: BroadcasterConfig,
        max_listeners: usize,
    ) -> Self {
        Self {
            ring,
            counters,
            registry: Mutex::new(Registry::default()),
            config,
            max_listeners,
        }
    }

    /// Registers a listener, returning its id and the receiving end of its
    /// bounded queue. Returns `None` when the listener cap is reached.
    pub fn register(&self, addr: SocketAddr) -> Option<(u64, mpsc::Receiver<Bytes>)> {
        let mut registry = self.registry.lock();
        if self.max_listeners > 0 && registry.listeners.len() >= self.max_listeners {
            tracing::warn!(%addr, max = self.max_listeners, "listener rejected: at capacity");
            return None;
        }

        let id = registry.next_id;
        registry.next_id += 1;

        let (tx, rx) = mpsc::channel(self.config.queue_chunks);
        registry.listeners.insert(
            id,
            ListenerSlot {
                tx,
                addr,
                connected_at: Instant::now(),
                bytes_sent: 0,
            },
        );
        drop(registry);

        self.counters.listener_connected();
        tracing::info!(listener = id, %addr, "listener added");
        Some((id, rx))
    }

    /// Removes a listener. Idempotent: unregistering an unknown or
    /// already-removed id has no effect.
    pub fn unregister(&self, id: u64) {
        let removed = self.registry.lock().listeners.remove(&id);
        if removed.is_some() {
            self.counters.listener_disconnected();
            tracing::info!(listener = id, "listener removed");
        }
    }

    /// Whether the listener is still registered (i.e. not evicted).
    pub fn is_active(&self, id: u64) -> bool {
        self.registry.lock().listeners.contains_key(&id)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Per-listener stats for the stats endpoint.
    pub fn listener_stats(&self) -> Vec<ListenerStats> {
        let registry = self.registry.lock();
        let mut stats: Vec<ListenerStats> = registry
            .listeners
            .iter()
            .map(|(&id, slot)| ListenerStats {
                id,
                addr: slot.addr.to_string(),
                bytes_sent: slot.bytes_sent,
                connected_seconds: slot.connected_at.elapsed().as_secs(),
            })
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }

    /// Delivers one chunk to every registered listener, evicting those
    /// whose queue is full. Returns the number of evictions.
    fn deliver(&self, chunk: &Bytes) -> usize {
        let mut evicted = Vec::new();
        {
            let mut registry = self.registry.lock();
            for (&id, slot) in registry.listeners.iter_mut() {
                match slot.tx.try_send(chunk.clone()) {
                    Ok(()) => {
                        slot.bytes_sent += chunk.len() as u64;
                        self.counters.add_bytes_out(chunk.len() as u64);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(listener = id, "evicting slow listener: queue full");
                        evicted.push(id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        // Handler already went away; drop our side too
                        evicted.push(id);
                    }
                }
            }
            for id in &evicted {
                registry.listeners.remove(id);
            }
        }

        for _ in &evicted {
            self.counters.listener_disconnected();
        }
        evicted.len()
    }

    /// Drops every listener queue, signalling end-of-stream to all
    /// handlers. Used at shutdown.
    fn close_all(&self) {
        let mut registry = self.registry.lock();
        let count = registry.listeners.len();
        registry.listeners.clear();
        drop(registry);

        for _ in 0..count {
            self.counters.listener_disconnected();
        }
        if count > 0 {
            tracing::info!(count, "closed all listener queues");
        }
    }

    /// Main fan-out loop; runs until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            chunk_size = self.config.chunk_size,
            queue_chunks = self.config.queue_chunks,
            "broadcaster started"
        );
        let mut consecutive_empty: u32 = 0;

        while !*shutdown.borrow() {
            if self.ring.available() >= self.config.chunk_size {
                if let Some(chunk) = self.ring.read(self.config.chunk_size) {
                    self.deliver(&chunk);
                    consecutive_empty = 0;

                    let sleep = self.paced_sleep();
                    tokio::select! {
                        _ = tokio::time::sleep(sleep) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            }

            consecutive_empty = consecutive_empty.saturating_add(1);
            let sleep = if consecutive_empty > EMPTY_READS_BEFORE_IDLE {
                SLEEP_EMPTY
            } else {
                SLEEP_SHORT
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.close_all();
        tracing::info!("broadcaster stopped");
    }

    /// Post-delivery sleep tiered by ring fill.
    fn paced_sleep(&self) -> Duration {
        let fill = self.ring.fill_percent();
        if fill > 0.8 {
            self.config.sleep_high_duration()
        } else if fill > 0.5 {
            self.config.sleep_medium_duration()
        } else {
            self.config.sleep_low_duration()
        }
    }
}
