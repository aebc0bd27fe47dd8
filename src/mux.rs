//! Producer arbitration between the live source and the playlist.
//!
//! Exactly one producer may write to the ring at a time. The mux tracks
//! which one that is, clears the ring on every hand-over, and stamps each
//! grant with an epoch so a write issued by a stale producer is rejected
//! instead of landing after the clear. The clear-on-switch rule is what
//! guarantees listeners never receive the tail of one bitstream spliced
//! onto the head of another.
//!
//! Mode changes are published on a watch channel; the playlist producer
//! pauses and resumes by observing it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::ring::RingBuffer;

/// Which producer currently owns the ring write role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// The playlist producer may write (or is idle if the playlist is
    /// empty). This is the initial state.
    Playlist,
    /// An authenticated live source owns the ring.
    Source,
}

/// Result of a guarded write through the mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The bytes were appended to the ring.
    Accepted,
    /// The ring had insufficient space; retry after a pause.
    RingFull,
    /// The caller's grant is stale (the producer role switched). The
    /// caller must stop writing.
    Revoked,
}

struct MuxState {
    mode: ProducerMode,
    epoch: u64,
}

/// Arbitrates the single ring-writer role.
pub struct ProducerMux {
    ring: Arc<RingBuffer>,
    state: Mutex<MuxState>,
    mode_tx: watch::Sender<ProducerMode>,
}

impl ProducerMux {
    /// Creates a mux in `Playlist` mode with epoch 0.
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        let (mode_tx, _) = watch::channel(ProducerMode::Playlist);
        Self {
            ring,
            state: Mutex::new(MuxState {
                mode: ProducerMode::Playlist,
                epoch: 0,
            }),
            mode_tx,
        }
    }

    /// Subscribes to mode changes.
    pub fn subscribe(&self) -> watch::Receiver<ProducerMode> {
        self.mode_tx.subscribe()
    }

    /// The current producer mode.
    pub fn mode(&self) -> ProducerMode {
        self.state.lock().mode
    }

    /// Returns the current write epoch if the playlist owns the ring.
    ///
    /// The playlist producer calls this after observing a switch back to
    /// `Playlist`; writes stamped with the returned epoch stay valid until
    /// the next switch.
    pub fn playlist_grant(&self) -> Option<u64> {
        let state = self.state.lock();
        (state.mode == ProducerMode::Playlist).then_some(state.epoch)
    }

    /// Hands the ring to an authenticated source.
    ///
    /// Clears the ring and revokes any outstanding playlist grant. Fails
    /// when another source is already live (the single-source rule).
    pub fn begin_source(&self) -> Result<u64, SourceBusy> {
        let mut state = self.state.lock();
        if state.mode == ProducerMode::Source {
            return Err(SourceBusy);
        }
        state.mode = ProducerMode::Source;
        state.epoch += 1;
        // Clear under the state lock so a stale playlist write cannot land
        // between the clear and the epoch bump.
        self.ring.clear();
        let epoch = state.epoch;
        drop(state);

        let _ = self.mode_tx.send(ProducerMode::Source);
        tracing::info!("producer switch: playlist -> source");
        Ok(epoch)
    }

    /// Returns the ring to the playlist after a source session ends.
    ///
    /// A stale epoch is ignored, so a late call from an already-replaced
    /// session cannot disturb the current owner.
    pub fn end_source(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.mode != ProducerMode::Source || state.epoch != epoch {
            return;
        }
        state.mode = ProducerMode::Playlist;
        state.epoch += 1;
        self.ring.clear();
        drop(state);

        let _ = self.mode_tx.send(ProducerMode::Playlist);
        tracing::info!("producer switch: source -> playlist");
    }

    /// Ring fill fraction, exposed for producer backoff decisions.
    pub fn ring_fill(&self) -> f64 {
        self.ring.fill_percent()
    }

    /// Writes through the grant identified by `epoch`.
    ///
    /// Held across the state lock so a concurrent switch cannot interleave
    /// a clear between the epoch check and the ring write.
    pub fn write(&self, epoch: u64, data: &[u8]) -> WriteOutcome {
        let state = self.state.lock();
        if state.epoch != epoch {
            return WriteOutcome::Revoked;
        }
        if self.ring.write(data) {
            WriteOutcome::Accepted
        } else {
            WriteOutcome::RingFull
        }
    }
}

/// Returned by [`ProducerMux::begin_source`] when a source is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceBusy;
