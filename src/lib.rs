//! # radiocast
//!
//! An Icecast-compatible internet radio server: one live source in, any
//! number of HTTP listeners out, with a local playlist as fallback.
//!
//! ## Architecture
//!
//! ```text
//! Source | Playlist  →  RingBuffer  →  Broadcaster  →  { Listener 1..N }
//! ```
//!
//! - The **ring buffer** is the sole rendezvous between the producer side
//!   and the consumer side: a bounded byte ring with all-or-nothing writes.
//! - The **producer mux** arbitrates which producer owns the ring - an
//!   authenticated live source wins over the playlist - and clears the
//!   ring on every switch so listeners never see spliced bitstreams.
//! - The **broadcaster** reads fixed-size chunks and fans them out to
//!   per-listener bounded queues with non-blocking puts; a listener whose
//!   queue fills is evicted so it cannot stall the rest.
//! - Each **listener** is a first-class tokio task serving one HTTP
//!   response body; the first byte reaches the client as soon as the first
//!   chunk is dequeued, never waiting on an unrelated event.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use radiocast::{Config, Server};
//!
//! let config = Config::load(std::path::Path::new("radiocast.toml"))?;
//! let server = Server::start(config).await?;
//! tokio::signal::ctrl_c().await?;
//! server.shutdown().await;
//! ```

#![warn(missing_docs)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod broadcaster;
pub mod config;
pub mod counters;
mod error;
pub mod http;
mod icy;
pub mod metadata;
pub mod mux;
pub mod playlist;
mod ring;
pub mod server;
pub mod source;

pub use broadcaster::{Broadcaster, ListenerStats};
pub use config::Config;
pub use counters::{Counters, CountersSnapshot};
pub use error::{ConfigError, ServerError};
pub use icy::IcyInterleaver;
pub use metadata::{NowPlaying, TrackInfo};
pub use mux::{ProducerMode, ProducerMux, WriteOutcome};
pub use playlist::{PlaylistProducer, Track};
pub use ring::RingBuffer;
pub use server::Server;
pub use source::{SourceAcceptor, SourceSession, SourceSettings};
