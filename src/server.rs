//! Server assembly and lifecycle.
//!
//! [`Server::start`] builds the data plane (ring, mux, producers,
//! broadcaster), binds both ports, and spawns every long-lived task. The
//! returned handle exposes the bound addresses (useful when the configured
//! ports are ephemeral) and a graceful [`shutdown`](Server::shutdown).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::counters::Counters;
use crate::error::ServerError;
use crate::http::{self, AppState};
use crate::metadata::NowPlaying;
use crate::mux::ProducerMux;
use crate::playlist::PlaylistProducer;
use crate::ring::RingBuffer;
use crate::source::{SourceAcceptor, SourceSettings};

/// Bound for task teardown during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running radiocast server.
pub struct Server {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    source_addr: SocketAddr,
    listen_addr: SocketAddr,
    counters: Arc<Counters>,
    ring: Arc<RingBuffer>,
}

impl Server {
    /// Binds both ports, spawns the data plane and the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if either port cannot be bound; the
    /// configuration is assumed to be validated already.
    pub async fn start(config: Config) -> Result<Self, ServerError> {
        let config = Arc::new(config);

        let ring = Arc::new(RingBuffer::new(config.buffer.size_bytes()));
        let counters = Arc::new(Counters::new());
        let now_playing = Arc::new(NowPlaying::new(&config.metadata.station_name));
        let mux = Arc::new(ProducerMux::new(Arc::clone(&ring)));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&ring),
            Arc::clone(&counters),
            config.broadcaster.clone(),
            config.advanced.max_listeners,
        ));

        let source_listener = bind(&config.server.host, config.server.source_port, "source").await?;
        let http_listener = bind(&config.server.host, config.server.listen_port, "listener").await?;
        let source_addr = source_listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                role: "source",
                port: config.server.source_port,
                source,
            })?;
        let listen_addr = http_listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                role: "listener",
                port: config.server.listen_port,
                source,
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let acceptor = Arc::new(SourceAcceptor::new(
            Arc::clone(&mux),
            Arc::clone(&counters),
            Arc::clone(&now_playing),
            SourceSettings {
                password: config.server.source_password.clone(),
                mount_point: config.server.mount_point.clone(),
                timeout: config.advanced.source_timeout_duration(),
            },
        ));
        tasks.push((
            "source acceptor",
            tokio::spawn(acceptor.run(source_listener, shutdown_rx.clone())),
        ));

        let playlist = PlaylistProducer::new(
            Arc::clone(&mux),
            Arc::clone(&counters),
            Arc::clone(&now_playing),
            config.playlist.clone(),
        );
        tasks.push(("playlist producer", tokio::spawn(playlist.run(shutdown_rx.clone()))));

        tasks.push((
            "broadcaster",
            tokio::spawn(Arc::clone(&broadcaster).run(shutdown_rx.clone())),
        ));

        let app = http::router(AppState {
            broadcaster,
            counters: Arc::clone(&counters),
            now_playing,
            ring: Arc::clone(&ring),
            config: Arc::clone(&config),
        });
        let mut http_shutdown = shutdown_rx.clone();
        tasks.push((
            "http server",
            tokio::spawn(async move {
                let result = axum::serve(
                    http_listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    // Already-flipped flag counts as a signal too
                    while !*http_shutdown.borrow() {
                        if http_shutdown.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "http server terminated");
                }
            }),
        ));

        tracing::info!(
            source = %source_addr,
            listener = %listen_addr,
            mount = %config.server.mount_point,
            station = %config.metadata.station_name,
            buffer_mb = config.buffer.size_mb,
            "radiocast ready"
        );

        Ok(Self {
            shutdown_tx,
            tasks,
            source_addr,
            listen_addr,
            counters,
            ring,
        })
    }

    /// Address of the source ingress port.
    pub fn source_addr(&self) -> SocketAddr {
        self.source_addr
    }

    /// Address of the listener/status HTTP port.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Shared counters, for embedding and tests.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// The ring, for embedding and tests.
    pub fn ring(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring)
    }

    /// Signals every task to stop and waits for them, bounded by a
    /// per-task timeout.
    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.tasks {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(task = name, "task did not stop within timeout");
            }
        }
        tracing::info!("server stopped");
    }
}

async fn bind(host: &str, port: u16, role: &'static str) -> Result<TcpListener, ServerError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| ServerError::Bind { role, port, source })
}
