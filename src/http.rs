//! Listener egress: the mount-point stream handler and the status pages.
//!
//! Each listener is a first-class task of the HTTP runtime: the handler
//! registers a bounded queue with the broadcaster and hands axum a body
//! stream over that queue. The first chunk is written to the socket the
//! moment it is dequeued - there is no prebuffering delay and no dependency
//! on any event other than the chunk's arrival. A guard unregisters the
//! listener on every exit path (client close, write error, eviction,
//! shutdown).

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::broadcaster::{Broadcaster, ListenerStats};
use crate::config::Config;
use crate::counters::Counters;
use crate::icy::IcyInterleaver;
use crate::metadata::{NowPlaying, TrackInfo};
use crate::ring::RingBuffer;

/// Boxed byte stream used for the audio response body.
type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Fan-out hub listeners register with.
    pub broadcaster: Arc<Broadcaster>,
    /// Exported counters backing the status endpoints.
    pub counters: Arc<Counters>,
    /// Now-playing metadata.
    pub now_playing: Arc<NowPlaying>,
    /// Ring handle for fill reporting.
    pub ring: Arc<RingBuffer>,
    /// Full server configuration.
    pub config: Arc<Config>,
}

/// Builds the listener-port router: the stream mount plus status pages.
pub fn router(state: AppState) -> Router {
    let mount_point = state.config.server.mount_point.clone();
    Router::new()
        .route("/", get(status_page))
        .route("/api/status", get(api_status))
        .route("/api/stats", get(api_stats))
        .route(&mount_point, get(stream))
        .with_state(state)
}

/// Unregisters a listener when its body stream is dropped, however the
/// connection ended.
struct ListenerGuard {
    broadcaster: Arc<Broadcaster>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
    }
}

/// `GET <mount_point>` - the audio stream.
async fn stream(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some((id, rx)) = state.broadcaster.register(addr) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "listener limit reached").into_response();
    };

    let guard = ListenerGuard {
        broadcaster: Arc::clone(&state.broadcaster),
        id,
    };

    let metadata = &state.config.metadata;
    let wants_icy = metadata.enable_icy
        && headers
            .get("icy-metadata")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "1")
            .unwrap_or(false);

    let chunks = ReceiverStream::new(rx);
    let body: AudioStream = if wants_icy {
        let mut interleaver = IcyInterleaver::new(metadata.icy_metaint);
        let now_playing = Arc::clone(&state.now_playing);
        Box::pin(chunks.map(move |chunk| {
            let _ = &guard;
            Ok::<_, std::io::Error>(interleaver.interleave(&chunk, &now_playing.stream_title()))
        }))
    } else {
        Box::pin(chunks.map(move |chunk| {
            let _ = &guard;
            Ok::<_, std::io::Error>(chunk)
        }))
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::PRAGMA, "no-cache")
        .header(header::ACCEPT_RANGES, "none");

    if wants_icy {
        builder = builder.header("icy-metaint", metadata.icy_metaint.to_string());
        // Station metadata is operator-supplied; skip values that are not
        // legal header text rather than failing the whole response
        for (name, value) in [
            ("icy-name", metadata.station_name.as_str()),
            ("icy-genre", metadata.station_genre.as_str()),
            ("icy-url", metadata.station_url.as_str()),
        ] {
            match header::HeaderValue::from_str(value) {
                Ok(value) => builder = builder.header(name, value),
                Err(_) => tracing::warn!(header = name, "station metadata is not valid header text"),
            }
        }
    }

    match builder.body(Body::from_stream(body)) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Payload of `GET /api/status`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    source_connected: bool,
    source_status: &'static str,
    metadata: TrackInfo,
    listeners: u64,
    uptime_seconds: u64,
    uptime_formatted: String,
    station_name: String,
    station_genre: String,
}

fn format_uptime(seconds: u64) -> String {
    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
}

/// `GET /api/status` - summary for the status page poller.
async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let source_connected = state.counters.source_connected();
    let uptime = state.counters.uptime_seconds();

    Json(StatusResponse {
        source_connected,
        source_status: if source_connected {
            "Connected"
        } else {
            "Playlist Fallback"
        },
        metadata: state.now_playing.get(),
        listeners: state.counters.listeners_current(),
        uptime_seconds: uptime,
        uptime_formatted: format_uptime(uptime),
        station_name: state.config.metadata.station_name.clone(),
        station_genre: state.config.metadata.station_genre.clone(),
    })
}

/// Payload of `GET /api/stats`.
#[derive(Debug, Serialize)]
struct StatsResponse {
    totals: crate::counters::CountersSnapshot,
    listeners: Vec<ListenerStats>,
    buffer: BufferStats,
}

#[derive(Debug, Serialize)]
struct BufferStats {
    available: usize,
    space: usize,
    fill_percentage: f64,
}

/// `GET /api/stats` - detailed statistics, `403` when disabled.
async fn api_stats(State(state): State<AppState>) -> Response {
    if !state.config.advanced.enable_stats {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "Stats disabled" })),
        )
            .into_response();
    }

    let stats = StatsResponse {
        totals: state.counters.snapshot(&state.ring),
        listeners: state.broadcaster.listener_stats(),
        buffer: BufferStats {
            available: state.ring.available(),
            space: state.ring.space(),
            fill_percentage: state.ring.fill_percent() * 100.0,
        },
    };
    Json(stats).into_response()
}

/// `GET /` - a small human-readable status page.
async fn status_page(State(state): State<AppState>) -> Html<String> {
    let metadata = state.now_playing.get();
    let source_connected = state.counters.source_connected();
    let config = &state.config.metadata;

    let page = format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{name}</title>\n\
         <style>\n\
         body {{ font-family: sans-serif; max-width: 40em; margin: 3em auto; }}\n\
         dt {{ font-weight: bold; margin-top: 0.7em; }}\n\
         </style>\n\
         </head>\n\
         <body>\n\
         <h1>{name}</h1>\n\
         <p>{description}</p>\n\
         <dl>\n\
         <dt>Status</dt><dd>{status}</dd>\n\
         <dt>Now playing</dt><dd>{title}</dd>\n\
         <dt>Listeners</dt><dd>{listeners}</dd>\n\
         <dt>Uptime</dt><dd>{uptime}</dd>\n\
         </dl>\n\
         <p><a href=\"{mount}\">Listen</a> &middot; <a href=\"/api/status\">Status JSON</a></p>\n\
         </body>\n\
         </html>\n",
        name = escape_html(&config.station_name),
        description = escape_html(&config.station_description),
        status = if source_connected {
            "Live source"
        } else {
            "Playlist fallback"
        },
        title = escape_html(&metadata.stream_title()),
        listeners = state.counters.listeners_current(),
        uptime = format_uptime(state.counters.uptime_seconds()),
        mount = escape_html(&state.config.server.mount_point),
    );
    Html(page)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
