//! End-to-end tests over real sockets.
//!
//! Listeners speak HTTP/1.0 so the body arrives unframed (no chunked
//! transfer encoding) and byte-level assertions stay simple. Playlist
//! fixtures contain the byte pattern `b[i] = (i * 37) % 256` with a length
//! that is a multiple of 256, so the cyclic stream satisfies
//! `next == (cur + 37) % 256` at every position - including the wrap -
//! and any received window can be checked for ordering, duplication and
//! gaps without knowing where in the cycle it started.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use radiocast::{Config, Server};

/// Pattern step for playlist fixtures.
const STEP: u8 = 37;

fn patterned_bytes(len: usize) -> Vec<u8> {
    assert_eq!(len % 256, 0, "length must be a multiple of 256");
    (0..len).map(|i| (i as u8).wrapping_mul(STEP)).collect()
}

fn assert_contiguous(bytes: &[u8]) {
    for (i, pair) in bytes.windows(2).enumerate() {
        assert_eq!(
            pair[1],
            pair[0].wrapping_add(STEP),
            "stream discontinuity at offset {i}"
        );
    }
}

fn test_config(playlist_dir: &Path) -> Config {
    let mut config = Config::default();
    config.server.source_port = 0;
    config.server.listen_port = 0;
    config.server.source_password = "integration-pw".to_string();
    config.buffer.size_mb = 1;
    config.broadcaster.chunk_size = 4096;
    config.playlist.directory = playlist_dir.to_path_buf();
    config.playlist.shuffle = false;
    config
}

async fn http_get(
    addr: std::net::SocketAddr,
    path: &str,
    extra_headers: &str,
) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.0\r\nHost: localhost\r\n{extra_headers}\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

/// Reads until the end of the response head; returns (head, leftover body).
async fn read_head(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).into_owned();
            let body = data[pos + 4..].to_vec();
            return (head, body);
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out reading response head")
            .unwrap();
        assert!(n > 0, "connection closed before response head completed");
        data.extend_from_slice(&buf[..n]);
    }
}

/// Reads body bytes until at least `want` have arrived.
async fn read_at_least(stream: &mut TcpStream, mut body: Vec<u8>, want: usize) -> Vec<u8> {
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(10);
    while body.len() < want {
        assert!(Instant::now() < deadline, "timed out reading stream body");
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert!(n > 0, "stream ended early ({} of {} bytes)", body.len(), want);
        body.extend_from_slice(&buf[..n]);
    }
    body
}

/// Fetches and parses a JSON endpoint.
async fn get_json(addr: std::net::SocketAddr, path: &str) -> serde_json::Value {
    let mut stream = http_get(addr, path, "").await;
    let (_head, mut body) = read_head(&mut stream).await;
    stream.read_to_end(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Polls a JSON endpoint until `predicate` holds or the timeout elapses.
async fn wait_for_json(
    addr: std::net::SocketAddr,
    path: &str,
    timeout: Duration,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let deadline = Instant::now() + timeout;
    loop {
        let value = get_json(addr, path).await;
        if predicate(&value) {
            return value;
        }
        assert!(
            Instant::now() < deadline,
            "condition not reached on {path}; last value: {value}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Opens a source connection and completes the handshake, returning the
/// stream and the server's status line.
async fn connect_source(
    addr: std::net::SocketAddr,
    password: &str,
) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let credentials = general_purpose::STANDARD.encode(format!("source:{password}"));
    let request = format!(
        "SOURCE /stream ICE/1.0\r\n\
         Authorization: Basic {credentials}\r\n\
         Content-Type: audio/mpeg\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for source handshake response")
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]).into_owned();
    (stream, response)
}

#[tokio::test]
async fn test_playlist_streams_to_listener() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let server = Server::start(test_config(dir.path())).await.unwrap();
    let addr = server.listen_addr();

    let connect_at = Instant::now();
    let mut stream = http_get(addr, "/stream", "").await;
    let (head, body) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.0 200"), "unexpected head: {head}");
    assert!(head.to_ascii_lowercase().contains("content-type: audio/mpeg"));

    let body = read_at_least(&mut stream, body, 16384).await;
    assert!(
        connect_at.elapsed() < Duration::from_secs(5),
        "first bytes took too long"
    );
    assert_contiguous(&body);

    // Disconnect; the handler must unregister promptly
    drop(stream);
    wait_for_json(addr, "/api/status", Duration::from_secs(10), |v| {
        v["listeners"] == 0
    })
    .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_two_listeners_get_identical_ordered_bytes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let server = Server::start(test_config(dir.path())).await.unwrap();
    let addr = server.listen_addr();

    let mut a = http_get(addr, "/stream", "").await;
    let (_head, body_a) = read_head(&mut a).await;
    let mut b = http_get(addr, "/stream", "").await;
    let (_head, body_b) = read_head(&mut b).await;

    let body_a = read_at_least(&mut a, body_a, 12288).await;
    let body_b = read_at_least(&mut b, body_b, 12288).await;
    assert_contiguous(&body_a);
    assert_contiguous(&body_b);

    server.shutdown().await;
}

#[tokio::test]
async fn test_source_takeover_feeds_listeners() {
    // Empty playlist: the source is the only producer
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(test_config(dir.path())).await.unwrap();

    let (mut source, response) = connect_source(server.source_addr(), "integration-pw").await;
    assert!(response.starts_with("HTTP/1.0 200"), "unexpected: {response}");

    wait_for_json(
        server.listen_addr(),
        "/api/status",
        Duration::from_secs(5),
        |v| v["source_connected"] == true,
    )
    .await;

    // Feed a recognizable constant pattern
    let feeder = tokio::spawn(async move {
        let chunk = [0xABu8; 4096];
        loop {
            if source.write_all(&chunk).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let mut listener = http_get(server.listen_addr(), "/stream", "").await;
    let (head, body) = read_head(&mut listener).await;
    assert!(head.starts_with("HTTP/1.0 200"));
    let body = read_at_least(&mut listener, body, 8192).await;
    assert!(body.iter().all(|&b| b == 0xAB), "expected source bytes only");

    feeder.abort();
    drop(listener);

    // With the source gone, the mux falls back to playlist mode
    wait_for_json(
        server.listen_addr(),
        "/api/status",
        Duration::from_secs(15),
        |v| v["source_connected"] == false,
    )
    .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_source_rejected_with_403() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(test_config(dir.path())).await.unwrap();

    let (mut first, response) = connect_source(server.source_addr(), "integration-pw").await;
    assert!(response.starts_with("HTTP/1.0 200"));
    // Keep the first source alive with a little data
    first.write_all(&[0u8; 128]).await.unwrap();

    let (_second, response) = connect_source(server.source_addr(), "integration-pw").await;
    assert!(
        response.starts_with("HTTP/1.0 403"),
        "second source should be refused: {response}"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_source_auth_failure_gets_401() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(test_config(dir.path())).await.unwrap();
    let ring = server.ring();

    let (_stream, response) = connect_source(server.source_addr(), "wrong-password").await;
    assert!(response.starts_with("HTTP/1.0 401"), "unexpected: {response}");
    assert!(response.contains("WWW-Authenticate"));

    // No ring mutation, no source flag
    assert_eq!(ring.available(), 0);
    let status = get_json(server.listen_addr(), "/api/status").await;
    assert_eq!(status["source_connected"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_source_request_gets_405() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(test_config(dir.path())).await.unwrap();

    let mut stream = TcpStream::connect(server.source_addr()).await.unwrap();
    stream
        .write_all(b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]).into_owned();
    assert!(response.starts_with("HTTP/1.0 405"), "unexpected: {response}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_slow_listener_evicted_fast_listener_unaffected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(262144)).unwrap();

    let mut config = test_config(dir.path());
    config.broadcaster.chunk_size = 16384;
    config.broadcaster.queue_chunks = 4;
    let server = Server::start(config).await.unwrap();
    let addr = server.listen_addr();

    // Slow listener: completes the request, then never reads again
    let mut slow = http_get(addr, "/stream", "").await;
    let (_head, _body) = read_head(&mut slow).await;

    // Fast listener: drains continuously in the background
    let mut fast = http_get(addr, "/stream", "").await;
    let fast_task = tokio::spawn(async move {
        let (_head, mut total) = read_head(&mut fast).await;
        let mut buf = [0u8; 8192];
        let mut last: Option<u8> = total.last().copied();
        loop {
            match fast.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    // Continuity across every read
                    for &b in &buf[..n] {
                        if let Some(prev) = last {
                            assert_eq!(b, prev.wrapping_add(STEP));
                        }
                        last = Some(b);
                    }
                    total.extend_from_slice(&buf[..n]);
                }
            }
        }
        total.len()
    });

    wait_for_json(addr, "/api/status", Duration::from_secs(30), |v| {
        v["listeners"] == 1
    })
    .await;

    server.shutdown().await;
    let fast_total = fast_task.await.unwrap();
    assert!(fast_total > 0, "fast listener received nothing");
    drop(slow);
}

#[tokio::test]
async fn test_icy_metadata_interleaved_on_request() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let mut config = test_config(dir.path());
    config.metadata.icy_metaint = 8000;
    let server = Server::start(config).await.unwrap();

    let mut stream = http_get(server.listen_addr(), "/stream", "Icy-MetaData: 1\r\n").await;
    let (head, body) = read_head(&mut stream).await;
    let lower = head.to_ascii_lowercase();
    assert!(lower.contains("icy-metaint: 8000"), "missing metaint: {head}");
    assert!(lower.contains("icy-name:"));

    // Pull enough for two metadata boundaries, then strip the blocks and
    // verify the remaining audio is contiguous
    let raw = read_at_least(&mut stream, body, 20000).await;
    let mut audio = Vec::new();
    let mut pos = 0;
    let mut until = 8000usize;
    while pos < raw.len() {
        let take = until.min(raw.len() - pos);
        audio.extend_from_slice(&raw[pos..pos + take]);
        pos += take;
        until -= take;
        if until == 0 {
            if pos >= raw.len() {
                break;
            }
            let units = raw[pos] as usize;
            pos += 1 + units * 16;
            assert!(pos <= raw.len(), "metadata block overran the capture");
            until = 8000;
        }
    }
    assert_contiguous(&audio);

    server.shutdown().await;
}

#[tokio::test]
async fn test_plain_listener_gets_no_icy_headers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let server = Server::start(test_config(dir.path())).await.unwrap();
    let mut stream = http_get(server.listen_addr(), "/stream", "").await;
    let (head, _body) = read_head(&mut stream).await;
    assert!(!head.to_ascii_lowercase().contains("icy-metaint"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_max_listeners_cap_returns_503() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let mut config = test_config(dir.path());
    config.advanced.max_listeners = 1;
    let server = Server::start(config).await.unwrap();
    let addr = server.listen_addr();

    let mut first = http_get(addr, "/stream", "").await;
    let (head, _body) = read_head(&mut first).await;
    assert!(head.starts_with("HTTP/1.0 200"));

    let mut second = http_get(addr, "/stream", "").await;
    let (head, _body) = read_head(&mut second).await;
    assert!(head.starts_with("HTTP/1.0 503"), "expected 503: {head}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_listener_connected_before_file_exists_gets_bytes_after_rescan() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(test_config(dir.path())).await.unwrap();

    // Connect against an idle server: headers arrive, body waits
    let mut stream = http_get(server.listen_addr(), "/stream", "").await;
    let (head, body) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.0 200"));
    assert!(body.is_empty());

    // Drop a file in; the idle rescan should pick it up within its interval
    std::fs::write(dir.path().join("late.mp3"), patterned_bytes(65536)).unwrap();

    let mut buf = [0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(15), stream.read(&mut buf))
        .await
        .expect("no bytes after playlist rescan")
        .unwrap();
    assert!(n > 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_status_page_and_stats_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.metadata.station_name = "Integration FM".to_string();
    let server = Server::start(config).await.unwrap();
    let addr = server.listen_addr();

    let mut stream = http_get(addr, "/", "").await;
    let (head, mut body) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.0 200"));
    stream.read_to_end(&mut body).await.unwrap();
    let page = String::from_utf8_lossy(&body);
    assert!(page.contains("Integration FM"));

    let stats = get_json(addr, "/api/stats").await;
    assert!(stats["totals"]["uptime_seconds"].is_number());
    assert!(stats["buffer"]["fill_percentage"].is_number());
    assert!(stats["listeners"].is_array());

    server.shutdown().await;
}

#[tokio::test]
async fn test_stats_endpoint_respects_disable_flag() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.advanced.enable_stats = false;
    let server = Server::start(config).await.unwrap();

    let mut stream = http_get(server.listen_addr(), "/api/stats", "").await;
    let (head, _body) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.0 403"), "expected 403: {head}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_counters_via_stats() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let server = Server::start(test_config(dir.path())).await.unwrap();
    let addr = server.listen_addr();
    let counters = server.counters();

    let mut listener = http_get(addr, "/stream", "").await;
    let (_head, body) = read_head(&mut listener).await;
    let _body = read_at_least(&mut listener, body, 8192).await;

    let stats = wait_for_json(addr, "/api/stats", Duration::from_secs(10), |v| {
        v["totals"]["bytes_out_total"].as_u64().unwrap_or(0) > 0
    })
    .await;
    assert!(stats["totals"]["bytes_in_total"].as_u64().unwrap() > 0);
    // The listener may already be evicted for not draining, so check the
    // monotonic peak rather than the instantaneous count
    assert_eq!(stats["totals"]["listeners_peak"], 1);
    assert!(counters.bytes_in_total() > 0);

    server.shutdown().await;
}

/// Against an actively producing server, a fresh listener's first payload
/// byte must arrive within a small bound that does not depend on how long
/// the server has been running.
#[tokio::test]
async fn test_time_to_first_byte_bound() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let server = Server::start(test_config(dir.path())).await.unwrap();
    let addr = server.listen_addr();

    // Let the producer and broadcaster reach steady state
    wait_for_json(addr, "/api/stats", Duration::from_secs(10), |v| {
        v["totals"]["bytes_in_total"].as_u64().unwrap_or(0) > 0
    })
    .await;

    for _ in 0..3 {
        let started = Instant::now();
        let mut stream = http_get(addr, "/stream", "").await;
        let (_head, body) = read_head(&mut stream).await;
        let _ = read_at_least(&mut stream, body, 1).await;
        let elapsed = started.elapsed();
        assert!(
            elapsed < Duration::from_secs(2),
            "first byte took {elapsed:?}"
        );
        drop(stream);
    }

    server.shutdown().await;
}

/// Many listeners registered before production starts all receive exactly
/// the same bytes in the same order.
#[tokio::test]
async fn test_fan_out_is_identical_across_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(test_config(dir.path())).await.unwrap();
    let addr = server.listen_addr();

    // Register everyone against an idle server so every queue sees the
    // stream from its first chunk
    let mut streams = Vec::new();
    for _ in 0..20 {
        let mut stream = http_get(addr, "/stream", "").await;
        let (head, body) = read_head(&mut stream).await;
        assert!(head.starts_with("HTTP/1.0 200"));
        assert!(body.is_empty());
        streams.push(stream);
    }

    // Now start production via the idle rescan
    std::fs::write(dir.path().join("track.mp3"), patterned_bytes(65536)).unwrap();

    let mut bodies = Vec::new();
    for mut stream in streams {
        let body = tokio::spawn(async move {
            let body = read_at_least(&mut stream, Vec::new(), 8192).await;
            body[..8192].to_vec()
        });
        bodies.push(body);
    }

    let mut collected = Vec::new();
    for body in bodies {
        collected.push(body.await.unwrap());
    }
    for body in &collected[1..] {
        assert_eq!(body, &collected[0], "listeners diverged");
    }
    assert_contiguous(&collected[0]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_arc_types_are_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Arc<radiocast::Broadcaster>>();
    assert_send_sync::<Arc<radiocast::Counters>>();
    assert_send_sync::<Arc<radiocast::RingBuffer>>();
    assert_send_sync::<Arc<radiocast::ProducerMux>>();
}
