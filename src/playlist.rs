//! Playlist fallback producer.
//!
//! When no live source is connected, this task feeds the ring from audio
//! files under the configured directory, cycling forever. The ring's
//! rejection backpressure provides the pacing: a full ring means the
//! broadcaster has not drained yet, so the producer backs off briefly and
//! retries. There is no explicit rate limit.
//!
//! The directory is scanned at startup; while the playlist is empty it is
//! rescanned on an idle interval so files dropped in later start playing
//! without a restart. Filesystem problems are never fatal: a missing
//! directory leaves the producer idle, an unreadable file is skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

use crate::config::PlaylistConfig;
use crate::counters::Counters;
use crate::metadata::NowPlaying;
use crate::mux::{ProducerMode, ProducerMux, WriteOutcome};

/// File read size; ring rejection handles pacing, so this only bounds the
/// granularity of producer switches.
const FILE_CHUNK_SIZE: usize = 8192;

/// How often an empty playlist directory is rescanned.
const RESCAN_INTERVAL: Duration = Duration::from_secs(5);

/// One playable file discovered by the directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Absolute (or scan-relative) path of the audio file.
    pub path: PathBuf,
}

impl Track {
    /// Display name for logs and now-playing metadata.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Enumerates playable files under `directory` whose extension is in the
/// allow-list (case-insensitive). Returns an empty list for a missing or
/// unreadable directory.
pub fn scan_tracks(directory: &Path, extensions: &[String]) -> Vec<Track> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(directory = %directory.display(), error = %e, "playlist scan failed");
            return Vec::new();
        }
    };

    let mut tracks: Vec<Track> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_allowed_extension(path, extensions))
        .map(|path| Track { path })
        .collect();
    // Deterministic order before any shuffle
    tracks.sort_by(|a, b| a.path.cmp(&b.path));
    tracks
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let dotted = format!(".{}", ext.to_ascii_lowercase());
    extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&dotted))
}

/// Parses an ID3v2 header and returns the number of leading bytes to skip
/// (tag size + the 10-byte header), or `None` if `header` is not an ID3v2
/// tag. The size field is four syncsafe bytes (7 bits each).
pub fn id3v2_skip_len(header: &[u8; 10]) -> Option<u64> {
    if &header[..3] != b"ID3" {
        return None;
    }
    let size = ((header[6] & 0x7f) as u64) << 21
        | ((header[7] & 0x7f) as u64) << 14
        | ((header[8] & 0x7f) as u64) << 7
        | (header[9] & 0x7f) as u64;
    Some(size + 10)
}

/// Why a track stopped streaming.
enum TrackEnd {
    /// End of file; advance to the next track.
    Finished,
    /// The write grant was revoked (a source took over).
    Revoked,
    /// Shutdown was signalled.
    Shutdown,
    /// Read error; skip the file.
    Failed,
}

/// The playlist fallback producer task.
pub struct PlaylistProducer {
    mux: Arc<ProducerMux>,
    counters: Arc<Counters>,
    now_playing: Arc<NowPlaying>,
    config: PlaylistConfig,
}

impl PlaylistProducer {
    /// Creates the producer; call [`run`](Self::run) to start feeding.
    pub fn new(
        mux: Arc<ProducerMux>,
        counters: Arc<Counters>,
        now_playing: Arc<NowPlaying>,
        config: PlaylistConfig,
    ) -> Self {
        Self {
            mux,
            counters,
            now_playing,
            config,
        }
    }

    /// Runs until shutdown, feeding the ring whenever the playlist owns it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut mode_rx = self.mux.subscribe();
        let mut tracks = self.load_tracks();
        let mut index = 0usize;

        if tracks.is_empty() {
            tracing::info!("no audio files found in playlist directory");
        } else {
            tracing::info!(count = tracks.len(), "playlist loaded");
        }

        loop {
            if *shutdown.borrow() {
                return;
            }

            // Wait out source ownership
            if *mode_rx.borrow() != ProducerMode::Playlist {
                tokio::select! {
                    _ = mode_rx.changed() => continue,
                    _ = shutdown.changed() => continue,
                }
            }

            if tracks.is_empty() {
                // Idle: rescan periodically so newly added files get picked up
                tokio::select! {
                    _ = tokio::time::sleep(RESCAN_INTERVAL) => {
                        tracks = self.load_tracks();
                        index = 0;
                        if !tracks.is_empty() {
                            tracing::info!(count = tracks.len(), "playlist loaded");
                        }
                    }
                    _ = shutdown.changed() => continue,
                }
                continue;
            }

            let Some(epoch) = self.mux.playlist_grant() else {
                continue;
            };

            let track = tracks[index % tracks.len()].clone();
            index = index.wrapping_add(1);

            match self.stream_track(&track, epoch, &mut shutdown).await {
                TrackEnd::Finished => {}
                TrackEnd::Failed => {
                    // Skip and keep going; the file may have been removed
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                TrackEnd::Revoked => {
                    tracing::info!("live source connected, pausing playlist");
                }
                TrackEnd::Shutdown => return,
            }
        }
    }

    fn load_tracks(&self) -> Vec<Track> {
        let mut tracks = scan_tracks(&self.config.directory, &self.config.extensions);
        if self.config.shuffle {
            tracks.shuffle(&mut rand::thread_rng());
        }
        tracks
    }

    /// Streams one file into the ring through the playlist grant.
    async fn stream_track(
        &self,
        track: &Track,
        epoch: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TrackEnd {
        let mut file = match tokio::fs::File::open(&track.path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %track.path.display(), error = %e, "cannot open track");
                return TrackEnd::Failed;
            }
        };

        if let Err(e) = skip_id3v2(&mut file).await {
            tracing::warn!(path = %track.path.display(), error = %e, "cannot read track header");
            return TrackEnd::Failed;
        }

        let name = track.display_name();
        self.now_playing.set(&name, "Playlist");
        tracing::info!(track = %name, "playing from playlist");

        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        let mut bytes_written: u64 = 0;

        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(path = %track.path.display(), error = %e, "track read error");
                    return TrackEnd::Failed;
                }
            };

            loop {
                match self.mux.write(epoch, &buf[..n]) {
                    WriteOutcome::Accepted => {
                        self.counters.add_bytes_in(n as u64);
                        bytes_written += n as u64;
                        break;
                    }
                    WriteOutcome::Revoked => return TrackEnd::Revoked,
                    WriteOutcome::RingFull => {
                        if *shutdown.borrow() {
                            return TrackEnd::Shutdown;
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(self.backoff()) => {}
                            _ = shutdown.changed() => return TrackEnd::Shutdown,
                        }
                    }
                }
            }
        }

        tracing::info!(track = %name, bytes = bytes_written, "finished track");
        TrackEnd::Finished
    }

    /// Rejected-write backoff, 5-20 ms proportional to ring fill.
    fn backoff(&self) -> Duration {
        Duration::from_millis(5 + (self.mux.ring_fill() * 15.0) as u64)
    }
}

/// Positions `file` past any leading ID3v2 tag.
async fn skip_id3v2(file: &mut tokio::fs::File) -> std::io::Result<()> {
    let mut header = [0u8; 10];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let skip = if filled == header.len() {
        id3v2_skip_len(&header)
    } else {
        None
    };

    match skip {
        Some(offset) => file.seek(std::io::SeekFrom::Start(offset)).await.map(|_| ()),
        None => file.seek(std::io::SeekFrom::Start(0)).await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_scan_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp3", "b.ogg", "c.txt", "d.MP3", "nodot"] {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }

        let extensions = vec![".mp3".to_string(), ".ogg".to_string()];
        let tracks = scan_tracks(dir.path(), &extensions);
        let names: Vec<String> = tracks.iter().map(|t| t.display_name()).collect();
        assert_eq!(names, vec!["a.mp3", "b.ogg", "d.MP3"]);
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let tracks = scan_tracks(Path::new("/nonexistent/music"), &[".mp3".to_string()]);
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_scan_ignores_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub.mp3")).unwrap();
        std::fs::File::create(dir.path().join("real.mp3")).unwrap();

        let tracks = scan_tracks(dir.path(), &[".mp3".to_string()]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].display_name(), "real.mp3");
    }

    #[test]
    fn test_id3v2_skip_len() {
        // Syncsafe 0x00 0x00 0x02 0x01 = 0x101 = 257
        let header = [b'I', b'D', b'3', 4, 0, 0, 0x00, 0x00, 0x02, 0x01];
        assert_eq!(id3v2_skip_len(&header), Some(257 + 10));
    }

    #[test]
    fn test_id3v2_skip_len_not_a_tag() {
        let header = [0xff, 0xfb, 0x90, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(id3v2_skip_len(&header), None);
    }

    #[test]
    fn test_id3v2_syncsafe_ignores_high_bit() {
        let header = [b'I', b'D', b'3', 3, 0, 0, 0xff, 0xff, 0xff, 0xff];
        // Each byte contributes only its low 7 bits
        assert_eq!(id3v2_skip_len(&header), Some(0x0fff_ffff + 10));
    }

    #[tokio::test]
    async fn test_skip_id3v2_positions_past_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.mp3");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            // 16-byte tag body: header declares syncsafe size 16
            f.write_all(&[b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, 16]).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
            f.write_all(b"AUDIO").unwrap();
        }

        let mut file = tokio::fs::File::open(&path).await.unwrap();
        skip_id3v2(&mut file).await.unwrap();
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"AUDIO");
    }

    #[tokio::test]
    async fn test_skip_id3v2_rewinds_untagged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.mp3");
        std::fs::write(&path, b"RAW AUDIO BYTES").unwrap();

        let mut file = tokio::fs::File::open(&path).await.unwrap();
        skip_id3v2(&mut file).await.unwrap();
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"RAW AUDIO BYTES");
    }

    #[tokio::test]
    async fn test_skip_id3v2_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.mp3");
        std::fs::write(&path, b"abc").unwrap();

        let mut file = tokio::fs::File::open(&path).await.unwrap();
        skip_id3v2(&mut file).await.unwrap();
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"abc");
    }

    #[tokio::test]
    async fn test_producer_streams_file_into_ring() {
        use crate::ring::RingBuffer;

        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(dir.path().join("one.mp3"), &payload).unwrap();

        let ring = Arc::new(RingBuffer::new(64 * 1024));
        let mux = Arc::new(ProducerMux::new(Arc::clone(&ring)));
        let counters = Arc::new(Counters::new());
        let now_playing = Arc::new(NowPlaying::new("test"));
        let config = PlaylistConfig {
            directory: dir.path().to_path_buf(),
            shuffle: false,
            extensions: vec![".mp3".to_string()],
        };

        let producer = PlaylistProducer::new(
            Arc::clone(&mux),
            Arc::clone(&counters),
            Arc::clone(&now_playing),
            config,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(producer.run(shutdown_rx));

        // Wait for the first pass of the file to land in the ring
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while ring.available() < payload.len() {
            assert!(tokio::time::Instant::now() < deadline, "producer never fed the ring");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let chunk = ring.read(payload.len()).unwrap();
        assert_eq!(chunk.as_ref(), &payload[..]);
        assert_eq!(now_playing.get().title, "one.mp3");
        assert!(counters.bytes_in_total() >= payload.len() as u64);

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}
