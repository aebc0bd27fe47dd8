//! Configuration types and loading.
//!
//! The configuration file is TOML with sections mirroring the server's
//! components. Every key has a default, so an empty file (or no file at
//! all) yields a runnable server. Validation is fatal at startup only;
//! nothing here is re-checked once the server is running.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level server configuration.
///
/// Use [`Config::load`] to read and validate a TOML file, or
/// [`Config::default()`] for the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Network addresses, the mount point and the source secret.
    pub server: ServerConfig,
    /// Ring buffer sizing.
    pub buffer: BufferConfig,
    /// Fallback playlist settings.
    pub playlist: PlaylistConfig,
    /// Fan-out chunking and pacing.
    pub broadcaster: BroadcasterConfig,
    /// Station metadata and ICY interleaving.
    pub metadata: MetadataConfig,
    /// Operational knobs.
    pub advanced: AdvancedConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Address both listeners bind to.
    pub host: String,
    /// TCP port accepting ICE/ICY source connections.
    pub source_port: u16,
    /// HTTP port serving listeners and status endpoints.
    pub listen_port: u16,
    /// Shared secret a source must present. The username part of the
    /// Basic credentials is ignored.
    pub source_password: String,
    /// HTTP path the stream is served at.
    pub mount_point: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            source_port: 8000,
            listen_port: 8001,
            source_password: "hackme".to_string(),
            mount_point: "/stream".to_string(),
        }
    }
}

/// `[buffer]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BufferConfig {
    /// Ring capacity in MiB, 1..=1000.
    pub size_mb: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { size_mb: 20 }
    }
}

impl BufferConfig {
    /// Ring capacity in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_mb * 1024 * 1024
    }
}

/// `[playlist]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PlaylistConfig {
    /// Directory scanned for fallback audio files.
    pub directory: PathBuf,
    /// Shuffle the track order once per scan.
    pub shuffle: bool,
    /// File extensions admitted into the playlist (matched
    /// case-insensitively, leading dot included).
    pub extensions: Vec<String>,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./music"),
            shuffle: true,
            extensions: vec![".mp3".to_string(), ".ogg".to_string()],
        }
    }
}

/// `[broadcaster]` section.
///
/// Sleep values are seconds as floats and must satisfy
/// `sleep_high <= sleep_medium <= sleep_low`: the fuller the ring, the less
/// the broadcaster waits between reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BroadcasterConfig {
    /// Bytes read from the ring and delivered per cycle, 1024..=65536.
    pub chunk_size: usize,
    /// Sleep after a delivery while the ring is over 80% full.
    pub sleep_high: f64,
    /// Sleep after a delivery while the ring is 50-80% full.
    pub sleep_medium: f64,
    /// Sleep after a delivery while the ring is under 50% full.
    pub sleep_low: f64,
    /// Per-listener outbound queue capacity in chunks.
    pub queue_chunks: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16384,
            sleep_high: 0.0005,
            sleep_medium: 0.001,
            sleep_low: 0.002,
            queue_chunks: 32,
        }
    }
}

impl BroadcasterConfig {
    /// `sleep_high` as a [`Duration`].
    pub fn sleep_high_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_high)
    }

    /// `sleep_medium` as a [`Duration`].
    pub fn sleep_medium_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_medium)
    }

    /// `sleep_low` as a [`Duration`].
    pub fn sleep_low_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_low)
    }
}

/// `[metadata]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetadataConfig {
    /// Station name advertised in ICY headers and the status page.
    pub station_name: String,
    /// Free-form station description.
    pub station_description: String,
    /// Genre advertised in ICY headers.
    pub station_genre: String,
    /// URL advertised in ICY headers.
    pub station_url: String,
    /// Interleave ICY metadata for clients that opt in.
    pub enable_icy: bool,
    /// Audio bytes between metadata blocks.
    pub icy_metaint: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            station_name: "Radiocast".to_string(),
            station_description: "Internet radio".to_string(),
            station_genre: "Various".to_string(),
            station_url: "http://localhost:8001".to_string(),
            enable_icy: true,
            icy_metaint: 16000,
        }
    }
}

/// `[advanced]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AdvancedConfig {
    /// Maximum concurrent listeners; 0 means unlimited.
    pub max_listeners: usize,
    /// Seconds of source silence before the session is terminated.
    pub source_timeout: f64,
    /// Raise the default log filter from `info` to `debug`.
    pub verbose_logging: bool,
    /// Serve the `/api/stats` endpoint.
    pub enable_stats: bool,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            max_listeners: 0,
            source_timeout: 10.0,
            verbose_logging: false,
            enable_stats: true,
        }
    }
}

impl AdvancedConfig {
    /// `source_timeout` as a [`Duration`].
    pub fn source_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.source_timeout)
    }
}

impl Config {
    /// Loads configuration from a TOML file and validates it.
    ///
    /// A missing file is not an error: the built-in defaults are used.
    /// This function does not log; callers that want to flag the fallback
    /// (as the binary does, once its tracing subscriber is up) should
    /// check for the file themselves. An unreadable or unparsable file,
    /// or a value out of range, is fatal.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Logs advisory conditions that are legal but worth flagging. Called
    /// once at startup, after the tracing subscriber is installed.
    pub fn log_warnings(&self) {
        if self.server.source_password == "hackme" {
            tracing::warn!("using default password 'hackme' - change this in production");
        }
        if !self.playlist.directory.exists() {
            tracing::warn!(
                directory = %self.playlist.directory.display(),
                "playlist directory does not exist"
            );
        }
    }

    /// Validates value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.source_password.is_empty() {
            return Err(ConfigError::invalid("server.source_password is required"));
        }

        if self.server.source_port == 0 {
            return Err(ConfigError::invalid("server.source_port must be nonzero"));
        }
        if self.server.listen_port == 0 {
            return Err(ConfigError::invalid("server.listen_port must be nonzero"));
        }
        if self.server.source_port == self.server.listen_port {
            return Err(ConfigError::invalid(
                "source_port and listen_port must be different",
            ));
        }

        if !self.server.mount_point.starts_with('/') {
            return Err(ConfigError::invalid(format!(
                "server.mount_point must start with '/', got {:?}",
                self.server.mount_point
            )));
        }
        if matches!(
            self.server.mount_point.as_str(),
            "/" | "/api/status" | "/api/stats"
        ) {
            return Err(ConfigError::invalid(format!(
                "server.mount_point {:?} collides with a status route",
                self.server.mount_point
            )));
        }

        if !(1..=1000).contains(&self.buffer.size_mb) {
            return Err(ConfigError::invalid(format!(
                "buffer.size_mb should be between 1 and 1000, got {}",
                self.buffer.size_mb
            )));
        }

        if !(1024..=65536).contains(&self.broadcaster.chunk_size) {
            return Err(ConfigError::invalid(format!(
                "broadcaster.chunk_size should be between 1024 and 65536, got {}",
                self.broadcaster.chunk_size
            )));
        }

        let b = &self.broadcaster;
        if !(b.sleep_high <= b.sleep_medium && b.sleep_medium <= b.sleep_low) {
            return Err(ConfigError::invalid(
                "broadcaster sleeps must satisfy sleep_high <= sleep_medium <= sleep_low",
            ));
        }
        if b.sleep_high < 0.0 {
            return Err(ConfigError::invalid("broadcaster sleeps must be >= 0"));
        }

        if b.queue_chunks == 0 {
            return Err(ConfigError::invalid(
                "broadcaster.queue_chunks must be at least 1",
            ));
        }

        if self.metadata.enable_icy && self.metadata.icy_metaint == 0 {
            return Err(ConfigError::invalid(
                "metadata.icy_metaint must be nonzero when enable_icy is set",
            ));
        }

        if self.advanced.source_timeout <= 0.0 {
            return Err(ConfigError::invalid(
                "advanced.source_timeout must be positive",
            ));
        }

        Ok(())
    }
}
