//! Error types for radiocast.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`ServerError`]): prevent the server from starting
//! - **Recoverable conditions**: runtime issues (a source dropping, a slow
//!   listener, an unreadable playlist file) handled locally by the affected
//!   component and surfaced via `tracing`, never across component boundaries

use std::path::PathBuf;

/// Fatal errors that prevent the server from starting.
///
/// Once the server is up, nothing maps to this type: per-file read errors
/// skip the file, per-listener write errors evict the listener, and a source
/// disconnect is a state transition rather than an error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configuration file could not be read or parsed, or a value
    /// failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A TCP listener could not be bound.
    #[error("failed to bind {role} port {port}: {source}")]
    Bind {
        /// Which listener failed ("source" or "listener").
        role: &'static str,
        /// The port that could not be bound.
        port: u16,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// Process exit code for this error, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Bind { .. } => 2,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Unreadable {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or contains unknown keys.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent with another value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = ServerError::Config(ConfigError::invalid("bad"));
        assert_eq!(config.exit_code(), 1);

        let bind = ServerError::Bind {
            role: "source",
            port: 8000,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(bind.exit_code(), 2);
    }

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            role: "listener",
            port: 8001,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("listener"));
        assert!(msg.contains("8001"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("buffer.size_mb should be between 1 and 1000");
        assert!(err.to_string().contains("size_mb"));
    }
}
