//! Server configuration.
//!
//! Built from command-line arguments or loaded from a JSON file:
//!
//! ```json
//! {
//!   "address": "0.0.0.0",
//!   "port": 8443,
//!   "threads": 4,
//!   "doc_root": "/srv/www",
//!   "tls": { "cert": "/etc/rtsf/cert.pem", "key": "/etc/rtsf/key.pem" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker thread count must be at least 1")]
    NoThreads,

    #[error("document root {path} is not a directory")]
    DocRoot { path: PathBuf },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// PEM files for the TLS listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Listening endpoint, worker pool size, document root and optional TLS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host name or IP literal to bind (`0.0.0.0`, `::`, `localhost`).
    pub address: String,
    /// Port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// Worker threads for the runtime.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Directory static files are served from.
    pub doc_root: PathBuf,
    #[serde(default)]
    pub tls: Option<TlsFiles>,
}

fn default_threads() -> usize {
    1
}

impl Config {
    /// A plain-HTTP configuration with one worker thread.
    pub fn new(address: impl Into<String>, port: u16, doc_root: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            port,
            threads: default_threads(),
            doc_root: doc_root.into(),
            tls: None,
        }
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enables TLS with the given PEM certificate chain and private key.
    #[must_use]
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsFiles {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the values that cannot be caught while parsing.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoThreads`] or [`ConfigError::DocRoot`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if !self.doc_root.is_dir() {
            return Err(ConfigError::DocRoot {
                path: self.doc_root.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_with_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"address":"::","port":80,"doc_root":"."}"#).unwrap();
        assert_eq!(config, Config::new("::", 80, "."));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_with_tls() {
        let config: Config = serde_json::from_str(
            r#"{"address":"0.0.0.0","port":443,"threads":8,"doc_root":".",
                "tls":{"cert":"c.pem","key":"k.pem"}}"#,
        )
        .unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.tls, Some(TlsFiles { cert: "c.pem".into(), key: "k.pem".into() }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<Config>(
            r#"{"address":"::","port":80,"doc_root":".","thread":4}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn zero_threads_is_invalid() {
        let config = Config::new("127.0.0.1", 0, ".").threads(0);
        assert!(matches!(config.validate(), Err(ConfigError::NoThreads)));
    }

    #[test]
    fn doc_root_must_be_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = Config::new("127.0.0.1", 0, file.path());
        assert!(matches!(config.validate(), Err(ConfigError::DocRoot { .. })));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtsf.json");
        std::fs::write(&path, r#"{"address":"localhost","port":8080,"doc_root":"/srv"}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.address, "localhost");

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(Config::from_json_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
