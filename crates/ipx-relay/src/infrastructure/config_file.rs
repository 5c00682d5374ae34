//! Optional TOML configuration file.
//!
//! Every key is optional; anything missing falls through to the CLI/env value
//! or the built-in default (see `main.rs` for the precedence).
//!
//! ```toml
//! [network]
//! transport = "websocket"
//! bind_address = "0.0.0.0"
//! port = 1900
//! server_endpoint = "127.0.0.1:1900"
//! allowed_hosts = ["dos.zone", "localhost:8080"]
//!
//! [watchdog]
//! idle_timeout_mins = 15
//! liveness_url = "http://127.0.0.1:8080/alive"
//! liveness_interval_mins = 5
//! period_secs = 60
//!
//! [limits]
//! max_frame_len = 65535
//! outbound_queue = 256
//!
//! [runtime]
//! workers = 4
//! log_level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RelayFileConfig {
    pub network: NetworkSection,
    pub watchdog: WatchdogSection,
    pub limits: LimitsSection,
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    /// `"websocket"` or `"tcp"`.
    pub transport: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub server_endpoint: Option<String>,
    pub allowed_hosts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogSection {
    pub idle_timeout_mins: Option<u64>,
    pub liveness_url: Option<String>,
    pub liveness_interval_mins: Option<u64>,
    pub period_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    pub max_frame_len: Option<usize>,
    pub outbound_queue: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSection {
    pub workers: Option<usize>,
    pub log_level: Option<String>,
}

impl RelayFileConfig {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// - [`ConfigFileError::Io`] if the file cannot be read.
    /// - [`ConfigFileError::Parse`] if the TOML is invalid or has unknown keys.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(text)?)
    }
}
