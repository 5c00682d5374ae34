//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from CLI arguments, `IPX_*` environment variables and
//! an optional TOML file; tests build it from [`RelayConfig::default`] and
//! override the fields they care about.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use ipx_core::HEADER_SIZE;
use thiserror::Error;

/// Port the relay listens on when none is configured.
pub const DEFAULT_PORT: u16 = 1900;

/// A configuration value that cannot be used to start the relay.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which transport adapter accepts client connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Binary WebSocket messages, one frame per message, rooms by URL path.
    #[default]
    WebSocket,
    /// Raw TCP byte stream cut into frames by the length field.
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => f.write_str("websocket"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(ConfigError::Invalid {
                field: "transport",
                reason: format!("unknown transport '{other}' (expected websocket or tcp)"),
            }),
        }
    }
}

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use ipx_relay::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 1900);
/// assert_eq!(cfg.server_endpoint.to_string(), "127.0.0.1:1900");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub transport: TransportKind,

    /// Address the listener binds to.
    pub bind_addr: SocketAddr,

    /// The relay's well-known endpoint, reported as the source of every
    /// registration reply. Must be IPv4.
    pub server_endpoint: SocketAddr,

    /// Accepted `Host` header values for WebSocket upgrades. Empty allows all.
    pub allowed_hosts: Vec<String>,

    /// The process shuts down after this long without any inbound frame.
    pub idle_timeout: Duration,

    /// Optional HTTP endpoint whose body must be exactly
    /// `{"code":200,"alive":true}`.
    pub liveness_url: Option<String>,

    pub liveness_interval: Duration,

    /// How often the watchdog evaluates the idle and liveness checks.
    pub watchdog_period: Duration,

    /// Upper bound on a single frame's declared length (TCP transport).
    pub max_frame_len: usize,

    /// Frames queued per connection before further sends are dropped.
    pub outbound_queue: usize,

    /// Tokio worker threads; `0` keeps the runtime default.
    pub workers: usize,

    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl RelayConfig {
    /// The default well-known endpoint for a relay listening on `port`.
    pub fn loopback_endpoint(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    /// Checks the values that would make the relay misbehave at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server_endpoint.is_ipv4() {
            return Err(invalid(
                "server_endpoint",
                format!("{} is not an IPv4 endpoint", self.server_endpoint),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(invalid("idle_timeout", "must be greater than zero".into()));
        }
        if self.watchdog_period.is_zero() {
            return Err(invalid("watchdog_period", "must be greater than zero".into()));
        }
        if self.liveness_url.is_some() && self.liveness_interval.is_zero() {
            return Err(invalid("liveness_interval", "must be greater than zero".into()));
        }
        if self.outbound_queue == 0 {
            return Err(invalid("outbound_queue", "must be at least 1".into()));
        }
        if self.max_frame_len < HEADER_SIZE {
            return Err(invalid(
                "max_frame_len",
                format!("must be at least {HEADER_SIZE} bytes"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

impl Default for RelayConfig {
    /// | Field             | Default            |
    /// |-------------------|--------------------|
    /// | transport         | websocket          |
    /// | bind_addr         | `0.0.0.0:1900`     |
    /// | server_endpoint   | `127.0.0.1:1900`   |
    /// | allowed_hosts     | empty (allow all)  |
    /// | idle_timeout      | 15 minutes         |
    /// | liveness_url      | none               |
    /// | liveness_interval | 5 minutes          |
    /// | watchdog_period   | 60 seconds         |
    /// | max_frame_len     | 65535              |
    /// | outbound_queue    | 256                |
    /// | workers           | 0 (runtime default)|
    /// | log_level         | `info`             |
    fn default() -> Self {
        Self {
            transport: TransportKind::WebSocket,
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            server_endpoint: Self::loopback_endpoint(DEFAULT_PORT),
            allowed_hosts: Vec::new(),
            idle_timeout: Duration::from_secs(15 * 60),
            liveness_url: None,
            liveness_interval: Duration::from_secs(5 * 60),
            watchdog_period: Duration::from_secs(60),
            max_frame_len: u16::MAX as usize,
            outbound_queue: 256,
            workers: 0,
            log_level: "info".to_string(),
        }
    }
}
