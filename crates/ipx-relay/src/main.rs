//! IPX relay server: entry point.
//!
//! Lets DOS games running in emulators play IPX network games with each other
//! over the internet.  Clients connect over WebSocket (`/ipx/<room>`) or raw
//! TCP, register to receive an address, and the relay forwards their IPX
//! frames between them.
//!
//! # Usage
//!
//! ```text
//! ipx-relay [OPTIONS]
//!
//! Options:
//!   --config <FILE>              TOML config file
//!   --transport <KIND>           websocket | tcp [default: websocket]
//!   --bind <IP>                  Listener address [default: 0.0.0.0]
//!   --port <PORT>                Listener port [default: 1900]
//!   --server-address <ADDR>      Endpoint reported to clients [default: 127.0.0.1:<port>]
//!   --allowed-hosts <HOSTS>      ';'-separated Host allowlist (WebSocket)
//!   --idle-timeout <MINS>        Shut down after this long idle [default: 15]
//!   --liveness-url <URL>         Shut down when this stops answering alive
//!   --liveness-interval <MINS>   Minutes between liveness checks [default: 5]
//!   --watchdog-period <SECS>     Seconds between watchdog ticks [default: 60]
//!   --max-frame-len <BYTES>      Largest accepted frame [default: 65535]
//!   --outbound-queue <FRAMES>    Per-client send queue [default: 256]
//!   --workers <N>                Runtime worker threads, 0 = default
//!   --log-level <FILTER>         Used when RUST_LOG is unset [default: info]
//! ```
//!
//! # Configuration precedence
//!
//! Command-line flags, then `IPX_*` environment variables (clap merges these
//! two), then the `--config` file, then built-in defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipx_relay::domain::{ConfigError, RelayConfig, TransportKind, DEFAULT_PORT};
use ipx_relay::infrastructure::{run_server, RelayFileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// IPX-over-WebSocket/TCP relay for emulated DOS LAN games.
#[derive(Debug, Default, Parser)]
#[command(name = "ipx-relay", about = "IPX relay for emulated DOS LAN games", version)]
struct Cli {
    /// TOML configuration file; its values sit below flags and env vars.
    #[arg(long, env = "IPX_CONFIG")]
    config: Option<PathBuf>,

    /// Transport clients connect with: `websocket` or `tcp`.
    #[arg(long, env = "IPX_TRANSPORT")]
    transport: Option<TransportKind>,

    /// IP address to bind the listener to.
    #[arg(long, env = "IPX_BIND")]
    bind: Option<String>,

    /// Listener port.
    #[arg(long, env = "IPX_PORT")]
    port: Option<u16>,

    /// Endpoint reported to clients as the relay's own address.
    #[arg(long, env = "IPX_SERVER_ADDRESS")]
    server_address: Option<String>,

    /// `;`-separated list of accepted `Host` headers.  Empty accepts all.
    #[arg(long, env = "IPX_ALLOWED_HOSTS")]
    allowed_hosts: Option<String>,

    /// Minutes without any inbound frame before the relay exits.
    #[arg(long, alias = "timeout", env = "IPX_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// URL that must answer `{"code":200,"alive":true}` for the relay to
    /// keep running.
    #[arg(long, alias = "test", env = "IPX_LIVENESS_URL")]
    liveness_url: Option<String>,

    /// Minutes between liveness checks.
    #[arg(long, env = "IPX_LIVENESS_INTERVAL")]
    liveness_interval: Option<u64>,

    /// Seconds between watchdog ticks.
    #[arg(long, env = "IPX_WATCHDOG_PERIOD")]
    watchdog_period: Option<u64>,

    /// Largest frame a client may send, in bytes.
    #[arg(long, env = "IPX_MAX_FRAME_LEN")]
    max_frame_len: Option<usize>,

    /// Frames buffered per client before further frames are dropped.
    #[arg(long, env = "IPX_OUTBOUND_QUEUE")]
    outbound_queue: Option<usize>,

    /// Tokio worker threads; 0 uses one per CPU core.
    #[arg(long, alias = "loops", env = "IPX_WORKERS")]
    workers: Option<usize>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "IPX_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the `--config` file (if any) and resolves the final configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if a
    /// resolved value is invalid.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let file = match &self.config {
            Some(path) => RelayFileConfig::load(path)
                .with_context(|| format!("cannot load config file {}", path.display()))?,
            None => RelayFileConfig::default(),
        };
        self.resolve(file)
    }

    /// Merges CLI/env values over `file` over [`RelayConfig::default`].
    fn resolve(self, file: RelayFileConfig) -> anyhow::Result<RelayConfig> {
        let defaults = RelayConfig::default();
        let RelayFileConfig {
            network,
            watchdog,
            limits,
            runtime,
        } = file;

        let transport = match self.transport {
            Some(kind) => kind,
            None => match network.transport {
                Some(name) => name.parse().context("invalid transport in config file")?,
                None => defaults.transport,
            },
        };

        let port = self.port.or(network.port).unwrap_or(DEFAULT_PORT);
        let bind = self.bind.or(network.bind_address);
        let bind_ip: IpAddr = match bind {
            Some(ip) => ip
                .parse()
                .with_context(|| format!("invalid bind address: '{ip}'"))?,
            None => defaults.bind_addr.ip(),
        };

        let server_endpoint: SocketAddr = match self.server_address.or(network.server_endpoint) {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("invalid server address: '{addr}'"))?,
            None => RelayConfig::loopback_endpoint(port),
        };

        let allowed_hosts = match self.allowed_hosts {
            Some(list) => split_hosts(&list),
            None => network.allowed_hosts.unwrap_or_default(),
        };

        let idle_timeout = match self.idle_timeout.or(watchdog.idle_timeout_mins) {
            Some(mins) => minutes("idle_timeout", mins)?,
            None => defaults.idle_timeout,
        };
        let liveness_interval = match self
            .liveness_interval
            .or(watchdog.liveness_interval_mins)
        {
            Some(mins) => minutes("liveness_interval", mins)?,
            None => defaults.liveness_interval,
        };

        let config = RelayConfig {
            transport,
            bind_addr: SocketAddr::new(bind_ip, port),
            server_endpoint,
            allowed_hosts,
            idle_timeout,
            liveness_url: self
                .liveness_url
                .or(watchdog.liveness_url)
                .filter(|url| !url.is_empty()),
            liveness_interval,
            watchdog_period: self
                .watchdog_period
                .or(watchdog.period_secs)
                .map_or(defaults.watchdog_period, Duration::from_secs),
            max_frame_len: self
                .max_frame_len
                .or(limits.max_frame_len)
                .unwrap_or(defaults.max_frame_len),
            outbound_queue: self
                .outbound_queue
                .or(limits.outbound_queue)
                .unwrap_or(defaults.outbound_queue),
            workers: self.workers.or(runtime.workers).unwrap_or(defaults.workers),
            log_level: self
                .log_level
                .or(runtime.log_level)
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Converts a minute count into a [`Duration`], refusing counts whose seconds
/// do not fit in a `u64`.
fn minutes(field: &'static str, mins: u64) -> Result<Duration, ConfigError> {
    mins.checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            field,
            reason: format!("{mins} minutes is out of range"),
        })
}

/// Splits a `;`-separated host list, dropping blanks.
fn split_hosts(list: &str) -> Vec<String> {
    list.split(';')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_runtime(workers: usize) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if workers > 0 {
        builder.worker_threads(workers);
    }
    builder
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// The runtime is built by hand rather than with `#[tokio::main]` because the
/// worker count comes from configuration.
fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_relay_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let runtime = build_runtime(config.workers)?;
    runtime.block_on(serve(config))
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    info!(
        transport = %config.transport,
        bind = %config.bind_addr,
        idle_timeout_mins = config.idle_timeout.as_secs() / 60,
        "IPX relay starting"
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
