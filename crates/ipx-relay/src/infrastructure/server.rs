//! Listener, accept loop and process wiring.
//!
//! [`run_server`] is what `main.rs` calls: it builds the registry, activity
//! clock and relay engine, starts the watchdog, and runs the accept loop of
//! the configured transport until the shared `running` flag is cleared, by
//! Ctrl+C or by the watchdog.
//!
//! The accept loop polls `running` every 200 ms; each accepted connection is
//! served on its own Tokio task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::{ActivityClock, RelayEngine, RoomRegistry, Watchdog};
use crate::domain::{RelayConfig, TransportKind};
use crate::infrastructure::liveness::HttpLivenessProbe;
use crate::infrastructure::{tcp_transport, ws_transport};

const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// A bound listener plus everything needed to serve clients on it.
pub struct RelayServer {
    listener: TcpListener,
    engine: Arc<RelayEngine>,
    config: Arc<RelayConfig>,
}

impl RelayServer {
    /// Binds `config.bind_addr` and prepares to serve clients through `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn bind(config: RelayConfig, engine: Arc<RelayEngine>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| {
                format!(
                    "failed to bind {} listener on {}",
                    config.transport, config.bind_addr
                )
            })?;

        Ok(Self {
            listener,
            engine,
            config: Arc::new(config),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) {
        info!(
            transport = %self.config.transport,
            addr = %self.listener.local_addr().unwrap_or(self.config.bind_addr),
            server_endpoint = %self.engine.server_endpoint(),
            "IPX relay listening"
        );

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    debug!(%peer, "accepted connection");
                    let engine = Arc::clone(&self.engine);
                    let config = Arc::clone(&self.config);
                    let transport = config.transport;
                    tokio::spawn(async move {
                        let result = match transport {
                            TransportKind::WebSocket => {
                                ws_transport::serve_connection(stream, peer, engine, config).await
                            }
                            TransportKind::Tcp => {
                                tcp_transport::serve_connection(stream, peer, engine, config).await
                            }
                        };
                        if let Err(e) = result {
                            warn!(%peer, "connection ended with error: {e:#}");
                        }
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }
    }
}

/// Runs the relay described by `config` until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the liveness probe
/// cannot be created, or the listener cannot be bound.
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    config.validate().context("invalid relay configuration")?;

    let clock = Arc::new(ActivityClock::new());
    let registry = Arc::new(RoomRegistry::new());
    let engine = Arc::new(
        RelayEngine::new(registry, Arc::clone(&clock), config.server_endpoint)
            .context("server endpoint cannot be used in IPX headers")?,
    );

    let mut watchdog = Watchdog::new(clock, config.idle_timeout);
    if let Some(url) = &config.liveness_url {
        let probe = HttpLivenessProbe::new(url.as_str())?;
        info!(url = %probe.url(), interval = ?config.liveness_interval, "liveness probe enabled");
        watchdog = watchdog.with_liveness(Box::new(probe), config.liveness_interval);
    }
    let period = config.watchdog_period;

    let server = RelayServer::bind(config, engine).await?;
    let watchdog_task = tokio::spawn(watchdog.run(period, Arc::clone(&running)));
    server.run(Arc::clone(&running)).await;

    watchdog_task.abort();
    info!("IPX relay stopped");
    Ok(())
}
