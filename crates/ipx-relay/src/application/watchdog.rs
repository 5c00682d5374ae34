//! Idle and liveness watchdog.
//!
//! The relay is meant to run on demand: it shuts itself down once no client
//! has sent anything for `idle_timeout`, or as soon as an external liveness
//! endpoint stops answering `{"code":200,"alive":true}`.
//!
//! The checks themselves live in [`Watchdog::tick_at`], which takes the
//! current time explicitly so tests can drive it without sleeping.
//! [`Watchdog::run`] is the production loop around it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// The exact body a healthy liveness endpoint returns.
pub const LIVENESS_PAYLOAD: &str = r#"{"code":200,"alive":true}"#;

/// Process-wide record of the most recent inbound frame.
///
/// Times are milliseconds since the clock was created.  Creation itself
/// counts as activity, so a relay nobody ever connects to still idles out.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_activity_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn now_ms(&self) -> u64 {
        saturating_millis(self.origin.elapsed())
    }

    /// Records activity now.
    pub fn touch(&self) {
        self.touch_at(self.now_ms());
    }

    /// Records activity at `ms`.  Never moves the clock backwards.
    pub fn touch_at(&self, ms: u64) {
        self.last_activity_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Milliseconds between the last activity and `now_ms`.
    pub fn idle_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms())
    }
}

/// Whole milliseconds in `d`, clamped to `u64::MAX`.
fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("liveness request failed: {0}")]
    Request(String),
    #[error("could not read liveness response: {0}")]
    Body(String),
    #[error("liveness endpoint answered {body:?}")]
    NotAlive { body: String },
}

/// An external health check.  Any error shuts the relay down.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Why the watchdog asked the process to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Idle { idle_ms: u64 },
    LivenessFailed(ProbeError),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Idle { idle_ms } => {
                write!(f, "no activity for {:.1} minutes", *idle_ms as f64 / 60_000.0)
            }
            ShutdownReason::LivenessFailed(e) => write!(f, "liveness check failed: {e}"),
        }
    }
}

struct LivenessCheck {
    probe: Box<dyn LivenessProbe>,
    interval_ms: u64,
    last_probe_ms: Option<u64>,
}

pub struct Watchdog {
    clock: Arc<ActivityClock>,
    idle_threshold_ms: u64,
    liveness: Option<LivenessCheck>,
}

impl Watchdog {
    pub fn new(clock: Arc<ActivityClock>, idle_threshold: Duration) -> Self {
        Self {
            clock,
            idle_threshold_ms: saturating_millis(idle_threshold),
            liveness: None,
        }
    }

    /// Adds a liveness probe, run at most once per `interval`.
    pub fn with_liveness(mut self, probe: Box<dyn LivenessProbe>, interval: Duration) -> Self {
        self.liveness = Some(LivenessCheck {
            probe,
            interval_ms: saturating_millis(interval),
            last_probe_ms: None,
        });
        self
    }

    /// The idle check alone.  Strictly greater than the threshold trips it.
    pub fn check_idle(&self, now_ms: u64) -> Option<ShutdownReason> {
        let idle_ms = self.clock.idle_for(now_ms);
        (idle_ms > self.idle_threshold_ms).then_some(ShutdownReason::Idle { idle_ms })
    }

    /// Runs both checks as of `now_ms`.  Either one can ask for shutdown; the
    /// idle reason wins when both do.
    pub async fn tick_at(&mut self, now_ms: u64) -> Option<ShutdownReason> {
        let idle = self.check_idle(now_ms);
        let liveness = self.check_liveness(now_ms).await;
        idle.or(liveness)
    }

    async fn check_liveness(&mut self, now_ms: u64) -> Option<ShutdownReason> {
        let check = self.liveness.as_mut()?;
        let due = check
            .last_probe_ms
            .map_or(true, |last| now_ms.saturating_sub(last) > check.interval_ms);
        if !due {
            return None;
        }

        check.last_probe_ms = Some(now_ms);
        match check.probe.check().await {
            Ok(()) => {
                debug!("liveness check passed");
                None
            }
            Err(e) => Some(ShutdownReason::LivenessFailed(e)),
        }
    }

    /// Ticks every `period` until a check fails or `running` is cleared.
    ///
    /// On failure the reason is logged, `running` is cleared so the accept
    /// loop stops, and the reason is returned.
    pub async fn run(mut self, period: Duration, running: Arc<AtomicBool>) -> Option<ShutdownReason> {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            idle_timeout_ms = self.idle_threshold_ms,
            liveness = self.liveness.is_some(),
            "watchdog started"
        );

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(reason) = self.tick_at(self.clock.now_ms()).await {
                warn!("{reason}; shutting down");
                running.store(false, Ordering::Relaxed);
                return Some(reason);
            }
        }
    }
}
