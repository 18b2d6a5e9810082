//! Listening-socket acquisition with jittered retry on port contention.
//!
//! Binding fails transiently during rolling restarts when the previous process
//! instance has not yet released the port. `AddrInUse` failures are retried
//! forever with a growing, jittered delay; any other bind error is terminal
//! and propagated to the orchestrator.
//!
//! Lifecycle: `Starting → Active` on success, `Starting → WaitingToRetry →
//! Starting` while the port is contended, `Starting → Failed` on any other
//! error. Every transition is logged.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time;
use tracing::{error, info};

/// Jitter added to the retry delay on every port-in-use failure.
const RETRY_JITTER_MIN: Duration = Duration::from_millis(4_000);
const RETRY_JITTER_MAX: Duration = Duration::from_millis(20_000);

/// Once the accumulated delay exceeds this ceiling it wraps to [`RETRY_FLOOR`].
const RETRY_CEILING: Duration = Duration::from_millis(3_600_000);
const RETRY_FLOOR: Duration = Duration::from_millis(60_000);

/// Terminal bind failure: anything other than the port being in use.
#[derive(Debug, Error)]
#[error("failed to bind {addr}: {source}")]
pub struct BindError {
    /// Address the bind was attempted on.
    pub addr: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// Listener lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    WaitingToRetry,
    Active,
    Failed,
}

/// Accumulated retry delay, owned exclusively by the bind loop.
///
/// Starts at zero, grows by a random jitter per port-in-use failure, and wraps
/// to the floor once it passes the ceiling so a long outage never produces a
/// multi-hour wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    delay: Duration,
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Advance after a port-in-use failure and return the next retry delay.
    pub fn advance(&mut self, rng: &mut impl Rng) -> Duration {
        self.delay += rng.gen_range(RETRY_JITTER_MIN..=RETRY_JITTER_MAX);
        if self.delay > RETRY_CEILING {
            self.delay = RETRY_FLOOR;
        }
        self.delay
    }

    /// The delay that would be slept before the next retry.
    pub fn current(&self) -> Duration {
        self.delay
    }
}

/// Classify a bind error: `true` means transient and worth retrying.
fn is_port_in_use(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::AddrInUse
}

/// Bind `addr`, retrying forever while the port is in use.
///
/// Returns the live listener once the bind succeeds. There is no retry cap:
/// the service is expected to eventually win the port or be stopped
/// externally.
///
/// # Errors
///
/// Returns a [`BindError`] on any failure other than `AddrInUse`.
pub async fn bind_with_retry(addr: SocketAddr) -> Result<TcpListener, BindError> {
    let mut backoff = BackoffState::new();
    loop {
        info!(%addr, state = ?ListenerState::Starting, "binding listener");
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(%addr, state = ?ListenerState::Active, "listener bound");
                return Ok(listener);
            }
            Err(e) if is_port_in_use(&e) => {
                let delay = backoff.advance(&mut rand::thread_rng());
                info!(
                    %addr,
                    state = ?ListenerState::WaitingToRetry,
                    retry_in_secs = delay.as_secs(),
                    "port in use, retry scheduled"
                );
                time::sleep(delay).await;
            }
            Err(e) => {
                error!(%addr, state = ?ListenerState::Failed, error = %e, "listener bind failed");
                return Err(BindError { addr, source: e });
            }
        }
    }
}
