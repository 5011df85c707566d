//! Bounded polling with backoff.
//!
//! Used to wait for the provider to finish processing an uploaded document.
//! The check runs first without delay; between checks the routine sleeps for
//! the current interval, growing it by `multiplier` up to `max_interval`. The
//! total wait never exceeds `timeout`.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SyncConfig;

/// Polling schedule.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Growth factor applied after each check. `1.0` keeps the interval fixed.
    pub multiplier: f64,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            multiplier: 1.0,
            max_interval: interval,
            timeout,
        }
    }
}

impl From<&SyncConfig> for PollConfig {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            interval: cfg.poll_interval(),
            multiplier: cfg.poll_backoff,
            max_interval: cfg.max_poll_interval(),
            timeout: cfg.processing_timeout(),
        }
    }
}

/// Delay before check number `attempt + 1`.
pub fn calculate_backoff(attempt: usize, config: &PollConfig) -> Duration {
    let base = config.interval.as_millis() as f64;
    let cap = (config.max_interval.as_millis() as f64).max(base);
    let exp = attempt.min(64) as i32;
    let grown = (base * config.multiplier.max(1.0).powi(exp)).min(cap);
    Duration::from_millis(grown.round() as u64)
}

/// Outcome of a single check.
#[derive(Debug)]
pub enum PollStatus<T> {
    Done(T),
    Pending,
}

#[derive(Debug)]
pub enum PollError<E> {
    TimedOut { waited: Duration },
    Failed(E),
}

/// Run `check` until it reports [`PollStatus::Done`], fails, or the timeout
/// elapses.
pub async fn poll_until<T, E, F, Fut>(config: &PollConfig, mut check: F) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, E>>,
{
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut attempt = 0usize;

    loop {
        match check().await.map_err(PollError::Failed)? {
            PollStatus::Done(value) => return Ok(value),
            PollStatus::Pending => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut {
                waited: now - started,
            });
        }

        let delay = calculate_backoff(attempt, config).min(deadline - now);
        tracing::trace!(attempt, ?delay, "still pending");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
