//! Exponential backoff policy with jitter and an elapsed-time budget.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// First delay before a retry.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(6);

/// Each delay is drawn from `interval * (1 ± factor)`.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Growth factor applied to the interval after every retry.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Upper bound for the (non-randomized) interval.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Total time budget after which no further retries are scheduled.
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(10 * 60);

/// Parameters of an exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub randomization_factor: f64,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
        }
    }
}

impl BackoffConfig {
    /// Starts a new backoff whose clock begins now.
    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            config: self.clone(),
            current_interval: self.initial_interval,
            started_at: Instant::now(),
        }
    }
}

/// Running backoff state for one logical operation.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_interval: Duration,
    started_at: Instant,
}

impl ExponentialBackoff {
    /// Returns the next delay, or `None` once the elapsed-time budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.elapsed() > self.config.max_elapsed_time {
            return None;
        }

        let delay = randomize(self.current_interval, self.config.randomization_factor);
        self.current_interval = self
            .current_interval
            .mul_f64(self.config.multiplier)
            .min(self.config.max_interval);

        Some(delay)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }

    let secs = interval.as_secs_f64();
    let delta = secs * factor;
    let jittered = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(jittered.max(0.0))
}
