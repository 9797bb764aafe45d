//! Exponential backoff between connection attempts

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Give up after this many consecutive failures (None = retry forever)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("Gave up after {0} reconnection attempts")]
    MaxAttemptsReached(usize),
}

/// Tracks consecutive failures and the delay before the next attempt
#[derive(Debug)]
pub struct ReconnectManager {
    config: ReconnectConfig,
    attempt: usize,
    next_delay: Duration,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            next_delay: config.initial_backoff.min(config.max_backoff),
            config,
            attempt: 0,
        }
    }

    /// Register a failed attempt and return how long to back off
    pub fn next_backoff(&mut self) -> Result<Duration, ReconnectError> {
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt >= max_attempts {
                return Err(ReconnectError::MaxAttemptsReached(self.attempt));
            }
        }
        self.attempt += 1;

        let delay = self.next_delay;
        // Past the largest Duration the cap applies anyway
        let grown =
            Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.multiplier.max(1.0))
                .unwrap_or(self.config.max_backoff);
        self.next_delay = grown.min(self.config.max_backoff);
        Ok(delay)
    }

    /// Sleep before the next attempt
    pub async fn wait(&mut self) -> Result<(), ReconnectError> {
        let delay = self.next_backoff()?;
        debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Waiting before reconnecting"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Forget past failures (call after a connection was established)
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!("Resetting reconnection backoff");
        }
        self.attempt = 0;
        self.next_delay = self.config.initial_backoff.min(self.config.max_backoff);
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}
