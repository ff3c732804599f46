//! Bounded retry of transient gateway call failures.

mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};

use crate::config::DispatchConfig;

/// How often and how patiently a failed batch call is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per batch, including the first
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: BackoffConfig {
                initial_delay_ms: config.backoff_initial_ms,
                max_delay_ms: config.backoff_max_ms,
                multiplier: config.backoff_multiplier,
                jitter_factor: config.backoff_jitter,
            },
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::with_config(self.backoff.clone())
    }
}
