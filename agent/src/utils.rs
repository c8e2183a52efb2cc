//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(exponent);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Consecutive-failure counter driving [`calc_exp_backoff`]
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    options: CooldownOptions,
    failures: u32,
}

impl Backoff {
    pub fn new(options: CooldownOptions) -> Self {
        Self {
            options,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        let delay = calc_exp_backoff(&self.options, self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
