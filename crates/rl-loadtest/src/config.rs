//! Load test configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};
use crate::profile::EndpointFamily;

/// Longest accepted test duration and spawn interval: one year
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Load test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    /// Target base URL
    pub target_url: String,

    /// Virtual users to spawn
    pub users: usize,

    /// Users spawned per second
    pub spawn_rate: f64,

    /// Test duration in seconds, spawn phase included
    pub duration_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Limiter endpoints to exercise
    pub family: EndpointFamily,

    /// Seed for archetype selection and every user's random source
    pub seed: Option<u64>,

    /// Interval between progress log lines, in seconds; 0 disables them
    pub progress_interval_secs: u64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            target_url: "http://localhost:8080".to_string(),
            users: 111,
            spawn_rate: 10.0,
            duration_secs: 300,
            request_timeout_secs: 30,
            family: EndpointFamily::Bucket4j,
            seed: None,
            progress_interval_secs: 10,
        }
    }
}

impl LoadTestConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.target_url.starts_with("http://") || self.target_url.starts_with("https://")) {
            return Err(LoadTestError::InvalidConfig(format!(
                "target URL must start with http:// or https://, got '{}'",
                self.target_url
            )));
        }
        if self.users == 0 {
            return Err(LoadTestError::InvalidConfig("users must be positive".into()));
        }
        if !(self.spawn_rate.is_finite() && self.spawn_rate > 0.0) {
            return Err(LoadTestError::InvalidConfig(format!(
                "spawn rate must be a positive number, got {}",
                self.spawn_rate
            )));
        }
        if 1.0 / self.spawn_rate > MAX_DURATION_SECS as f64 {
            return Err(LoadTestError::InvalidConfig(format!(
                "spawn rate {} is too low: at most {}s between spawns",
                self.spawn_rate, MAX_DURATION_SECS
            )));
        }
        if self.duration_secs == 0 {
            return Err(LoadTestError::InvalidConfig("duration must be positive".into()));
        }
        if self.duration_secs > MAX_DURATION_SECS {
            return Err(LoadTestError::InvalidConfig(format!(
                "duration must be at most {}s, got {}",
                MAX_DURATION_SECS, self.duration_secs
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(LoadTestError::InvalidConfig("request timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.min(MAX_DURATION_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay between two user spawns, capped at [`MAX_DURATION_SECS`]
    pub fn spawn_interval(&self) -> Duration {
        let max = Duration::from_secs(MAX_DURATION_SECS);
        Duration::try_from_secs_f64(1.0 / self.spawn_rate)
            .map_or(max, |interval| interval.min(max))
    }
}
