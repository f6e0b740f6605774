//! Collection service configuration.
//!
//! Every duration is serialized in humantime form (`5m`, `2h`, `30d`) and can
//! be overridden from `VIGIL_*` environment variables via
//! [`CollectionConfig::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sidekick::SideKickRetryPolicy;

/// Upper bound accepted for any configured duration (ten years).
const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Configuration for the scheduler, ingestor, and sidekick queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// How long a RUNNING task may go without an update before it is reclaimable.
    #[serde(with = "humantime_serde")]
    pub stale_running_timeout: Duration,

    /// How far behind wall-clock time a ServiceGuard task may start.
    #[serde(with = "humantime_serde")]
    pub catch_up_cutoff: Duration,

    /// Length of each periodic ServiceGuard window.
    #[serde(with = "humantime_serde")]
    pub service_guard_window: Duration,

    /// Delay after a window closes before its collection becomes claimable.
    #[serde(with = "humantime_serde")]
    pub data_collection_delay: Duration,

    /// Failures a Deployment task may retry before it fails terminally.
    pub max_deployment_retries: u32,

    /// First retry backoff.
    #[serde(with = "humantime_serde")]
    pub retry_min_backoff: Duration,

    /// Cap on the exponential retry backoff.
    #[serde(with = "humantime_serde")]
    pub retry_max_backoff: Duration,

    /// Width of a time-series bucket.
    #[serde(with = "humantime_serde")]
    pub bucket_width: Duration,

    /// Maximum tasks handed to one worker in a batch claim.
    pub claim_batch_limit: usize,

    /// Retention stamped on each task as `valid_until`.
    #[serde(with = "humantime_serde")]
    pub task_retention: Duration,

    /// Attempts per sidekick job; `1` disables automatic retry.
    pub sidekick_max_attempts: u32,

    /// Linear backoff between sidekick attempts.
    #[serde(with = "humantime_serde")]
    pub sidekick_retry_backoff: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            stale_running_timeout: Duration::from_secs(5 * 60),
            catch_up_cutoff: Duration::from_secs(2 * 60 * 60),
            service_guard_window: Duration::from_secs(5 * 60),
            data_collection_delay: Duration::from_secs(2 * 60),
            max_deployment_retries: 3,
            retry_min_backoff: Duration::from_secs(10),
            retry_max_backoff: Duration::from_secs(5 * 60),
            bucket_width: Duration::from_secs(5 * 60),
            claim_batch_limit: 5,
            task_retention: Duration::from_secs(30 * 24 * 60 * 60),
            sidekick_max_attempts: 1,
            sidekick_retry_backoff: Duration::from_secs(60),
        }
    }
}

impl CollectionConfig {
    /// Loads configuration from environment variables, starting from defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but malformed, or if the
    /// resulting configuration fails [`CollectionConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_duration("VIGIL_STALE_RUNNING_TIMEOUT")? {
            config.stale_running_timeout = v;
        }
        if let Some(v) = env_duration("VIGIL_CATCH_UP_CUTOFF")? {
            config.catch_up_cutoff = v;
        }
        if let Some(v) = env_duration("VIGIL_SERVICE_GUARD_WINDOW")? {
            config.service_guard_window = v;
        }
        if let Some(v) = env_duration("VIGIL_DATA_COLLECTION_DELAY")? {
            config.data_collection_delay = v;
        }
        if let Some(v) = env_u32("VIGIL_MAX_DEPLOYMENT_RETRIES")? {
            config.max_deployment_retries = v;
        }
        if let Some(v) = env_duration("VIGIL_RETRY_MIN_BACKOFF")? {
            config.retry_min_backoff = v;
        }
        if let Some(v) = env_duration("VIGIL_RETRY_MAX_BACKOFF")? {
            config.retry_max_backoff = v;
        }
        if let Some(v) = env_duration("VIGIL_BUCKET_WIDTH")? {
            config.bucket_width = v;
        }
        if let Some(v) = env_usize("VIGIL_CLAIM_BATCH_LIMIT")? {
            config.claim_batch_limit = v;
        }
        if let Some(v) = env_duration("VIGIL_TASK_RETENTION")? {
            config.task_retention = v;
        }
        if let Some(v) = env_u32("VIGIL_SIDEKICK_MAX_ATTEMPTS")? {
            config.sidekick_max_attempts = v;
        }
        if let Some(v) = env_duration("VIGIL_SIDEKICK_RETRY_BACKOFF")? {
            config.sidekick_retry_backoff = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the services cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("stale_running_timeout", self.stale_running_timeout),
            ("catch_up_cutoff", self.catch_up_cutoff),
            ("service_guard_window", self.service_guard_window),
            ("bucket_width", self.bucket_width),
            ("task_retention", self.task_retention),
        ] {
            if value.is_zero() {
                return Err(Error::configuration(format!("{name} must be non-zero")));
            }
        }
        for (name, value) in [
            ("stale_running_timeout", self.stale_running_timeout),
            ("catch_up_cutoff", self.catch_up_cutoff),
            ("service_guard_window", self.service_guard_window),
            ("data_collection_delay", self.data_collection_delay),
            ("retry_min_backoff", self.retry_min_backoff),
            ("retry_max_backoff", self.retry_max_backoff),
            ("bucket_width", self.bucket_width),
            ("task_retention", self.task_retention),
            ("sidekick_retry_backoff", self.sidekick_retry_backoff),
        ] {
            if value > MAX_CONFIGURED_DURATION {
                return Err(Error::configuration(format!(
                    "{name} must not exceed {}",
                    humantime::format_duration(MAX_CONFIGURED_DURATION)
                )));
            }
        }
        if self.retry_min_backoff > self.retry_max_backoff {
            return Err(Error::configuration(
                "retry_min_backoff must not exceed retry_max_backoff",
            ));
        }
        if self.claim_batch_limit == 0 {
            return Err(Error::configuration("claim_batch_limit must be at least 1"));
        }
        if self.sidekick_max_attempts == 0 {
            return Err(Error::configuration(
                "sidekick_max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Staleness window as a chrono duration.
    #[must_use]
    pub fn stale_running_timeout(&self) -> chrono::Duration {
        to_chrono(self.stale_running_timeout)
    }

    /// Catch-up cutoff as a chrono duration.
    #[must_use]
    pub fn catch_up_cutoff(&self) -> chrono::Duration {
        to_chrono(self.catch_up_cutoff)
    }

    /// ServiceGuard window length as a chrono duration.
    #[must_use]
    pub fn service_guard_window(&self) -> chrono::Duration {
        to_chrono(self.service_guard_window)
    }

    /// Collection delay as a chrono duration.
    #[must_use]
    pub fn data_collection_delay(&self) -> chrono::Duration {
        to_chrono(self.data_collection_delay)
    }

    /// Bucket width as a chrono duration.
    #[must_use]
    pub fn bucket_width(&self) -> chrono::Duration {
        to_chrono(self.bucket_width)
    }

    /// Task retention as a chrono duration.
    #[must_use]
    pub fn task_retention(&self) -> chrono::Duration {
        to_chrono(self.task_retention)
    }

    /// Backoff before the `retry_count`-th retry: `min * 2^(n-1)`, capped at max.
    #[must_use]
    pub fn retry_backoff(&self, retry_count: u32) -> chrono::Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        let backoff = self
            .retry_min_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.retry_max_backoff);
        to_chrono(backoff)
    }

    /// The sidekick retry policy described by this configuration.
    #[must_use]
    pub fn sidekick_retry_policy(&self) -> SideKickRetryPolicy {
        SideKickRetryPolicy {
            max_attempts: self.sidekick_max_attempts,
            backoff: to_chrono(self.sidekick_retry_backoff),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration.min(MAX_CONFIGURED_DURATION))
        .unwrap_or_else(|_| chrono::Duration::zero())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a u32: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a usize: {e}")))
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_duration(name, &v).map(Some)
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        Error::configuration(format!("{name} must be a duration (e.g. 5m, 2h): {e}"))
    })
}
