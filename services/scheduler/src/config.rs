use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};

use chime_core::config::{Config, ConfigError};
use chime_domain::key::DEFAULT_HASH_DELIMITER;

/// Scheduler service configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// TCP port to listen on (default 5665). Env var: `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Resync period and dispatch horizon, in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Number of worker tasks draining the ready queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per job, including the first.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout: u64,
    /// Log at `debug` instead of `info` when `RUST_LOG` is unset.
    #[serde(default)]
    pub verbose: bool,
    /// Treat `PUT` on a missing event as `POST`.
    #[serde(default)]
    pub upsert: bool,
    #[serde(default = "default_hash_delimiter")]
    pub hash_delimiter: String,
    /// Keep events that exhausted their retries (otherwise they are deleted).
    #[serde(default = "default_true")]
    pub retain_failed: bool,
    /// IANA zone used for calendar recurrence units.
    #[serde(default = "default_timezone", deserialize_with = "deserialize_zone")]
    pub timezone: Tz,
    #[serde(default = "default_backoff_ms")]
    pub poll_backoff_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub resync_backoff_ms: u64,
    #[serde(default = "default_ready_pop_timeout_secs")]
    pub ready_pop_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL.
    pub redis_url: String,
    #[serde(default = "default_queue_name")]
    pub redis_queue_name: String,
    #[serde(default = "default_ordered_set_name")]
    pub redis_ordered_set_name: String,
}

fn default_port() -> u16 {
    5665
}

fn default_interval() -> u64 {
    60
}

fn default_workers() -> usize {
    5
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_timeout() -> u64 {
    1000
}

fn default_hash_delimiter() -> String {
    DEFAULT_HASH_DELIMITER.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> Tz {
    Tz::UTC
}

const REDIS_RESPONSE_MARGIN: Duration = Duration::from_secs(5);

fn default_backoff_ms() -> u64 {
    1000
}

fn default_ready_pop_timeout_secs() -> u64 {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_queue_name() -> String {
    "scheduler-job-queue".to_owned()
}

fn default_ordered_set_name() -> String {
    "scheduler-job-set".to_owned()
}

fn deserialize_zone<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|e| serde::de::Error::custom(format!("unknown time zone {name:?}: {e}")))
}

impl Config for SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::invalid("INTERVAL", "must be at least 1 second"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("WORKERS", "must be at least 1"));
        }
        if self.retry_count == 0 {
            return Err(ConfigError::invalid("RETRY_COUNT", "must be at least 1"));
        }
        if self.hash_delimiter.is_empty() {
            return Err(ConfigError::invalid("HASH_DELIMITER", "must not be empty"));
        }
        if self.ready_pop_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "READY_POP_TIMEOUT_SECS",
                "must be at least 1 second",
            ));
        }
        if self.redis_queue_name == self.redis_ordered_set_name {
            return Err(ConfigError::invalid(
                "REDIS_QUEUE_NAME",
                "must differ from REDIS_ORDERED_SET_NAME",
            ));
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn horizon(&self) -> TimeDelta {
        i64::try_from(self.interval)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_timeout)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    pub fn resync_backoff(&self) -> Duration {
        Duration::from_millis(self.resync_backoff_ms)
    }

    pub fn ready_pop_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_pop_timeout_secs)
    }

    /// How long a Redis connection waits for a reply. Outlasts the blocking
    /// pop so an idle BLPOP returns nil instead of timing out client-side.
    pub fn redis_response_timeout(&self) -> Duration {
        self.ready_pop_timeout() + REDIS_RESPONSE_MARGIN
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Redis pool size: one blocking connection per worker plus headroom for
    /// the dispatcher, resync loop and request handlers.
    pub fn redis_pool_size(&self) -> usize {
        self.workers + 8
    }

    pub fn default_log_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
