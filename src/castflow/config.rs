//! Engine configuration.
//!
//! Layered the usual way: defaults for development, `with_*` builders for
//! tests, environment variables for deployment:
//!
//! ```text
//! export CASTFLOW_TABLE="deliveries-prod"
//! export CASTFLOW_TTL_HORIZON_SECS=7776000
//! export CASTFLOW_WORKER_CONCURRENCY=25
//! export CASTFLOW_FREQUENCY_HORIZON_DAYS=30
//! ```

use std::env;

/// Default bound on outstanding store calls per batch.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 25;

/// Default ceiling on frequency-cap windows, in days.
pub const DEFAULT_FREQUENCY_HORIZON_DAYS: u32 = 30;

/// Knobs shared by both batch orchestrators.
#[derive(Debug, Clone)]
pub struct CoalesceConfig {
    /// Store table holding the join-state and frequency items.
    pub table: String,
    /// When set, every join-state merge stamps `expiration = now + horizon`.
    pub ttl_horizon_secs: Option<i64>,
    /// Bound on concurrently-outstanding store calls.
    pub worker_concurrency: usize,
    /// Global ceiling clamping per-campaign frequency-cap windows.
    pub frequency_horizon_days: u32,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            table: "castflow-deliveries".to_string(),
            ttl_horizon_secs: None,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            frequency_horizon_days: DEFAULT_FREQUENCY_HORIZON_DAYS,
        }
    }
}

impl CoalesceConfig {
    /// Loads configuration from `CASTFLOW_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table: env::var("CASTFLOW_TABLE").unwrap_or(defaults.table),
            ttl_horizon_secs: env::var("CASTFLOW_TTL_HORIZON_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            worker_concurrency: env::var("CASTFLOW_WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.worker_concurrency),
            frequency_horizon_days: env::var("CASTFLOW_FREQUENCY_HORIZON_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.frequency_horizon_days),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_ttl_horizon_secs(mut self, horizon: i64) -> Self {
        self.ttl_horizon_secs = Some(horizon);
        self
    }

    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    pub fn with_frequency_horizon_days(mut self, days: u32) -> Self {
        self.frequency_horizon_days = days;
        self
    }
}
