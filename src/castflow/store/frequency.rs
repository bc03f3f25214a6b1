//! Frequency-cap engine.
//!
//! Each (listener, campaign) pair owns one additive set of impression
//! epoch-millis timestamps with a rolling expiration. Adds are idempotent
//! (same timestamp, same set). Stale entries are swept in batches, and only
//! when staleness dominates the set — one delete call per add would double
//! the write cost for no correctness gain, while the threshold still bounds
//! unbounded growth.

use crate::castflow::model::FrequencyKey;
use crate::castflow::store::{DeliveryStore, FrequencyImage, StoreError};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Eviction never fires for this many stale entries or fewer.
pub const EVICTION_MIN_STALE: usize = 10;

const SECONDS_PER_DAY: i64 = 86_400;

/// Frequency-cap store wrapping an injected store client.
pub struct FrequencyCapStore<S> {
    store: Arc<S>,
}

/// Previous image plus what was just written, for the eviction decision.
#[derive(Debug, Clone)]
pub struct FrequencyUpsert {
    pub key: FrequencyKey,
    pub previous: FrequencyImage,
    pub timestamp_ms: i64,
    pub cap_seconds: i64,
}

impl<S: DeliveryStore> FrequencyCapStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Adds one impression timestamp and resets the item's expiration to the
    /// write's own timestamp plus the cap window.
    pub async fn add_impression(
        &self,
        key: &FrequencyKey,
        timestamp_ms: i64,
        cap_seconds: i64,
    ) -> Result<FrequencyUpsert, StoreError> {
        let expiration_s = timestamp_ms.div_euclid(1_000) + cap_seconds;
        let previous = self
            .store
            .add_impression(key, timestamp_ms, expiration_s)
            .await?;
        Ok(FrequencyUpsert {
            key: key.clone(),
            previous,
            timestamp_ms,
            cap_seconds,
        })
    }

    /// Unconditional set-subtraction of already-swept timestamps.
    pub async fn evict_stale(
        &self,
        key: &FrequencyKey,
        timestamps: &[i64],
    ) -> Result<(), StoreError> {
        self.store.remove_impressions(key, timestamps).await
    }
}

/// Decides whether accumulated stale timestamps justify a sweep.
///
/// Returns the stale entries only when there are strictly more than
/// [`EVICTION_MIN_STALE`] of them and they make up at least half the set;
/// otherwise they stay in place until a future call crosses the threshold.
pub fn compute_eviction(
    previous_timestamps: &BTreeSet<i64>,
    cap_seconds: i64,
    now_ms: i64,
) -> Vec<i64> {
    let cutoff = now_ms - cap_seconds.saturating_mul(1_000);
    let stale: Vec<i64> = previous_timestamps
        .iter()
        .copied()
        .filter(|t| *t <= cutoff)
        .collect();
    if stale.len() > EVICTION_MIN_STALE && stale.len() * 2 >= previous_timestamps.len() {
        stale
    } else {
        Vec::new()
    }
}

/// An impression already older than the cap window on arrival is never
/// added. The exact boundary (`now - capSeconds*1000`) is still current.
pub fn is_stale_on_arrival(timestamp_ms: i64, cap_seconds: i64, now_ms: i64) -> bool {
    timestamp_ms < now_ms - cap_seconds.saturating_mul(1_000)
}

/// Cap window in seconds for a frequency spec.
///
/// The spec string is comma-joined `"N:days"` tokens; the widest token wins,
/// clamped by the configured global horizon ceiling. A spec with no
/// parseable token falls back to the ceiling.
pub fn cap_seconds_for(frequency_spec: &str, horizon_cap_days: u32) -> i64 {
    let max_days = frequency_spec
        .split(',')
        .filter_map(|token| token.split(':').nth(1)?.trim().parse::<u32>().ok())
        .max();
    let days = match max_days {
        Some(days) => days.min(horizon_cap_days),
        None => horizon_cap_days,
    };
    i64::from(days) * SECONDS_PER_DAY
}
