//! Frequency-cap batch orchestrator.
//!
//! Impressions for the same (listener, campaign) pair are grouped into one
//! work item so their adds run sequentially on one worker instead of racing
//! each other at the store.

use crate::castflow::config::CoalesceConfig;
use crate::castflow::executor::run_batch;
use crate::castflow::model::{FrequencyKey, ImpressionRecord};
use crate::castflow::orchestrator::BatchError;
use crate::castflow::store::frequency::{
    cap_seconds_for, compute_eviction, is_stale_on_arrival, FrequencyCapStore,
};
use crate::castflow::store::DeliveryStore;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Summary of one frequency batch run.
#[derive(Debug, Clone, Default)]
pub struct FrequencyBatchStats {
    /// Distinct (listener, campaign) pairs that reached the store layer.
    pub keys: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Malformed impressions dropped before the store layer.
    pub dropped: usize,
    /// Impressions already outside their cap window on arrival.
    pub skipped_stale: usize,
    /// Impression timestamps added.
    pub added: usize,
    /// Stale timestamps swept by threshold-gated eviction.
    pub evicted: usize,
}

/// Adds each current impression to its (listener, campaign) set and sweeps
/// stale entries when the eviction threshold is crossed.
///
/// Same caller contract as the coalescing job: the queue drains fully, then
/// [`BatchError::Partial`] asks the transport to redeliver the whole batch.
/// Adds are idempotent, so redelivery is safe.
pub async fn run<S: DeliveryStore + 'static>(
    frequency: Arc<FrequencyCapStore<S>>,
    config: &CoalesceConfig,
    impressions: Vec<ImpressionRecord>,
) -> Result<FrequencyBatchStats, BatchError> {
    let now_ms = now_epoch_ms();
    let horizon_days = config.frequency_horizon_days;
    let mut stats = FrequencyBatchStats::default();

    let mut groups: HashMap<FrequencyKey, Vec<(i64, i64)>> = HashMap::new();
    for impression in impressions {
        if let Err(reason) = impression.validate() {
            stats.dropped += 1;
            warn!(
                "Dropping malformed impression ({}): listener '{}', campaign '{}'",
                reason, impression.listener_id, impression.campaign_id
            );
            continue;
        }
        let cap_seconds = cap_seconds_for(&impression.frequency_spec, horizon_days);
        if is_stale_on_arrival(impression.timestamp_ms, cap_seconds, now_ms) {
            stats.skipped_stale += 1;
            debug!(
                "Skipping stale impression for listener '{}', campaign '{}': {}ms outside cap",
                impression.listener_id, impression.campaign_id, impression.timestamp_ms
            );
            continue;
        }
        groups
            .entry(impression.frequency_key())
            .or_default()
            .push((impression.timestamp_ms, cap_seconds));
    }

    let items: Vec<(FrequencyKey, Vec<(i64, i64)>)> = groups.into_iter().collect();
    stats.keys = items.len();

    let store = frequency.clone();
    let result = run_batch(
        config.worker_concurrency,
        items,
        move |(key, adds): (FrequencyKey, Vec<(i64, i64)>)| {
            let store = store.clone();
            async move {
                let mut counts = Vec::new();
                for (timestamp_ms, cap_seconds) in adds {
                    let upsert = store.add_impression(&key, timestamp_ms, cap_seconds).await?;
                    let stale =
                        compute_eviction(&upsert.previous.impressions, cap_seconds, now_ms);
                    if !stale.is_empty() {
                        store.evict_stale(&key, &stale).await?;
                        counts.push(WorkCounts {
                            added: 1,
                            evicted: stale.len(),
                        });
                    } else {
                        counts.push(WorkCounts {
                            added: 1,
                            evicted: 0,
                        });
                    }
                }
                Ok(counts)
            }
        },
    )
    .await;

    stats.succeeded = result.succeeded;
    stats.failed = result.failed;
    for counts in result.side_effects {
        stats.added += counts.added;
        stats.evicted += counts.evicted;
    }

    info!(
        "Frequency batch finished: {} keys, {} succeeded, {} failed, {} dropped, {} stale-skipped, {} added, {} evicted",
        stats.keys,
        stats.succeeded,
        stats.failed,
        stats.dropped,
        stats.skipped_stale,
        stats.added,
        stats.evicted
    );

    if stats.failed > 0 {
        return Err(BatchError::Partial {
            succeeded: stats.succeeded,
            failed: stats.failed,
            total: stats.keys,
        });
    }
    Ok(stats)
}

#[derive(Debug, Clone, Copy)]
struct WorkCounts {
    added: usize,
    evicted: usize,
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
