//! Coalescing batch orchestrator: one merge per join key per input batch.

use crate::castflow::codec::encode_marker;
use crate::castflow::config::CoalesceConfig;
use crate::castflow::executor::run_batch;
use crate::castflow::model::{DeliveryKind, DeliveryRecord, DerivedUnit};
use crate::castflow::orchestrator::{BatchError, DerivedSink};
use crate::castflow::store::coalesce::{CoalescingStore, MergeRequest};
use crate::castflow::store::DeliveryStore;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Summary of one coalescing batch run.
#[derive(Debug, Clone, Default)]
pub struct CoalesceBatchStats {
    /// Distinct join keys that reached the store layer.
    pub keys: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Malformed records dropped before the store layer.
    pub dropped: usize,
    /// Derived records handed to the sink.
    pub derived: usize,
}

/// Groups the batch by join key, merges each key's accumulated write through
/// the bounded executor, and delivers every newly-derived record to `sink`.
///
/// Returns [`BatchError::Partial`] only after the queue has fully drained,
/// so successful keys keep their store updates and their emissions; the
/// redelivered batch re-merges them idempotently without duplicate output.
pub async fn run<S: DeliveryStore + 'static>(
    coalescing: Arc<CoalescingStore<S>>,
    sink: Arc<dyn DerivedSink>,
    config: &CoalesceConfig,
    records: Vec<DeliveryRecord>,
) -> Result<CoalesceBatchStats, BatchError> {
    let mut stats = CoalesceBatchStats::default();

    let mut requests: HashMap<String, MergeRequest> = HashMap::new();
    for record in records {
        if let Err(reason) = record.validate() {
            stats.dropped += 1;
            warn!(
                "Dropping malformed delivery record ({}): key parts '{}'/'{}'",
                reason, record.listener_episode, record.digest
            );
            continue;
        }
        let request = requests.entry(record.join_key()).or_default();
        match record.kind {
            DeliveryKind::Redirect => {
                request.payload = record.payload;
            }
            DeliveryKind::Bytes => {
                request
                    .markers
                    .push(encode_marker(record.timestamp_ms, &DerivedUnit::Whole));
            }
            DeliveryKind::SegmentBytes => {
                // validate() guarantees the index is present
                if let Some(segment) = record.segment {
                    request.markers.push(encode_marker(
                        record.timestamp_ms,
                        &DerivedUnit::Segment(segment),
                    ));
                }
            }
        }
        if let Some(extras) = record.extras {
            let merged = request.extras.get_or_insert_with(Default::default);
            for (key, value) in extras {
                merged.insert(key, value);
            }
        }
    }

    let items: Vec<(String, MergeRequest)> = requests
        .into_iter()
        .filter(|(_, request)| !request.is_empty())
        .collect();
    stats.keys = items.len();

    let store = coalescing.clone();
    let result = run_batch(
        config.worker_concurrency,
        items,
        move |(key, request): (String, MergeRequest)| {
            let store = store.clone();
            async move {
                let upsert = store.merge(&key, request).await?;
                upsert.new_units()
            }
        },
    )
    .await;

    stats.succeeded = result.succeeded;
    stats.failed = result.failed;
    stats.derived = result.side_effects.len();
    for record in result.side_effects {
        sink.deliver(record).await;
    }

    info!(
        "Coalesce batch finished: {} keys, {} succeeded, {} failed, {} dropped, {} derived",
        stats.keys, stats.succeeded, stats.failed, stats.dropped, stats.derived
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
