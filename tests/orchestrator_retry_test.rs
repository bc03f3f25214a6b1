// Whole-batch redelivery safety: a partially failed batch keeps its
// successful store updates and emissions, and a full redelivery fills in
// only what failed, with no duplicate derived records.

use async_trait::async_trait;
use castflow::castflow::config::CoalesceConfig;
use castflow::castflow::model::{
    DeliveryKind, DeliveryRecord, FrequencyKey, RedirectPayload,
};
use castflow::castflow::orchestrator::{coalesce_job, BatchError, CollectingSink};
use castflow::castflow::store::coalesce::CoalescingStore;
use castflow::castflow::store::{
    DeliveryStore, FrequencyImage, JoinStateImage, JoinStateWrite, MemoryStore, StoreError,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Store wrapper that fails merges for a configurable set of keys.
struct FlakyStore {
    inner: MemoryStore,
    failing_keys: Mutex<HashSet<String>>,
}

impl FlakyStore {
    fn new(failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_keys: Mutex::new(failing.into_iter().collect()),
        }
    }

    fn heal(&self) {
        self.failing_keys.lock().unwrap().clear();
    }
}

#[async_trait]
impl DeliveryStore for FlakyStore {
    async fn merge_join_state(
        &self,
        key: &str,
        write: JoinStateWrite,
    ) -> Result<JoinStateImage, StoreError> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(StoreError::Request {
                message: format!("injected failure for '{}'", key),
            });
        }
        self.inner.merge_join_state(key, write).await
    }

    async fn add_impression(
        &self,
        key: &FrequencyKey,
        timestamp_ms: i64,
        expiration_s: i64,
    ) -> Result<FrequencyImage, StoreError> {
        self.inner.add_impression(key, timestamp_ms, expiration_s).await
    }

    async fn remove_impressions(
        &self,
        key: &FrequencyKey,
        timestamps: &[i64],
    ) -> Result<(), StoreError> {
        self.inner.remove_impressions(key, timestamps).await
    }
}

fn payload_for(episode: &str) -> RedirectPayload {
    serde_json::from_value(json!({
        "type": "antebytes",
        "timestamp": 1_700_000_000_000i64,
        "impressions": [{"segment": 0, "adId": format!("ad-{}", episode)}]
    }))
    .unwrap()
}

fn batch_for_episodes(count: usize) -> Vec<DeliveryRecord> {
    let mut records = Vec::new();
    for i in 0..count {
        let episode = format!("le{}", i);
        records.push(DeliveryRecord {
            listener_episode: episode.clone(),
            digest: "d1".to_string(),
            timestamp_ms: 1_700_000_000_000,
            kind: DeliveryKind::Redirect,
            payload: Some(payload_for(&episode)),
            segment: None,
            extras: None,
        });
        records.push(DeliveryRecord {
            listener_episode: episode,
            digest: "d1".to_string(),
            timestamp_ms: 1_700_000_001_000,
            kind: DeliveryKind::SegmentBytes,
            payload: None,
            segment: Some(0),
            extras: None,
        });
    }
    records
}

#[tokio::test]
async fn test_partial_failure_then_full_redelivery() {
    let store = Arc::new(FlakyStore::new(["le2.d1".to_string(), "le6.d1".to_string()]));
    let coalescing = Arc::new(CoalescingStore::new(store.clone(), None));
    let sink = Arc::new(CollectingSink::new());
    let config = CoalesceConfig::default().with_worker_concurrency(4);

    // First run: 8 of 10 keys succeed; the batch still fails as a whole.
    let err = coalesce_job::run(
        coalescing.clone(),
        sink.clone(),
        &config,
        batch_for_episodes(10),
    )
    .await
    .unwrap_err();
    match err {
        BatchError::Partial {
            succeeded,
            failed,
            total,
        } => {
            assert_eq!(succeeded, 8);
            assert_eq!(failed, 2);
            assert_eq!(total, 10);
        }
    }

    let first_emissions = sink.take();
    assert_eq!(first_emissions.len(), 8);
    let first_keys: HashSet<String> = first_emissions.iter().map(|r| r.join_key.clone()).collect();
    assert!(!first_keys.contains("le2.d1"));
    assert!(!first_keys.contains("le6.d1"));

    // Upstream redelivers the entire original batch once the store recovers.
    store.heal();
    let stats = coalesce_job::run(coalescing, sink.clone(), &config, batch_for_episodes(10))
        .await
        .unwrap();
    assert_eq!(stats.succeeded, 10);
    assert_eq!(stats.failed, 0);

    // Only the two previously-failed keys emit; the other 8 are already
    // deduplicated by the (day, unit) protocol.
    let second_emissions = sink.take();
    let second_keys: HashSet<String> =
        second_emissions.iter().map(|r| r.join_key.clone()).collect();
    assert_eq!(
        second_keys,
        HashSet::from(["le2.d1".to_string(), "le6.d1".to_string()])
    );
    assert_eq!(second_emissions.len(), 2);
}

#[tokio::test]
async fn test_malformed_records_drop_without_failing_batch() {
    let store = Arc::new(MemoryStore::new());
    let coalescing = Arc::new(CoalescingStore::new(store.clone(), None));
    let sink = Arc::new(CollectingSink::new());
    let config = CoalesceConfig::default().with_worker_concurrency(2);

    let mut records = batch_for_episodes(1);
    records.push(DeliveryRecord {
        listener_episode: String::new(),
        digest: "d1".to_string(),
        timestamp_ms: 1_700_000_000_000,
        kind: DeliveryKind::Bytes,
        payload: None,
        segment: None,
        extras: None,
    });

    let stats = coalesce_job::run(coalescing, sink.clone(), &config, records)
        .await
        .unwrap();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.keys, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(sink.take().len(), 1);
}
