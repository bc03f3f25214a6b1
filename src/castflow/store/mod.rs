//! Store abstraction: conditional-update primitives against the networked
//! key-value store, plus an in-memory backend with identical semantics.
//!
//! Every engine above this layer relies on one guarantee: a merge against a
//! single key is atomic (no partial application) and returns the key's
//! previous image. There are no transactions spanning two keys or the two
//! item families, and any worker may touch any key.

pub mod coalesce;
pub mod frequency;

use crate::castflow::model::FrequencyKey;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

/// Store-layer failures.
///
/// `Throttled` is the transient contention path (rate/throughput limit
/// signaled by the store): logged at warning level and eligible for
/// whole-batch redelivery. Everything else logs at error level but follows
/// the same failure/redelivery path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store throughput exceeded: {message}")]
    Throttled { message: String },
    #[error("store request failed: {message}")]
    Request { message: String },
    #[error("stored payload corrupted for '{key}': {reason}")]
    CorruptPayload { key: String, reason: String },
}

impl StoreError {
    /// True only for rate/throughput contention the store may shed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Throttled { .. })
    }
}

/// What one conditional merge writes to a join-state item. Absent fields are
/// left untouched on the stored item.
#[derive(Debug, Clone, Default)]
pub struct JoinStateWrite {
    /// Compressed payload blob; overwrites when present.
    pub payload: Option<Vec<u8>>,
    /// Markers added to the string set; the set only ever grows.
    pub markers: Vec<String>,
    /// Extras JSON; overwrites when present.
    pub extras: Option<String>,
    /// TTL epoch-seconds; set only when a horizon is configured.
    pub expiration_s: Option<i64>,
}

impl JoinStateWrite {
    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.markers.is_empty() && self.extras.is_none()
    }
}

/// The image of a join-state item as it stood before a merge. An absent item
/// yields the default (empty) image: items are created implicitly on first
/// write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinStateImage {
    pub payload: Option<Vec<u8>>,
    pub markers: BTreeSet<String>,
    pub extras: Option<String>,
}

/// Previous image of a frequency item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyImage {
    pub impressions: BTreeSet<i64>,
}

/// Conditional-update primitives the engines are built on.
///
/// Implementations are injected into the orchestrators (no process-wide
/// singleton client), so tests substitute [`MemoryStore`] or a failure-
/// injecting wrapper.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// One atomic merge against a join-state item: overwrite payload and
    /// extras if given, add markers if given, set expiration if given.
    /// Returns the pre-update image.
    async fn merge_join_state(
        &self,
        key: &str,
        write: JoinStateWrite,
    ) -> Result<JoinStateImage, StoreError>;

    /// Adds one impression timestamp to a frequency set and resets the
    /// item's expiration. Returns the pre-update image.
    async fn add_impression(
        &self,
        key: &FrequencyKey,
        timestamp_ms: i64,
        expiration_s: i64,
    ) -> Result<FrequencyImage, StoreError>;

    /// Unconditional set-subtraction of the given timestamps.
    async fn remove_impressions(
        &self,
        key: &FrequencyKey,
        timestamps: &[i64],
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
struct JoinItem {
    payload: Option<Vec<u8>>,
    markers: BTreeSet<String>,
    extras: Option<String>,
    expiration_s: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct FrequencyItem {
    impressions: BTreeSet<i64>,
    expiration_s: i64,
}

/// Snapshot of a stored join-state item, for inspection in tests and local
/// runs.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinItemSnapshot {
    pub payload: Option<Vec<u8>>,
    pub markers: BTreeSet<String>,
    pub extras: Option<String>,
    pub expiration_s: Option<i64>,
}

/// Snapshot of a stored frequency item.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyItemSnapshot {
    pub impressions: BTreeSet<i64>,
    pub expiration_s: i64,
}

/// In-memory [`DeliveryStore`] mirroring the networked store's
/// conditional-update semantics, previous-image returns included.
#[derive(Default)]
pub struct MemoryStore {
    join_items: Mutex<HashMap<String, JoinItem>>,
    frequency_items: Mutex<HashMap<FrequencyKey, FrequencyItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join_snapshot(&self, key: &str) -> Option<JoinItemSnapshot> {
        let items = self.join_items.lock().expect("join items lock");
        items.get(key).map(|item| JoinItemSnapshot {
            payload: item.payload.clone(),
            markers: item.markers.clone(),
            extras: item.extras.clone(),
            expiration_s: item.expiration_s,
        })
    }

    pub fn frequency_snapshot(&self, key: &FrequencyKey) -> Option<FrequencyItemSnapshot> {
        let items = self.frequency_items.lock().expect("frequency items lock");
        items.get(key).map(|item| FrequencyItemSnapshot {
            impressions: item.impressions.clone(),
            expiration_s: item.expiration_s,
        })
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn merge_join_state(
        &self,
        key: &str,
        write: JoinStateWrite,
    ) -> Result<JoinStateImage, StoreError> {
        let mut items = self.join_items.lock().expect("join items lock");
        let item = items.entry(key.to_string()).or_default();
        let previous = JoinStateImage {
            payload: item.payload.clone(),
            markers: item.markers.clone(),
            extras: item.extras.clone(),
        };
        if let Some(payload) = write.payload {
            item.payload = Some(payload);
        }
        for marker in write.markers {
            item.markers.insert(marker);
        }
        if let Some(extras) = write.extras {
            item.extras = Some(extras);
        }
        if let Some(expiration) = write.expiration_s {
            item.expiration_s = Some(expiration);
        }
        Ok(previous)
    }

    async fn add_impression(
        &self,
        key: &FrequencyKey,
        timestamp_ms: i64,
        expiration_s: i64,
    ) -> Result<FrequencyImage, StoreError> {
        let mut items = self.frequency_items.lock().expect("frequency items lock");
        let item = items.entry(key.clone()).or_default();
        let previous = FrequencyImage {
            impressions: item.impressions.clone(),
        };
        item.impressions.insert(timestamp_ms);
        item.expiration_s = expiration_s;
        Ok(previous)
    }

    async fn remove_impressions(
        &self,
        key: &FrequencyKey,
        timestamps: &[i64],
    ) -> Result<(), StoreError> {
        let mut items = self.frequency_items.lock().expect("frequency items lock");
        if let Some(item) = items.get_mut(key) {
            for timestamp in timestamps {
                item.impressions.remove(timestamp);
            }
        }
        Ok(())
    }
}
