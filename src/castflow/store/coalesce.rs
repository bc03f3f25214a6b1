//! Coalescing join engine.
//!
//! One conditional merge against a join key's stored state, plus the pure
//! decision logic that turns the returned previous image and the write we
//! just made into the set of (UTC day, unit) records that became complete on
//! this call — exactly once per unit over the store's lifetime, regardless of
//! whether the payload or the confirmations arrived first, and regardless of
//! how many at-least-once redeliveries repeat the same markers.

use crate::castflow::codec::{
    compress_payload, decode_marker, decompress_payload, extras_to_string, merge_extras,
    parse_extras, utc_day, CodecError,
};
use crate::castflow::model::{
    ConfirmedDownload, ConfirmedImpression, DerivedRecord, DerivedUnit, RedirectPayload,
};
use crate::castflow::store::{DeliveryStore, JoinStateImage, JoinStateWrite, StoreError};
use chrono::NaiveDate;
use log::warn;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// What one merge call wants to write, in typed form.
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    /// Redirect-time payload; written at most logically-once per key.
    pub payload: Option<RedirectPayload>,
    /// Encoded confirmation markers to add to the stored set.
    pub markers: Vec<String>,
    /// Side payload merged into the payload at read time, last-write-wins.
    pub extras: Option<Map<String, Value>>,
}

impl MergeRequest {
    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.markers.is_empty() && self.extras.is_none()
    }
}

/// Coalescing store: the conditional-merge wrapper around an injected store
/// client, with an optional TTL horizon stamped on every write.
pub struct CoalescingStore<S> {
    store: Arc<S>,
    ttl_horizon_secs: Option<i64>,
}

impl<S: DeliveryStore> CoalescingStore<S> {
    pub fn new(store: Arc<S>, ttl_horizon_secs: Option<i64>) -> Self {
        Self {
            store,
            ttl_horizon_secs,
        }
    }

    /// Performs one atomic conditional merge and captures everything needed
    /// to decide what is newly complete.
    pub async fn merge(&self, key: &str, request: MergeRequest) -> Result<UpsertResult, StoreError> {
        let write = JoinStateWrite {
            payload: request
                .payload
                .as_ref()
                .map(compress_payload)
                .transpose()
                .map_err(|e| StoreError::Request {
                    message: e.to_string(),
                })?,
            markers: request.markers.clone(),
            extras: request
                .extras
                .as_ref()
                .map(extras_to_string)
                .transpose()
                .map_err(|e| StoreError::Request {
                    message: e.to_string(),
                })?,
            expiration_s: self.ttl_horizon_secs.map(|h| now_epoch_s() + h),
        };
        let previous = self.store.merge_join_state(key, write).await?;
        Ok(UpsertResult {
            key: key.to_string(),
            previous,
            written: request,
        })
    }
}

/// The previous image alongside what was just written — the only data needed
/// to decide what is new. Created fresh per store call, never persisted.
#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub key: String,
    pub previous: JoinStateImage,
    pub written: MergeRequest,
}

impl UpsertResult {
    /// Derives the (day, unit) records that became complete on this call.
    ///
    /// Candidate markers depend on payload visibility:
    /// - payload already on file: only this call's markers are candidates;
    ///   markers already stored were eligible in the earlier call that had
    ///   the payload, and are treated as already emitted
    /// - payload just arrived: every marker accumulated before the payload
    ///   becomes eligible now, alongside this call's
    /// - still no payload: nothing to emit
    ///
    /// Surviving candidates are deduplicated to at most one per (day, unit),
    /// keeping the numerically smallest epoch-millis, then grouped by day.
    pub fn new_units(&self) -> Result<Vec<DerivedRecord>, StoreError> {
        let old_payload_present = self.previous.payload.is_some();

        let mut candidates: Vec<&str> = Vec::new();
        let mut already_emitted: BTreeSet<(NaiveDate, DerivedUnit)> = BTreeSet::new();
        if old_payload_present {
            candidates.extend(self.written.markers.iter().map(String::as_str));
            for marker in &self.previous.markers {
                if let Some((day, unit, _)) = decode_unit(&self.key, marker) {
                    already_emitted.insert((day, unit));
                }
            }
        } else if self.written.payload.is_some() {
            candidates.extend(self.written.markers.iter().map(String::as_str));
            candidates.extend(self.previous.markers.iter().map(String::as_str));
        } else {
            return Ok(Vec::new());
        }

        // At most one survivor per (day, unit), earliest epoch-millis wins.
        let mut survivors: BTreeMap<(NaiveDate, DerivedUnit), i64> = BTreeMap::new();
        for marker in candidates {
            let Some((day, unit, timestamp_ms)) = decode_unit(&self.key, marker) else {
                continue;
            };
            if already_emitted.contains(&(day, unit.clone())) {
                continue;
            }
            survivors
                .entry((day, unit))
                .and_modify(|ts| *ts = (*ts).min(timestamp_ms))
                .or_insert(timestamp_ms);
        }
        if survivors.is_empty() {
            return Ok(Vec::new());
        }

        let payload = self.merged_payload()?;

        let mut by_day: BTreeMap<NaiveDate, Vec<(DerivedUnit, i64)>> = BTreeMap::new();
        for ((day, unit), timestamp_ms) in survivors {
            by_day.entry(day).or_default().push((unit, timestamp_ms));
        }

        let mut records = Vec::new();
        for (day, units) in by_day {
            let timestamp_ms = units
                .iter()
                .map(|(_, ts)| *ts)
                .min()
                .unwrap_or(payload.timestamp);
            let download = units
                .iter()
                .find(|(unit, _)| *unit == DerivedUnit::Whole)
                .map(|(_, ts)| ConfirmedDownload { timestamp_ms: *ts });
            let impressions: Vec<ConfirmedImpression> = payload
                .impressions
                .iter()
                .filter_map(|planned| {
                    units
                        .iter()
                        .find(|(unit, _)| *unit == DerivedUnit::Segment(planned.segment))
                        .map(|(_, ts)| ConfirmedImpression {
                            timestamp_ms: *ts,
                            planned: planned.clone(),
                        })
                })
                .collect();
            let record = DerivedRecord {
                join_key: self.key.clone(),
                day,
                timestamp_ms,
                payload: payload.clone(),
                download,
                impressions,
            };
            if record.is_emittable() {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The payload as a consumer should see it: the freshest payload bytes
    /// with the freshest extras applied on top.
    fn merged_payload(&self) -> Result<RedirectPayload, StoreError> {
        let mut payload = match &self.written.payload {
            Some(payload) => payload.clone(),
            None => {
                let blob = self
                    .previous
                    .payload
                    .as_ref()
                    .expect("caller checked payload visibility");
                decompress_payload(blob).map_err(|e| self.corrupt(e))?
            }
        };
        if let Some(extras) = &self.written.extras {
            merge_extras(&mut payload, extras);
        } else if let Some(raw) = &self.previous.extras {
            let extras = parse_extras(raw).map_err(|e| self.corrupt(e))?;
            merge_extras(&mut payload, &extras);
        }
        Ok(payload)
    }

    fn corrupt(&self, e: CodecError) -> StoreError {
        StoreError::CorruptPayload {
            key: self.key.clone(),
            reason: e.to_string(),
        }
    }
}

fn decode_unit(key: &str, marker: &str) -> Option<(NaiveDate, DerivedUnit, i64)> {
    let Some(decoded) = decode_marker(marker) else {
        warn!("Skipping undecodable marker '{}' on key '{}'", marker, key);
        return None;
    };
    let Some(day) = utc_day(decoded.timestamp_ms) else {
        warn!(
            "Skipping marker '{}' on key '{}': timestamp outside calendar range",
            marker, key
        );
        return None;
    };
    Some((day, decoded.unit, decoded.timestamp_ms))
}

fn now_epoch_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
