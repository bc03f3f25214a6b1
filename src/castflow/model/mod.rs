//! Typed domain records for the delivery-coalescing and frequency-cap
//! pipelines.
//!
//! The transport decoder (out of scope here) hands each pipeline a finite
//! sequence of these records. Records that fail [`DeliveryRecord::validate`]
//! are dropped before they reach the store layer: redelivering a batch would
//! reproduce the same malformed shape, so they never count as batch failures.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a decoded delivery event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Redirect decision made at request time; carries the payload.
    Redirect,
    /// CDN confirmation that the whole file was downloaded.
    Bytes,
    /// CDN confirmation for one ad segment.
    SegmentBytes,
}

/// One decoded event for the coalescing pipeline.
///
/// `listener_episode` and `digest` together form the join key tying a
/// redirect decision to its later byte confirmations. The key is stable for
/// the lifetime of a delivery and never reused across unrelated attempts.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub listener_episode: String,
    pub digest: String,
    pub timestamp_ms: i64,
    pub kind: DeliveryKind,
    /// Present on `Redirect` records.
    pub payload: Option<RedirectPayload>,
    /// Present on `SegmentBytes` records.
    pub segment: Option<u32>,
    /// Optional side payload (segment durations, types) merged into the
    /// stored payload last-write-wins.
    pub extras: Option<Map<String, Value>>,
}

impl DeliveryRecord {
    /// Join key for this record: `listenerEpisode.digest`.
    pub fn join_key(&self) -> String {
        format!("{}.{}", self.listener_episode, self.digest)
    }

    /// Checks the structural requirements for reaching the store layer.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.listener_episode.is_empty() || self.digest.is_empty() {
            return Err("missing join key");
        }
        if self.timestamp_ms <= 0 {
            return Err("missing timestamp");
        }
        match self.kind {
            DeliveryKind::Redirect if self.payload.is_none() => Err("redirect without payload"),
            DeliveryKind::SegmentBytes if self.segment.is_none() => {
                Err("segment confirmation without segment index")
            }
            _ => Ok(()),
        }
    }
}

/// One decoded impression for the frequency-cap pipeline.
#[derive(Debug, Clone)]
pub struct ImpressionRecord {
    pub listener_id: String,
    pub campaign_id: String,
    pub timestamp_ms: i64,
    /// Comma-joined `"N:days"` tokens, e.g. `"1:1,7:30"`.
    pub frequency_spec: String,
}

impl ImpressionRecord {
    pub fn frequency_key(&self) -> FrequencyKey {
        FrequencyKey {
            listener: self.listener_id.clone(),
            campaign: self.campaign_id.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.listener_id.is_empty() || self.campaign_id.is_empty() {
            return Err("missing listener or campaign");
        }
        if self.timestamp_ms <= 0 {
            return Err("missing timestamp");
        }
        Ok(())
    }
}

/// Composite key for one (listener, campaign) frequency set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrequencyKey {
    pub listener: String,
    pub campaign: String,
}

/// Redirect-time context stored (compressed) per join key.
///
/// `kind`, `timestamp`, `download` and `impressions` are the structurally
/// required fields; everything else rides in the passthrough bag and is
/// reproduced verbatim on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impressions: Vec<PlannedImpression>,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

/// One ad decision from the redirect-time fill plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedImpression {
    pub segment: u32,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

/// The granularity at which emission is deduplicated: one unit per
/// (UTC day, segment-or-whole) per join key, at most once over the store's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DerivedUnit {
    /// Whole-file download confirmation.
    Whole,
    /// One ad segment's confirmation.
    Segment(u32),
    /// Non-numeric segment suffix carried through untouched. Never matches a
    /// planned impression, so it can only influence the per-day timestamp.
    Opaque(String),
}

/// Whole-file confirmation carried on a derived record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedDownload {
    pub timestamp_ms: i64,
}

/// A planned impression whose segment was confirmed, stamped with the
/// confirming unit's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedImpression {
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub planned: PlannedImpression,
}

/// One confirmed-delivery record for a (join key, UTC day).
///
/// Handed to the emission collaborator at-least-once; the stable
/// (join key, day) identity lets consumers deduplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRecord {
    pub join_key: String,
    pub day: NaiveDate,
    /// Numeric minimum across the day's newly-derived unit timestamps.
    pub timestamp_ms: i64,
    /// Merged payload with extras applied.
    pub payload: RedirectPayload,
    pub download: Option<ConfirmedDownload>,
    pub impressions: Vec<ConfirmedImpression>,
}

impl DerivedRecord {
    /// A record is worth emitting only if it confirms the whole file or at
    /// least one planned impression.
    pub fn is_emittable(&self) -> bool {
        self.download.is_some() || !self.impressions.is_empty()
    }
}
