//! Segment-marker codec.
//!
//! A marker is one confirmed-download event encoded as a string for the
//! store's additive string set: `"<epochMillis>"` for a whole-file
//! confirmation, `"<epochMillis>.<segmentIndex>"` for one ad segment. CDN
//! confirmations repeat, so many markers commonly encode the same
//! (day, segment) unit; deduplication happens downstream at derivation time.

use crate::castflow::model::DerivedUnit;
use chrono::{NaiveDate, TimeZone, Utc};

/// Epoch-millis value of 2000-01-01T00:00:00Z. Timestamps below this are
/// second-resolution and get scaled to millis; at or above, they already are
/// millis. Second-resolution values past this boundary would mean a date
/// after year 31969, which no producer emits.
pub const MILLIS_ERA_FLOOR: i64 = 946_684_800_000;

/// A decoded marker: normalized epoch-millis plus the unit it confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMarker {
    pub timestamp_ms: i64,
    pub unit: DerivedUnit,
}

/// Scales a second-resolution timestamp to millis; leaves millis untouched.
pub fn normalize_epoch_ms(value: i64) -> i64 {
    if value < MILLIS_ERA_FLOOR {
        value.saturating_mul(1_000)
    } else {
        value
    }
}

/// Encodes a confirmation event as a stored marker string.
pub fn encode_marker(timestamp_ms: i64, unit: &DerivedUnit) -> String {
    match unit {
        DerivedUnit::Whole => timestamp_ms.to_string(),
        DerivedUnit::Segment(index) => format!("{}.{}", timestamp_ms, index),
        DerivedUnit::Opaque(raw) => format!("{}.{}", timestamp_ms, raw),
    }
}

/// Decodes a stored marker string.
///
/// Splits on the first `.`; the left side must parse as an integer epoch
/// (seconds or millis, disambiguated by magnitude). A non-numeric right side
/// is carried through as [`DerivedUnit::Opaque`] rather than rejected, since
/// stored sets can outlive the writers that produced them. Returns `None`
/// only when the timestamp itself is unusable.
pub fn decode_marker(raw: &str) -> Option<DecodedMarker> {
    let (left, right) = match raw.split_once('.') {
        Some((l, r)) => (l, Some(r)),
        None => (raw, None),
    };
    let epoch: i64 = left.parse().ok().filter(|v| *v > 0)?;
    let timestamp_ms = normalize_epoch_ms(epoch);
    let unit = match right {
        None => DerivedUnit::Whole,
        Some(r) => match r.parse::<u32>() {
            Ok(index) => DerivedUnit::Segment(index),
            Err(_) => DerivedUnit::Opaque(r.to_string()),
        },
    };
    Some(DecodedMarker { timestamp_ms, unit })
}

/// UTC calendar day for a normalized epoch-millis timestamp.
pub fn utc_day(timestamp_ms: i64) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.date_naive())
}
