//! Batch orchestration: group decoded records, drive the engines through the
//! bounded executor, hand derived output to the emission collaborator, and
//! escalate partial failures only after the queue has fully drained.

pub mod coalesce_job;
pub mod frequency_job;

use crate::castflow::model::DerivedRecord;
use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

/// Batch-level failure raised after a run finishes with failed work items.
/// Upstream transports react by redelivering the entire input batch, which
/// is safe because set-merges are idempotent and derived-unit emission is
/// deduplicated per (day, unit).
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{failed} of {total} work items failed; batch must be redelivered")]
    Partial {
        succeeded: usize,
        failed: usize,
        total: usize,
    },
}

/// Downstream emission collaborator. Delivery is fire-and-forget and
/// at-least-once; consumers deduplicate on the record's stable
/// (join key, day) identity.
#[async_trait]
pub trait DerivedSink: Send + Sync {
    async fn deliver(&self, record: DerivedRecord);
}

/// [`DerivedSink`] that buffers records in memory, for tests and local runs.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<DerivedRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything delivered so far.
    pub fn take(&self) -> Vec<DerivedRecord> {
        std::mem::take(&mut self.records.lock().expect("sink lock"))
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("sink lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DerivedSink for CollectingSink {
    async fn deliver(&self, record: DerivedRecord) {
        self.records.lock().expect("sink lock").push(record);
    }
}
