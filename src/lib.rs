//! # castflow
//!
//! Stream-reconciliation engines for podcast ad-delivery analytics. Castflow
//! ingests two independently-arriving, at-least-once event streams — the
//! redirect decision made at request time, and the later CDN confirmation
//! that bytes were actually downloaded — and coalesces them into exactly one
//! "confirmed delivery" record per UTC day and content segment, using only a
//! networked key-value store's conditional-update primitives. A second engine
//! enforces per-campaign frequency caps with threshold-gated eviction.
//!
//! ## Features
//!
//! - **Coalescing join engine**: order-independent reconciliation of payload
//!   and confirmation events sharing a join key, deduplicated per
//!   (UTC day, segment) unit
//! - **Frequency-cap engine**: rolling-window impression sets with batched,
//!   threshold-gated eviction of stale entries
//! - **Bounded batch executor**: fixed-size pool of asynchronous workers
//!   draining a shared queue, with per-item error classification
//! - **Injected store clients**: the store is a trait, so tests run against
//!   an in-memory backend with identical conditional-update semantics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use castflow::castflow::config::CoalesceConfig;
//! use castflow::castflow::model::{DeliveryKind, DeliveryRecord};
//! use castflow::castflow::orchestrator::coalesce_job;
//! use castflow::castflow::orchestrator::CollectingSink;
//! use castflow::castflow::store::coalesce::CoalescingStore;
//! use castflow::castflow::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoalesceConfig::default();
//!     let store = Arc::new(MemoryStore::new());
//!     let coalescing = Arc::new(CoalescingStore::new(store, config.ttl_horizon_secs));
//!     let sink = Arc::new(CollectingSink::new());
//!
//!     let records: Vec<DeliveryRecord> = vec![/* decoded upstream */];
//!     let stats = coalesce_job::run(coalescing, sink.clone(), &config, records).await?;
//!     println!("coalesced {} keys", stats.succeeded);
//!     Ok(())
//! }
//! ```

pub mod castflow;

// Re-export main API at crate root for easy access
pub use castflow::config::CoalesceConfig;
pub use castflow::executor::{run_batch, BatchRunResult};
pub use castflow::model::{
    ConfirmedDownload, ConfirmedImpression, DeliveryKind, DeliveryRecord, DerivedRecord,
    DerivedUnit, FrequencyKey, ImpressionRecord, PlannedImpression, RedirectPayload,
};
pub use castflow::orchestrator::{BatchError, CollectingSink, DerivedSink};
pub use castflow::store::coalesce::{CoalescingStore, MergeRequest, UpsertResult};
pub use castflow::store::frequency::FrequencyCapStore;
pub use castflow::store::{DeliveryStore, MemoryStore, StoreError};
