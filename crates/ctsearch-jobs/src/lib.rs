//! # ctsearch-jobs
//!
//! Batch enrichment driver for ctsearch.
//!
//! [`BatchDriver`] pulls records from a [`TrialStore`](ctsearch_core::TrialStore)
//! in bounded batches, tags each one and records the outcome, until a
//! configured maximum is reached or no eligible records remain.

pub mod batch;

pub use batch::{BatchConfig, BatchDriver, BatchEvent, BatchSummary, Selection};
