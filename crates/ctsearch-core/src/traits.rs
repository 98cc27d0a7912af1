//! Core traits for the enrichment pipeline seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Result, TagSet, TaggedTrial, TrialInput, TrialRecord};

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Persistence of trial records and their tagging state.
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Records with no processing-state row, at most `limit`.
    async fn find_unprocessed(&self, limit: usize) -> Result<Vec<TrialRecord>>;

    /// Records whose last attempt failed before `attempted_before`.
    async fn find_failed(
        &self,
        limit: usize,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<TrialRecord>>;

    /// Upsert the processing-state row for a record.
    async fn mark_processed(&self, nct_id: &str, success: bool, processing_version: i32)
        -> Result<()>;

    /// Write every tag collection for a record in one transaction.
    async fn save_tags(&self, nct_id: &str, tags: &TagSet) -> Result<()>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for single-prompt text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a user prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Turns a trial into structured tags.
///
/// An unusable model answer is returned as a [`TaggedTrial`] carrying an
/// error; `Err` is reserved for service or transport failures.
#[async_trait]
pub trait TrialTagger: Send + Sync {
    async fn generate_tags(&self, input: &TrialInput) -> Result<TaggedTrial>;
}
