//! Centralized default constants for ctsearch.
//!
//! All crates and the CLI reference these constants instead of defining
//! their own magic numbers.

// =============================================================================
// BATCH PROCESSING
// =============================================================================

/// Records pulled from the store per round.
pub const BATCH_SIZE: usize = 5;

/// Concurrent tagging calls within one batch. 1 means strictly sequential.
pub const BATCH_CONCURRENCY: usize = 1;

/// Revision of the tagging algorithm written to `processed_trials`.
pub const PROCESSING_VERSION: i32 = 1;

// =============================================================================
// TAGGING
// =============================================================================

/// Lowest relevance score a tag can carry.
pub const RELEVANCE_MIN: i16 = 1;

/// Highest relevance score a tag can carry.
pub const RELEVANCE_MAX: i16 = 5;

/// Relevance assigned to condition and mechanism tags the model lists
/// without a score.
pub const DEFAULT_RELEVANCE: i16 = 5;

/// Disease stages pre-registered in `ctsearch.disease_stages`.
pub const DISEASE_STAGES: [&str; 3] = ["early", "locally_advanced", "recurrent_metastatic"];

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Anthropic API endpoint.
pub const ANTHROPIC_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default tagging model.
pub const GEN_MODEL: &str = "claude-3-5-haiku-latest";

/// Output token ceiling for one tagging call.
pub const GEN_MAX_TOKENS: u32 = 4000;

/// Decoding temperature for tagging (deterministic).
pub const GEN_TEMPERATURE: f32 = 0.0;

/// HTTP timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum connections in the store pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Minimum connections kept open by the store pool.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a pooled connection.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Seconds before an idle pooled connection is closed.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// INGESTION
// =============================================================================

/// AACT site root.
pub const AACT_BASE_URL: &str = "https://aact.ctti-clinicaltrials.org";

/// ClinicalTrials.gov v2 API root.
pub const CTGOV_API_URL: &str = "https://clinicaltrials.gov/api/v2";

/// ClinicalTrials.gov bulk JSON export.
pub const CTGOV_BULK_URL: &str = "https://clinicaltrials.gov/api/bulk/json/studies";

/// Largest page the ClinicalTrials.gov search API serves.
pub const CTGOV_MAX_PAGE_SIZE: usize = 1000;

/// Connect and per-read timeout for archive downloads in seconds.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Event channel capacity for batch progress events.
pub const EVENT_BUS_CAPACITY: usize = 256;
