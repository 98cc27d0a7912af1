//! Structured logging field name constants for ctsearch.
//!
//! Every crate logs through `tracing` using these names so that a run can be
//! filtered by trial, batch or subsystem regardless of which crate emitted
//! the event.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A record failed or a run aborted |
//! | WARN  | Recoverable issue, record skipped or fallback applied |
//! | INFO  | Lifecycle events (connect, batch claimed, run finished) |
//! | DEBUG | Decision points, prompt/response sizes, config choices |
//! | TRACE | Per-row iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for one batch run. Format: UUIDv7.
pub const RUN_ID: &str = "run_id";

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs", "ingest", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "trials", "anthropic", "tagger", "batch", "aact"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "find_unprocessed", "save_tags", "generate", "download"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Trial identifier being operated on.
pub const NCT_ID: &str = "nct_id";

/// Processing version written with a state row.
pub const PROCESSING_VERSION: &str = "processing_version";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows or records returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of records requested for one batch.
pub const BATCH_SIZE: &str = "batch_size";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
