//! # ctsearch-inference
//!
//! LLM tag extraction for clinical trial records.
//!
//! This crate provides:
//! - Anthropic Messages API backend
//! - Tagging prompt construction
//! - Lenient response parsing into a [`TagSet`](ctsearch_core::TagSet)
//! - [`LlmTagger`], the [`TrialTagger`](ctsearch_core::TrialTagger)
//!   implementation used by the batch driver and file tagging
//!
//! # Example
//!
//! ```rust,no_run
//! use ctsearch_inference::{anthropic::AnthropicBackend, LlmTagger};
//! use ctsearch_core::{TrialInput, TrialTagger};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tagger = LlmTagger::new(AnthropicBackend::from_env().unwrap());
//!     let input = TrialInput { nct_id: "NCT01234567".into(), ..Default::default() };
//!     let tagged = tagger.generate_tags(&input).await.unwrap();
//!     println!("{}", tagged.llm_generated_tags);
//! }
//! ```

pub mod anthropic;
pub mod extract;
pub mod prompt;
pub mod tagger;

// Mock generation backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use extract::{extract_json_span, parse_response};
pub use prompt::build_prompt;
pub use tagger::LlmTagger;
