//! Anthropic Messages API backend.
//!
//! # Example
//!
//! ```rust,no_run
//! use ctsearch_inference::anthropic::{AnthropicBackend, AnthropicConfig};
//! use ctsearch_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     // From environment variables (ANTHROPIC_API_KEY, ANTHROPIC_MODEL, ...)
//!     let backend = AnthropicBackend::from_env().unwrap();
//!
//!     // Or with explicit config
//!     let config = AnthropicConfig::new("sk-ant-...").with_model("claude-3-5-haiku-latest");
//!     let backend = AnthropicBackend::new(config).unwrap();
//!
//!     let text = backend.generate("Say hello").await.unwrap();
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{AnthropicBackend, AnthropicConfig};
pub use error::{to_ctsearch_error, AnthropicErrorCode};
pub use types::*;
