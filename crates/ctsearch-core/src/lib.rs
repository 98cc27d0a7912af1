//! # ctsearch-core
//!
//! Core types, traits, and abstractions for the ctsearch clinical trial
//! enrichment pipeline.
//!
//! This crate provides the data model shared by the record store, the tag
//! extractor and the batch driver, plus the error type every crate returns.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
