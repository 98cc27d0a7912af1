//! # ctsearch-db
//!
//! PostgreSQL record store for the ctsearch enrichment pipeline.
//!
//! This crate provides:
//! - Lazy, single-flight connection pool management
//! - [`PgTrialStore`], reading AACT `ctgov` records and writing tags and
//!   processing state into the `ctsearch` schema
//! - Schema migrations (feature `migrations`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use ctsearch_db::{PgTrialStore, TrialStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgTrialStore::from_url("postgres://localhost/aact")?;
//!     for trial in store.find_unprocessed(5).await? {
//!         println!("{}", trial.nct_id);
//!     }
//!     store.close().await;
//!     Ok(())
//! }
//! ```
pub mod pool;
mod tags;
pub mod trials;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use ctsearch_core::*;

pub use pool::{
    create_pool_with_config, log_pool_metrics, parse_database_url, ConnectParams,
    LazyPool, PoolConfig, SingleFlight,
};
pub use sqlx::postgres::PgConnectOptions;
pub use trials::PgTrialStore;
