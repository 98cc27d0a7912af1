//! # ctsearch-ingest
//!
//! Source data acquisition for ctsearch: AACT daily snapshots and the
//! ClinicalTrials.gov v2 API. Downloads stream to disk under `<data_dir>/raw`
//! and an existing file for the current day is reused.

pub mod aact;
pub mod ctgov;
mod download;

pub use aact::{dataset_filename, latest_snapshot_path, AactDownloader};
pub use ctgov::{flatten_study, ClinicalTrialsGovClient, DEFAULT_SEARCH_FIELDS};
