//! AACT daily snapshot downloader.
//!
//! AACT publishes daily Postgres dumps of ClinicalTrials.gov. The download
//! page lists them in a `form-select` dropdown, newest first; each option
//! points at a snapshot page such as `/static/static_db_copies/daily/2025-05-11`
//! which either serves the zip directly or links to it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use ctsearch_core::{defaults, Error, Result};

use crate::download::{date_stamp, join_url, save_response, stream_to_file};

fn pattern(re: &str) -> Result<Regex> {
    Regex::new(re).map_err(|e| Error::Internal(format!("invalid pattern {re}: {e}")))
}

/// Value of the first real option in the first `form-select` dropdown.
///
/// The option at index 0 is a placeholder and is skipped.
pub fn latest_snapshot_path(html: &str) -> Result<String> {
    let select = pattern(r#"(?is)<select[^>]*class\s*=\s*"[^"]*\bform-select\b[^"]*"[^>]*>(.*?)</select>"#)?;
    let option = pattern(r#"(?is)<option\b([^>]*)>"#)?;
    let value = pattern(r#"(?i)\bvalue\s*=\s*"([^"]*)""#)?;

    let body = select
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| {
            Error::InvalidInput("no dataset select element on AACT download page".to_string())
        })?
        .as_str();

    let latest = option.captures_iter(body).nth(1).ok_or_else(|| {
        Error::InvalidInput("no dataset options on AACT download page".to_string())
    })?;

    value
        .captures(&latest[1])
        .map(|c| c[1].trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidInput("dataset option has no value".to_string()))
}

/// Archive name for a snapshot URL ending in `/daily/YYYY-MM-DD`.
pub fn dataset_filename(dataset_url: &str) -> Result<String> {
    let date = pattern(r"/daily/(\d{4})-(\d{2})-(\d{2})/?$")?;
    let caps = date.captures(dataset_url).ok_or_else(|| {
        Error::InvalidInput(format!("no snapshot date in dataset URL: {dataset_url}"))
    })?;
    Ok(format!(
        "{}{}{}_clinical_trials_ctgov.zip",
        &caps[1], &caps[2], &caps[3]
    ))
}

/// First `href` on the page that mentions `needle`.
fn find_link(html: &str, needle: &str) -> Result<Option<String>> {
    let href = pattern(r#"(?i)<a\b[^>]*\bhref\s*=\s*"([^"]+)""#)?;
    let link = href
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .find(|link| link.contains(needle));
    Ok(link)
}

fn is_zip(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/zip"))
}

/// Downloads the newest AACT snapshot into `<data_dir>/raw`.
pub struct AactDownloader {
    client: reqwest::Client,
    base_url: String,
    raw_dir: PathBuf,
}

fn http_client(read_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(read_timeout)
        .read_timeout(read_timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))
}

impl AactDownloader {
    /// Create a downloader, creating `<data_dir>/raw` if needed.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let raw_dir = data_dir.as_ref().join("raw");
        std::fs::create_dir_all(&raw_dir)?;

        Ok(Self {
            client: http_client(Duration::from_secs(defaults::DOWNLOAD_TIMEOUT_SECS))?,
            base_url: defaults::AACT_BASE_URL.to_string(),
            raw_dir,
        })
    }

    /// Replace the per-read timeout. Bodies may take any total time as long
    /// as bytes keep arriving within `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    /// Point at a different AACT host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Local path for today's snapshot.
    pub fn output_path(&self) -> PathBuf {
        self.raw_dir
            .join(format!("aact_dataset_{}.zip", date_stamp()))
    }

    /// URL of the newest daily snapshot page.
    pub async fn latest_dataset_url(&self) -> Result<String> {
        let page_url = join_url(&self.base_url, "/download");
        info!(
            subsystem = "ingest",
            component = "aact",
            url = %page_url,
            "Fetching AACT download page"
        );

        let html = self
            .client
            .get(&page_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let url = join_url(&self.base_url, &latest_snapshot_path(&html)?);
        info!(subsystem = "ingest", component = "aact", url = %url, "Found latest dataset");
        Ok(url)
    }

    /// Download today's snapshot, reusing an existing file.
    pub async fn download_latest_dataset(&self) -> Result<PathBuf> {
        let output = self.output_path();
        if output.exists() {
            info!(
                subsystem = "ingest",
                component = "aact",
                path = %output.display(),
                "Found existing dataset"
            );
            return Ok(output);
        }

        let dataset_url = self.latest_dataset_url().await?;
        let expected = dataset_filename(&dataset_url)?;

        let response = self
            .client
            .get(&dataset_url)
            .send()
            .await?
            .error_for_status()?;

        if is_zip(&response) {
            debug!(subsystem = "ingest", component = "aact", "Snapshot URL serves the archive");
            save_response(response, &output).await?;
        } else {
            let html = response.text().await?;
            let link = find_link(&html, &expected)?.ok_or_else(|| {
                Error::NotFound(format!("download link for {expected}"))
            })?;
            stream_to_file(&self.client, &join_url(&self.base_url, &link), &output).await?;
        }

        info!(
            subsystem = "ingest",
            component = "aact",
            path = %output.display(),
            "Dataset downloaded"
        );
        Ok(output)
    }
}
