//! ClinicalTrials.gov v2 API client.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info};

use ctsearch_core::{defaults, Error, Result};

use crate::download::{date_stamp, stream_to_file};

/// Fields requested by [`ClinicalTrialsGovClient::search_trials`] when the
/// caller does not name any.
pub const DEFAULT_SEARCH_FIELDS: &[&str] = &[
    "NCTId",
    "BriefTitle",
    "OfficialTitle",
    "BriefSummary",
    "DetailedDescription",
    "Condition",
    "InterventionType",
    "InterventionName",
    "EligibilityCriteria",
    "Phase",
    "StudyType",
    "OverallStatus",
    "StartDate",
    "PrimaryCompletionDate",
    "LocationFacility",
    "LocationCity",
    "LocationState",
    "LocationCountry",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    studies: Vec<JsonValue>,
    total_count: Option<usize>,
    next_page_token: Option<String>,
}

fn at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn collect(items: Option<&JsonValue>, key: &str) -> Option<JsonValue> {
    let items = items?.as_array()?;
    Some(JsonValue::Array(
        items.iter().filter_map(|i| i.get(key).cloned()).collect(),
    ))
}

/// Flatten a v2 study (`protocolSection` modules) into the flat field names
/// used throughout ctsearch (`NCTId`, `Condition`, ...).
///
/// Studies without a `protocolSection` are returned unchanged.
pub fn flatten_study(study: &JsonValue) -> JsonValue {
    let Some(protocol) = study.get("protocolSection") else {
        return study.clone();
    };

    let interventions = at(protocol, &["armsInterventionsModule", "interventions"]);
    let locations = at(protocol, &["contactsLocationsModule", "locations"]);

    let fields: [(&str, Option<JsonValue>); 18] = [
        ("NCTId", at(protocol, &["identificationModule", "nctId"]).cloned()),
        ("BriefTitle", at(protocol, &["identificationModule", "briefTitle"]).cloned()),
        ("OfficialTitle", at(protocol, &["identificationModule", "officialTitle"]).cloned()),
        ("BriefSummary", at(protocol, &["descriptionModule", "briefSummary"]).cloned()),
        (
            "DetailedDescription",
            at(protocol, &["descriptionModule", "detailedDescription"]).cloned(),
        ),
        ("Condition", at(protocol, &["conditionsModule", "conditions"]).cloned()),
        ("InterventionType", collect(interventions, "type")),
        ("InterventionName", collect(interventions, "name")),
        (
            "EligibilityCriteria",
            at(protocol, &["eligibilityModule", "eligibilityCriteria"]).cloned(),
        ),
        ("Phase", at(protocol, &["designModule", "phases"]).cloned()),
        ("StudyType", at(protocol, &["designModule", "studyType"]).cloned()),
        ("OverallStatus", at(protocol, &["statusModule", "overallStatus"]).cloned()),
        ("StartDate", at(protocol, &["statusModule", "startDateStruct", "date"]).cloned()),
        (
            "PrimaryCompletionDate",
            at(protocol, &["statusModule", "primaryCompletionDateStruct", "date"]).cloned(),
        ),
        ("LocationFacility", collect(locations, "facility")),
        ("LocationCity", collect(locations, "city")),
        ("LocationState", collect(locations, "state")),
        ("LocationCountry", collect(locations, "country")),
    ];

    let flat: Map<String, JsonValue> = fields
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
        .collect();
    JsonValue::Object(flat)
}

/// File-name-safe form of a search query, at most 50 characters.
pub fn safe_query_name(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .take(50)
        .collect()
}

/// Client for the ClinicalTrials.gov search API and bulk export.
pub struct ClinicalTrialsGovClient {
    client: reqwest::Client,
    api_url: String,
    bulk_url: String,
    raw_dir: PathBuf,
}

impl ClinicalTrialsGovClient {
    /// Create a client, creating `<data_dir>/raw` if needed.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let raw_dir = data_dir.as_ref().join("raw");
        std::fs::create_dir_all(&raw_dir)?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: defaults::CTGOV_API_URL.to_string(),
            bulk_url: defaults::CTGOV_BULK_URL.to_string(),
            raw_dir,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_bulk_url(mut self, bulk_url: impl Into<String>) -> Self {
        self.bulk_url = bulk_url.into();
        self
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Download today's bulk JSON export, reusing an existing file.
    pub async fn download_bulk_data(&self) -> Result<PathBuf> {
        let output = self
            .raw_dir
            .join(format!("clinicaltrials_gov_bulk_{}.zip", date_stamp()));

        if output.exists() {
            info!(
                subsystem = "ingest",
                component = "ctgov",
                path = %output.display(),
                "Found existing bulk data"
            );
            return Ok(output);
        }

        stream_to_file(&self.client, &self.bulk_url, &output).await?;
        info!(
            subsystem = "ingest",
            component = "ctgov",
            path = %output.display(),
            "Bulk data downloaded"
        );
        Ok(output)
    }

    /// Search studies, following page tokens until `max_results` studies,
    /// the reported total, or the last page.
    ///
    /// Results are flattened with [`flatten_study`].
    pub async fn search_trials(
        &self,
        query: &str,
        fields: Option<&[&str]>,
        max_results: usize,
    ) -> Result<Vec<JsonValue>> {
        let start = Instant::now();
        let fields = fields.unwrap_or(DEFAULT_SEARCH_FIELDS).join(",");
        let page_size = max_results.clamp(1, defaults::CTGOV_MAX_PAGE_SIZE).to_string();
        let url = format!("{}/studies", self.api_url.trim_end_matches('/'));

        let mut results: Vec<JsonValue> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut total_count: Option<usize> = None;
        let mut page = 1;

        while results.len() < max_results {
            let mut params: Vec<(&str, &str)> = vec![
                ("query.term", query),
                ("pageSize", &page_size),
                ("fields", &fields),
                ("format", "json"),
                ("countTotal", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            debug!(subsystem = "ingest", component = "ctgov", page, "Fetching search page");
            let body: SearchPage = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if body.studies.is_empty() {
                break;
            }
            results.extend(body.studies.iter().map(flatten_study));

            if total_count.is_none() {
                total_count = body.total_count;
                info!(
                    subsystem = "ingest",
                    component = "ctgov",
                    total_count = ?total_count,
                    "Search matched studies"
                );
            }
            if total_count.is_some_and(|total| results.len() >= total) {
                break;
            }
            match body.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
            page += 1;
        }

        results.truncate(max_results);
        info!(
            subsystem = "ingest",
            component = "ctgov",
            op = "search_trials",
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieved studies"
        );
        Ok(results)
    }

    /// Write `{query, timestamp, results}` to `raw/search_<query>_<date>.json`.
    pub fn save_search_results(&self, results: &[JsonValue], query: &str) -> Result<PathBuf> {
        let output = self.raw_dir.join(format!(
            "search_{}_{}.json",
            safe_query_name(query),
            date_stamp()
        ));
        let document = json!({
            "query": query,
            "timestamp": chrono::Local::now().to_rfc3339(),
            "results": results,
        });
        std::fs::write(&output, serde_json::to_string_pretty(&document)?)?;

        info!(
            subsystem = "ingest",
            component = "ctgov",
            result_count = results.len(),
            path = %output.display(),
            "Saved search results"
        );
        Ok(output)
    }
}
