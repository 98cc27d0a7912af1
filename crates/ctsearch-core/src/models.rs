//! Data model for trial records, tagging inputs and tag sets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

// =============================================================================
// SOURCE RECORDS
// =============================================================================

/// One clinical trial as stored in the `ctgov` source namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub nct_id: String,
    pub brief_title: Option<String>,
    pub official_title: Option<String>,
    pub brief_summary: Option<String>,
    pub detailed_description: Option<String>,
    pub phase: Option<String>,
    pub overall_status: Option<String>,
    pub study_type: Option<String>,
    /// Condition names in source order.
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Interventions in source order.
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    #[serde(default)]
    pub eligibility: Eligibility,
}

/// A single intervention arm entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    pub intervention_type: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Eligibility block of a trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub criteria: Option<String>,
    pub gender: Option<String>,
    pub minimum_age: Option<String>,
    pub maximum_age: Option<String>,
}

// =============================================================================
// TAGGING INPUT
// =============================================================================

/// A field that the source may deliver as a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrList {
    Text(String),
    List(Vec<String>),
    /// JSON `null`.
    Absent,
}

impl TextOrList {
    /// Render for a prompt: lists are comma-joined, scalars verbatim.
    pub fn render(&self) -> String {
        match self {
            TextOrList::Text(text) => text.clone(),
            TextOrList::List(items) => items.join(", "),
            TextOrList::Absent => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TextOrList::Text(text) => text.is_empty(),
            TextOrList::List(items) => items.is_empty(),
            TextOrList::Absent => true,
        }
    }
}

impl Default for TextOrList {
    fn default() -> Self {
        TextOrList::List(Vec::new())
    }
}

impl From<Vec<String>> for TextOrList {
    fn from(items: Vec<String>) -> Self {
        TextOrList::List(items)
    }
}

impl From<&str> for TextOrList {
    fn from(text: &str) -> Self {
        TextOrList::Text(text.to_string())
    }
}

/// Model-ready representation of a trial, in ClinicalTrials.gov field names.
///
/// Fields the tagger does not use are kept in `extra` so that file-based
/// tagging can write its input back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialInput {
    #[serde(rename = "NCTId", default)]
    pub nct_id: String,
    #[serde(rename = "BriefTitle", default)]
    pub brief_title: Option<String>,
    #[serde(rename = "OfficialTitle", default)]
    pub official_title: Option<String>,
    #[serde(rename = "BriefSummary", default)]
    pub brief_summary: Option<String>,
    #[serde(rename = "DetailedDescription", default)]
    pub detailed_description: Option<String>,
    #[serde(rename = "Phase", default)]
    pub phase: TextOrList,
    #[serde(rename = "OverallStatus", default)]
    pub overall_status: Option<String>,
    #[serde(rename = "StudyType", default)]
    pub study_type: Option<String>,
    #[serde(rename = "Condition", default)]
    pub conditions: TextOrList,
    #[serde(rename = "InterventionType", default)]
    pub intervention_types: TextOrList,
    #[serde(rename = "InterventionName", default)]
    pub intervention_names: TextOrList,
    #[serde(rename = "EligibilityCriteria", default)]
    pub eligibility_criteria: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl From<&TrialRecord> for TrialInput {
    fn from(record: &TrialRecord) -> Self {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        Self {
            nct_id: record.nct_id.clone(),
            brief_title: record.brief_title.clone(),
            official_title: record.official_title.clone(),
            brief_summary: record.brief_summary.clone(),
            detailed_description: record.detailed_description.clone(),
            phase: TextOrList::Text(field(&record.phase)),
            overall_status: record.overall_status.clone(),
            study_type: record.study_type.clone(),
            conditions: TextOrList::List(record.conditions.clone()),
            intervention_types: TextOrList::List(
                record
                    .interventions
                    .iter()
                    .map(|i| field(&i.intervention_type))
                    .collect(),
            ),
            intervention_names: TextOrList::List(
                record.interventions.iter().map(|i| field(&i.name)).collect(),
            ),
            eligibility_criteria: record.eligibility.criteria.clone(),
            extra: Map::new(),
        }
    }
}

// =============================================================================
// TAG SETS
// =============================================================================

/// A tag name with a 1–5 relevance score.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScoredTag {
    pub name: String,
    pub relevance: i16,
}

impl ScoredTag {
    pub fn new(name: impl Into<String>, relevance: i16) -> Self {
        Self {
            name: name.into(),
            relevance,
        }
    }
}

/// Structured tags extracted for one trial.
///
/// Each collection is written independently by the store; an empty
/// collection writes nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagSet {
    pub conditions: Vec<ScoredTag>,
    pub mechanisms: Vec<ScoredTag>,
    pub targets: Vec<String>,
    pub inclusion_criteria: Vec<String>,
    pub exclusion_criteria: Vec<String>,
    pub simplified_eligibility: Option<String>,
    /// Normalized stage name → relevance. Names the store does not know are
    /// dropped on write.
    pub stage_relevance: BTreeMap<String, i16>,
}

impl TagSet {
    /// True when no collection carries anything.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
            && self.mechanisms.is_empty()
            && self.targets.is_empty()
            && self.inclusion_criteria.is_empty()
            && self.exclusion_criteria.is_empty()
            && self.simplified_eligibility.is_none()
            && self.stage_relevance.is_empty()
    }
}

/// Normalize a disease-stage label to its registered form.
///
/// `"Recurrent/Metastatic"` and `"locally advanced"` become
/// `"recurrent_metastatic"` and `"locally_advanced"`.
pub fn normalize_stage_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_whitespace() || c == '/' || c == '-' {
            if !normalized.ends_with('_') {
                normalized.push('_');
            }
        } else {
            normalized.extend(c.to_lowercase());
        }
    }
    normalized.trim_matches('_').to_string()
}

/// Why a model response could not be turned into a tag set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// No `{ ... }` span in the response.
    #[error("Could not extract JSON from LLM response")]
    NoJsonObject,
    /// The span between the outer braces is not valid JSON.
    #[error("Failed to parse JSON from LLM response: {0}")]
    InvalidJson(String),
    /// The model answered with an `error` field or a non-object value.
    #[error("{0}")]
    ModelReported(String),
}

/// Tagging result: the input fields merged with `llm_generated_tags`.
#[derive(Debug, Clone, Serialize)]
pub struct TaggedTrial {
    #[serde(flatten)]
    pub input: TrialInput,
    /// Parsed model JSON, or `{"error": "..."}` on failure.
    pub llm_generated_tags: JsonValue,
    #[serde(skip)]
    pub outcome: std::result::Result<TagSet, ExtractionError>,
}

impl TaggedTrial {
    /// Build a successful result.
    pub fn tagged(input: TrialInput, raw_tags: JsonValue, tags: TagSet) -> Self {
        Self {
            input,
            llm_generated_tags: raw_tags,
            outcome: Ok(tags),
        }
    }

    /// Build a failed result carrying an error marker.
    pub fn failed(input: TrialInput, error: ExtractionError) -> Self {
        Self {
            input,
            llm_generated_tags: serde_json::json!({ "error": error.to_string() }),
            outcome: Err(error),
        }
    }

    pub fn nct_id(&self) -> &str {
        &self.input.nct_id
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

// =============================================================================
// PROCESSING STATE
// =============================================================================

/// One `processed_trials` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub nct_id: String,
    pub successfully_processed: bool,
    pub processing_version: i32,
    pub processed_at: DateTime<Utc>,
}

/// Aggregate counts over the source and processing tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_trials: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub unprocessed: i64,
}
