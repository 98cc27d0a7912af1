//! Response parsing: from raw model text to a [`TagSet`].
//!
//! Parsing is lenient. The JSON object may be wrapped in prose or code
//! fences, fields may be missing, and tag entries may be bare strings or
//! `{name, relevance}` objects.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value as JsonValue};

use ctsearch_core::defaults::{DEFAULT_RELEVANCE, RELEVANCE_MAX, RELEVANCE_MIN};
use ctsearch_core::{normalize_stage_name, ExtractionError, ScoredTag, TagSet};

use crate::prompt::keys;

/// The substring from the first `{` to the last `}`, if any.
pub fn extract_json_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a raw model response into its JSON value and tag set.
pub fn parse_response(raw: &str) -> Result<(JsonValue, TagSet), ExtractionError> {
    let span = extract_json_span(raw).ok_or(ExtractionError::NoJsonObject)?;
    let value: JsonValue =
        serde_json::from_str(span).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

    let object = value.as_object().ok_or_else(|| {
        ExtractionError::ModelReported("LLM response JSON is not an object".to_string())
    })?;

    if let Some(error) = object.get("error") {
        let message = match error {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(ExtractionError::ModelReported(message));
    }

    let tags = tag_set_from_object(object);
    Ok((value, tags))
}

/// Decompose a response object into tag collections.
pub fn tag_set_from_object(object: &Map<String, JsonValue>) -> TagSet {
    TagSet {
        conditions: scored_tags(object.get(keys::CONDITION_TAGS)),
        mechanisms: scored_tags(object.get(keys::MECHANISM_TAGS)),
        targets: plain_tags(object.get(keys::TREATMENT_TARGET_TAGS)),
        inclusion_criteria: plain_tags(object.get(keys::INCLUSION_CRITERIA_TAGS)),
        exclusion_criteria: plain_tags(object.get(keys::EXCLUSION_CRITERIA_TAGS)),
        simplified_eligibility: summary_text(object.get(keys::SIMPLIFIED_ELIGIBILITY)),
        stage_relevance: stage_scores(object.get(keys::DISEASE_STAGE_RELEVANCE)),
    }
}

/// Clamp a JSON number (or numeric string) to the relevance range.
fn relevance(value: &JsonValue) -> Option<i16> {
    let n = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some((n.round() as i16).clamp(RELEVANCE_MIN, RELEVANCE_MAX))
}

/// Entries as a list: arrays pass through, a lone scalar or object is a
/// one-element list, null and absent are empty.
fn entries(value: Option<&JsonValue>) -> Vec<&JsonValue> {
    match value {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn entry_name(entry: &JsonValue) -> Option<String> {
    let name = match entry {
        JsonValue::String(s) => s.as_str(),
        JsonValue::Object(map) => ["name", "tag", "category", "target"]
            .iter()
            .find_map(|key| map.get(*key).and_then(JsonValue::as_str))?,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn scored_tags(value: Option<&JsonValue>) -> Vec<ScoredTag> {
    let mut seen = HashSet::new();
    entries(value)
        .into_iter()
        .filter_map(|entry| {
            let name = entry_name(entry)?;
            let score = match entry {
                JsonValue::Object(map) => ["relevance", "relevance_score", "score"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(relevance))
                    .unwrap_or(DEFAULT_RELEVANCE),
                _ => DEFAULT_RELEVANCE,
            };
            seen.insert(name.clone())
                .then(|| ScoredTag::new(name, score))
        })
        .collect()
}

fn plain_tags(value: Option<&JsonValue>) -> Vec<String> {
    let mut seen = HashSet::new();
    entries(value)
        .into_iter()
        .filter_map(entry_name)
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn summary_text(value: Option<&JsonValue>) -> Option<String> {
    let text = match value? {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::trim))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn stage_scores(value: Option<&JsonValue>) -> BTreeMap<String, i16> {
    let mut scores = BTreeMap::new();
    match value {
        Some(JsonValue::Object(map)) => {
            for (stage, score) in map {
                let score = match score {
                    JsonValue::Object(inner) => inner.get("relevance").and_then(relevance),
                    other => relevance(other),
                };
                if let Some(score) = score {
                    scores.insert(normalize_stage_name(stage), score);
                }
            }
        }
        Some(JsonValue::Array(items)) => {
            for item in items {
                let Some(map) = item.as_object() else { continue };
                let stage = map.get("stage").and_then(JsonValue::as_str);
                let score = map.get("relevance").and_then(relevance);
                if let (Some(stage), Some(score)) = (stage, score) {
                    scores.insert(normalize_stage_name(stage), score);
                }
            }
        }
        _ => {}
    }
    scores.retain(|stage, _| !stage.is_empty());
    scores
}
