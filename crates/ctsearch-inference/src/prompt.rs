//! Tagging prompt construction.

use ctsearch_core::{defaults, TrialInput};

/// JSON keys the model is asked to return.
pub mod keys {
    pub const CONDITION_TAGS: &str = "condition_tags";
    pub const MECHANISM_TAGS: &str = "mechanism_tags";
    pub const SIMPLIFIED_ELIGIBILITY: &str = "simplified_eligibility";
    pub const INCLUSION_CRITERIA_TAGS: &str = "inclusion_criteria_tags";
    pub const EXCLUSION_CRITERIA_TAGS: &str = "exclusion_criteria_tags";
    pub const TREATMENT_TARGET_TAGS: &str = "treatment_target_tags";
    pub const DISEASE_STAGE_RELEVANCE: &str = "disease_stage_relevance";
}

/// `"early", "locally_advanced" and "recurrent_metastatic"`
fn stage_keys() -> String {
    let quoted: Vec<String> = defaults::DISEASE_STAGES
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect();
    match quoted.split_last() {
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {last}", rest.join(", ")),
        None => String::new(),
    }
}

/// Build the single user prompt for one trial.
pub fn build_prompt(input: &TrialInput) -> String {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    format!(
        r#"You are an expert in clinical trials, oncology, and medical research. Your task is to analyze the following clinical trial information and generate standardized tags that will make it easier for patients to find relevant trials.

## Clinical Trial Information
NCT ID: {nct_id}
Title: {title}
Official Title: {official_title}
Phase: {phase}
Status: {status}

Summary:
{summary}

Description:
{description}

Conditions:
{conditions}

Intervention Types:
{intervention_types}

Intervention Names:
{intervention_names}

Eligibility Criteria:
{criteria}

## Task
Based on this information, provide the following in JSON format:

1. "{k_conditions}": standardized condition tags (normalize different terms for the same condition)
2. "{k_mechanisms}": the trial's primary mechanism categories (e.g., immunotherapy, targeted therapy, chemotherapy)
3. "{k_eligibility}": a simplified eligibility summary (in plain language bullets)
4. "{k_inclusion}": key inclusion criteria tags (e.g., "no prior treatment", "recurrent disease")
5. "{k_exclusion}": key exclusion criteria tags (e.g., "brain metastases", "autoimmune disease")
6. "{k_targets}": treatment target tags (e.g., specific genes, proteins, pathways)
7. "{k_stages}": a relevance score (1-5) for each stage of disease, keyed {stage_keys}

Condition and mechanism tags may be plain strings or objects of the form {{"name": "...", "relevance": 1-5}}.

Your response should ONLY be properly formatted JSON with these fields.
"#,
        nct_id = input.nct_id,
        title = text(&input.brief_title),
        official_title = text(&input.official_title),
        phase = input.phase.render(),
        status = text(&input.overall_status),
        summary = text(&input.brief_summary),
        description = text(&input.detailed_description),
        conditions = input.conditions.render(),
        intervention_types = input.intervention_types.render(),
        intervention_names = input.intervention_names.render(),
        criteria = text(&input.eligibility_criteria),
        k_conditions = keys::CONDITION_TAGS,
        k_mechanisms = keys::MECHANISM_TAGS,
        k_eligibility = keys::SIMPLIFIED_ELIGIBILITY,
        k_inclusion = keys::INCLUSION_CRITERIA_TAGS,
        k_exclusion = keys::EXCLUSION_CRITERIA_TAGS,
        k_targets = keys::TREATMENT_TARGET_TAGS,
        k_stages = keys::DISEASE_STAGE_RELEVANCE,
        stage_keys = stage_keys(),
    )
}
