//! LLM-backed trial tagger.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ctsearch_core::{GenerationBackend, Result, TaggedTrial, TrialInput, TrialTagger};

use crate::extract::parse_response;
use crate::prompt::build_prompt;

/// Tags trials by prompting a generation backend and parsing its answer.
pub struct LlmTagger<B> {
    backend: B,
}

impl<B: GenerationBackend> LlmTagger<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Tag a list of trials one after another.
    ///
    /// Stops at the first service or transport failure.
    pub async fn tag_batch(&self, inputs: Vec<TrialInput>) -> Result<Vec<TaggedTrial>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            info!(
                subsystem = "inference",
                component = "tagger",
                nct_id = %input.nct_id,
                "Processing trial"
            );
            results.push(self.generate_tags(&input).await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl<B: GenerationBackend> TrialTagger for LlmTagger<B> {
    async fn generate_tags(&self, input: &TrialInput) -> Result<TaggedTrial> {
        let start = Instant::now();
        let prompt = build_prompt(input);
        let response = self.backend.generate(&prompt).await?;

        let tagged = match parse_response(&response) {
            Ok((raw_tags, tags)) => TaggedTrial::tagged(input.clone(), raw_tags, tags),
            Err(error) => {
                warn!(
                    subsystem = "inference",
                    component = "tagger",
                    nct_id = %input.nct_id,
                    error = %error,
                    raw_response = %response,
                    "Unusable model response"
                );
                TaggedTrial::failed(input.clone(), error)
            }
        };

        debug!(
            subsystem = "inference",
            component = "tagger",
            op = "generate_tags",
            nct_id = %input.nct_id,
            model = self.backend.model_name(),
            prompt_len = prompt.len(),
            response_len = response.len(),
            success = tagged.is_success(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tagging complete"
        );
        Ok(tagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerationBackend;
    use ctsearch_core::{Error, ExtractionError, ScoredTag, TextOrList};

    fn input(nct_id: &str) -> TrialInput {
        TrialInput {
            nct_id: nct_id.to_string(),
            conditions: TextOrList::from("Melanoma"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_tags_success() {
        let backend = MockGenerationBackend::new()
            .with_fixed_response(r#"Sure! {"condition_tags": ["Melanoma"]}"#);
        let tagger = LlmTagger::new(backend.clone());

        let tagged = tagger.generate_tags(&input("NCT1")).await.unwrap();
        assert!(tagged.is_success());
        assert_eq!(tagged.nct_id(), "NCT1");
        assert_eq!(tagged.llm_generated_tags["condition_tags"][0], "Melanoma");
        assert_eq!(
            tagged.outcome.unwrap().conditions,
            vec![ScoredTag::new("Melanoma", 5)]
        );

        let calls = backend.get_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("Conditions:\nMelanoma"));
    }

    #[tokio::test]
    async fn test_unusable_response_is_data_not_error() {
        let backend = MockGenerationBackend::new().with_fixed_response("I'm not sure.");
        let tagger = LlmTagger::new(backend);

        let tagged = tagger.generate_tags(&input("NCT2")).await.unwrap();
        assert!(!tagged.is_success());
        assert_eq!(tagged.outcome.unwrap_err(), ExtractionError::NoJsonObject);
        assert_eq!(
            tagged.llm_generated_tags["error"],
            "Could not extract JSON from LLM response"
        );
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let backend = MockGenerationBackend::new().with_request_failure("connection reset");
        let tagger = LlmTagger::new(backend);

        let err = tagger.generate_tags(&input("NCT3")).await.unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[tokio::test]
    async fn test_tag_batch_keeps_order() {
        let backend = MockGenerationBackend::new()
            .with_response_queue(vec![
                r#"{"condition_tags": ["A"]}"#.to_string(),
                "garbage".to_string(),
            ])
            .with_fixed_response(r#"{"condition_tags": ["C"]}"#);
        let tagger = LlmTagger::new(backend);

        let results = tagger
            .tag_batch(vec![input("NCT-A"), input("NCT-B"), input("NCT-C")])
            .await
            .unwrap();

        let ids: Vec<_> = results.iter().map(|t| t.nct_id()).collect();
        assert_eq!(ids, vec!["NCT-A", "NCT-B", "NCT-C"]);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert_eq!(results[2].llm_generated_tags["condition_tags"][0], "C");
    }
}
