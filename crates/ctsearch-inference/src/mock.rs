//! Mock generation backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ctsearch_inference::mock::MockGenerationBackend;
//! use ctsearch_core::GenerationBackend;
//!
//! #[tokio::test]
//! async fn test_with_mock_backend() {
//!     let backend = MockGenerationBackend::new()
//!         .with_fixed_response(r#"{"condition_tags": ["NSCLC"]}"#);
//!
//!     let text = backend.generate("any prompt").await.unwrap();
//!     assert!(text.contains("NSCLC"));
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use ctsearch_core::{Error, GenerationBackend, Result};

/// One scripted backend answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Fail with [`Error::Request`].
    RequestError(String),
    /// Fail with [`Error::Inference`].
    InferenceError(String),
}

impl MockReply {
    fn into_result(self) -> Result<String> {
        match self {
            MockReply::Text(text) => Ok(text),
            MockReply::RequestError(msg) => Err(Error::Request(msg)),
            MockReply::InferenceError(msg) => Err(Error::Inference(msg)),
        }
    }
}

/// A recorded `generate` call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub timestamp: std::time::Instant,
}

#[derive(Debug, Clone)]
struct MockConfig {
    default_reply: MockReply,
    /// Replies chosen when the prompt contains the needle.
    mapped: Vec<(String, MockReply)>,
    latency_ms: u64,
    model: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_reply: MockReply::Text("{}".to_string()),
            mapped: Vec::new(),
            latency_ms: 0,
            model: "mock-model".to_string(),
        }
    }
}

/// Mock generation backend for testing.
///
/// Reply order: queued replies first, then the first mapping whose needle
/// occurs in the prompt, then the default reply.
#[derive(Clone)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    queue: Arc<Mutex<VecDeque<MockReply>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockGenerationBackend {
    /// Create a mock that answers `{}` to everything.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the default response text.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_reply = MockReply::Text(response.into());
        self
    }

    /// Fail every unmapped call with a transport error.
    pub fn with_request_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_reply = MockReply::RequestError(message.into());
        self
    }

    /// Answer with `reply` whenever the prompt contains `needle`.
    pub fn with_reply_for(mut self, needle: impl Into<String>, reply: MockReply) -> Self {
        Arc::make_mut(&mut self.config)
            .mapped
            .push((needle.into(), reply));
        self
    }

    /// Queue texts to be returned, in order, before any other rule applies.
    pub fn with_response_queue(self, responses: Vec<String>) -> Self {
        lock(&self.queue).extend(responses.into_iter().map(MockReply::Text));
        self
    }

    /// Queue a scripted reply.
    pub fn with_queued_reply(self, reply: MockReply) -> Self {
        lock(&self.queue).push_back(reply);
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Set the reported model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    /// Number of `generate` calls so far.
    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        lock(&self.call_log).clear()
    }

    fn next_reply(&self, prompt: &str) -> MockReply {
        if let Some(reply) = lock(&self.queue).pop_front() {
            return reply;
        }
        self.config
            .mapped
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.config.default_reply.clone())
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        lock(&self.call_log).push(MockCall {
            prompt: prompt.to_string(),
            timestamp: std::time::Instant::now(),
        });

        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }

        self.next_reply(prompt).into_result()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
