//! Deterministic offline provider.
//!
//! Replays a queue of canned replies in order. When the queue runs dry the
//! last reply is repeated (or, with no replies at all, every call fails).
//! Used by the test suite and by the CLI for offline runs.
//!
//! ## Configuration Format
//! ```json
//! {
//!   "name": "scripted",
//!   "latency_ms": 0,
//!   "responses": [
//!     "{\"hint\": \"...\"}",
//!     {"error": "timeout"},
//!     {"json": {"hint": "..."}}
//!   ]
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};

/// One scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Raw completion text
    Text(String),

    /// A provider failure
    Error(ProviderError),
}

impl ScriptedReply {
    /// Completion text holding the given JSON.
    pub fn json(value: JsonValue) -> Self {
        ScriptedReply::Text(value.to_string())
    }

    fn from_config(entry: &JsonValue) -> Result<Self, ProviderError> {
        match entry {
            JsonValue::String(text) => Ok(ScriptedReply::Text(text.clone())),
            JsonValue::Object(map) => {
                if let Some(value) = map.get("json") {
                    return Ok(ScriptedReply::json(value.clone()));
                }
                if let Some(text) = map.get("text").and_then(JsonValue::as_str) {
                    return Ok(ScriptedReply::Text(text.to_string()));
                }
                match map.get("error").and_then(JsonValue::as_str) {
                    Some("timeout") => Ok(ScriptedReply::Error(ProviderError::Timeout(
                        Duration::from_secs(0),
                    ))),
                    Some("rate_limited") => Ok(ScriptedReply::Error(ProviderError::RateLimited {
                        retry_after: None,
                    })),
                    Some(message) => Ok(ScriptedReply::Error(ProviderError::HttpError(
                        message.to_string(),
                    ))),
                    None => Err(ProviderError::NotConfigured(
                        "scripted reply objects need 'json', 'text' or 'error'".into(),
                    )),
                }
            }
            other => Err(ProviderError::NotConfigured(format!(
                "unsupported scripted reply: {}",
                other
            ))),
        }
    }
}

/// Provider that replays scripted replies.
pub struct ScriptedProvider {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    latency: Duration,
    calls: AtomicU32,
}

impl ScriptedProvider {
    /// Create a provider named `name` with no replies queued.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Queue a reply.
    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.push(reply);
        self
    }

    /// Queue a JSON reply.
    pub fn with_json(self, value: JsonValue) -> Self {
        self.with_reply(ScriptedReply::json(value))
    }

    /// Queue a failure.
    pub fn with_error(self, error: ProviderError) -> Self {
        self.with_reply(ScriptedReply::Error(error))
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a reply on a shared provider.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        let mut last = self.last.lock();
        if let Some(reply) = self.replies.lock().pop_front() {
            *last = Some(reply.clone());
            return Some(reply);
        }
        last.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            Some(ScriptedReply::Text(content)) => {
                let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
                let usage = TokenUsage {
                    prompt_tokens: (prompt_chars / 4) as u32,
                    completion_tokens: self.estimate_tokens(&content),
                };
                Ok(CompletionResponse {
                    content,
                    usage,
                    model: config.model.clone(),
                    stop_reason: Some("end_turn".to_string()),
                })
            }
            Some(ScriptedReply::Error(error)) => Err(error),
            None => Err(ProviderError::NotConfigured(format!(
                "scripted provider '{}' has no replies",
                self.name
            ))),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for scripted providers.
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate_config(config)?;

        let name = config["name"].as_str().unwrap_or("scripted");
        let latency = Duration::from_millis(config["latency_ms"].as_u64().unwrap_or(0));
        let provider = ScriptedProvider::new(name).with_latency(latency);

        if let Some(replies) = config["responses"].as_array() {
            for entry in replies {
                provider.push(ScriptedReply::from_config(entry)?);
            }
        }

        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        match &config["responses"] {
            JsonValue::Null => Ok(()),
            JsonValue::Array(entries) => entries
                .iter()
                .try_for_each(|entry| ScriptedReply::from_config(entry).map(|_| ())),
            _ => Err(ProviderError::NotConfigured(
                "'responses' must be an array".to_string(),
            )),
        }
    }

    fn description(&self) -> &'static str {
        "Offline provider replaying canned replies"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(provider: &ScriptedProvider) -> Result<CompletionResponse, ProviderError> {
        futures::executor::block_on(
            provider.complete(vec![ChatMessage::user("hi")], &CompletionConfig::default()),
        )
    }

    #[test]
    fn test_replays_in_order_then_repeats_last() {
        let provider = ScriptedProvider::new("scripted")
            .with_error(ProviderError::Timeout(Duration::from_secs(1)))
            .with_json(json!({"hint": "h"}));

        assert!(matches!(call(&provider), Err(ProviderError::Timeout(_))));
        assert_eq!(call(&provider).unwrap().content, r#"{"hint":"h"}"#);
        assert_eq!(call(&provider).unwrap().content, r#"{"hint":"h"}"#);
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn test_empty_script_fails() {
        let provider = ScriptedProvider::new("empty");
        assert!(matches!(call(&provider), Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_factory_parses_replies() {
        let provider = ScriptedProviderFactory
            .create(&json!({
                "name": "offline",
                "responses": [
                    {"error": "timeout"},
                    {"json": {"summary": "s"}},
                    "plain text"
                ]
            }))
            .unwrap();
        assert_eq!(provider.name(), "offline");

        let config = CompletionConfig::default();
        let first = futures::executor::block_on(provider.complete(vec![], &config));
        assert!(matches!(first, Err(ProviderError::Timeout(_))));

        let second = futures::executor::block_on(provider.complete(vec![], &config)).unwrap();
        assert_eq!(provider.parse_response(&second).unwrap()["summary"], "s");

        let third = futures::executor::block_on(provider.complete(vec![], &config)).unwrap();
        assert!(provider.parse_response(&third).is_none());
    }

    #[test]
    fn test_factory_rejects_bad_config() {
        assert!(ScriptedProviderFactory
            .validate_config(&json!({"responses": "nope"}))
            .is_err());
        assert!(ScriptedProviderFactory
            .validate_config(&json!({"responses": [42]}))
            .is_err());
        assert!(ScriptedProviderFactory.validate_config(&json!({})).is_ok());
    }
}
