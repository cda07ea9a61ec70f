//! Request-side types shared by every layer of the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Opaque key-value context handed to a prompt template.
pub type Context = Map<String, JsonValue>;

/// Per-call options for a pipeline run.
///
/// `cache`, `validate`, `retries` and `trace_id` steer execution only.
/// `provider` and `params` change what the backend produces, so they take
/// part in the cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Look up and store results in the cache
    pub cache: bool,

    /// Validate the parsed response against the task schema
    pub validate: bool,

    /// Provider identifier (falls back to the configured default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Overrides the default `max_attempts` of the retry policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Generation parameters forwarded to the provider (model, temperature, max_tokens)
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, JsonValue>,

    /// Request-scoped correlation id, never part of the fingerprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cache: true,
            validate: true,
            provider: None,
            retries: None,
            params: Map::new(),
            trace_id: None,
        }
    }
}

impl RunOptions {
    /// Skip the cache for this call.
    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Skip schema and quality validation for this call.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Route the call to a specific provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Override the maximum number of attempts.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set a generation parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach a correlation id for logging.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// A single unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Selects the template, schema and quality rules
    pub task_type: String,

    /// Template inputs
    #[serde(default)]
    pub context: Context,

    /// Execution options
    #[serde(default)]
    pub options: RunOptions,
}

impl Task {
    /// Create a task with default options.
    pub fn new(task_type: impl Into<String>, context: Context) -> Self {
        Self {
            task_type: task_type.into(),
            context,
            options: RunOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}
