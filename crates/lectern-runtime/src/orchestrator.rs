//! Runtime orchestrator for task execution.
//!
//! One call to [`Orchestrator::run`] walks a request through:
//! - template and provider resolution
//! - cache lookup
//! - circuit breaker check
//! - backend call and parse, retried with backoff
//! - schema validation and quality heuristics
//! - cache store and metrics
//!
//! Cache, circuit breaker and metrics are shared by every concurrent run.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use lectern_core::{
    Context, PromptTemplate, ResponseValidator, RunOptions, Task, TemplateRegistry, SYSTEM_PROMPT,
};

use crate::cache::{fingerprint, CacheStats, CachedResult, ResultCache};
use crate::config::{ConfigError, RuntimeConfig};
use crate::error::{snippet, PipelineError};
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ProviderRegistry,
};
use crate::resilience::{with_retry, CircuitBreaker, CircuitSnapshot, RetryableError};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Parsed (and, unless disabled, validated) response
    pub value: JsonValue,

    /// Served from the cache without calling the backend
    pub cache_hit: bool,

    /// Backend attempts made (0 on a cache hit)
    pub attempts: u32,

    /// Advisory findings from the quality heuristics
    pub quality_warnings: Vec<String>,

    /// Provider that produced the value
    pub provider: String,

    /// Cache fingerprint of the request
    pub cache_key: String,
}

/// The orchestrator runs tasks against registered providers.
pub struct Orchestrator {
    config: RuntimeConfig,
    templates: TemplateRegistry,
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
    validator: ResponseValidator,
    cache: Arc<ResultCache>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRecorder>,
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run one task.
    ///
    /// Returns a validated result or an error; never a partial result. With
    /// `options.validate == false` the result is returned unvalidated and is
    /// not cached.
    pub async fn run(
        &self,
        task_type: &str,
        context: &Context,
        options: &RunOptions,
    ) -> Result<TaskOutput, PipelineError> {
        let span = tracing::info_span!(
            "task",
            task_type,
            trace_id = options.trace_id.as_deref().unwrap_or("-")
        );
        self.execute(task_type, context, options)
            .instrument(span)
            .await
    }

    /// Run a [`Task`].
    pub async fn run_task(&self, task: &Task) -> Result<TaskOutput, PipelineError> {
        self.run(&task.task_type, &task.context, &task.options).await
    }

    /// Run a task and decode the result into `T`.
    pub async fn run_as<T: DeserializeOwned>(
        &self,
        task_type: &str,
        context: &Context,
        options: &RunOptions,
    ) -> Result<T, PipelineError> {
        let output = self.run(task_type, context, options).await?;
        serde_json::from_value(output.value).map_err(|e| PipelineError::Decode {
            task_type: task_type.to_string(),
            message: e.to_string(),
        })
    }

    async fn execute(
        &self,
        task_type: &str,
        context: &Context,
        options: &RunOptions,
    ) -> Result<TaskOutput, PipelineError> {
        let started = Instant::now();

        let template = self
            .templates
            .resolve(task_type)
            .map_err(|e| self.fail(task_type, e.into()))?;

        let provider_id = options
            .provider
            .as_deref()
            .unwrap_or(&self.config.default_provider);
        let provider = self
            .providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| {
                self.fail(
                    task_type,
                    PipelineError::UnknownProvider {
                        provider: provider_id.to_string(),
                        available: self.providers.keys().cloned().collect(),
                    },
                )
            })?;

        let prompt = template
            .build(context)
            .map_err(|e| self.fail(task_type, e.into()))?;
        if self.config.logging.log_prompts {
            tracing::debug!(provider = provider_id, %prompt, "Rendered prompt");
        }

        let key = fingerprint(task_type, context, provider_id, &options.params);

        if options.cache {
            if let Some(hit) = self.cache.get(&key).await {
                tracing::debug!(key = %key, "Cache hit");
                self.metrics
                    .record_success(task_type, started.elapsed(), true);
                return Ok(TaskOutput {
                    value: hit.value,
                    cache_hit: true,
                    attempts: 0,
                    quality_warnings: hit.quality_warnings,
                    provider: provider_id.to_string(),
                    cache_key: key,
                });
            }
        }

        if self.circuit_breaker.is_open(provider_id) {
            return Err(self.fail(
                task_type,
                PipelineError::CircuitOpen {
                    provider: provider_id.to_string(),
                },
            ));
        }

        let policy = match options.retries {
            Some(max_attempts) => self.config.retry.clone().with_max_attempts(max_attempts),
            None => self.config.retry.clone(),
        };
        let completion = self.config.completion.clone().with_params(&options.params);
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let provider_ref: &dyn LlmProvider = provider.as_ref();
        let completion_ref = &completion;
        let messages_ref = &messages;

        let outcome = with_retry(
            &policy,
            |attempt| {
                self.metrics.record_retry(task_type);
                tracing::info!(provider = provider_id, attempt, "Retrying backend call");
            },
            move |attempt| {
                attempts_ref.store(attempt, Ordering::SeqCst);
                self.attempt(
                    task_type,
                    provider_id,
                    provider_ref,
                    messages_ref.clone(),
                    completion_ref,
                )
            },
        )
        .await;
        let attempts = attempts.load(Ordering::SeqCst);

        let value = match outcome {
            Ok(value) => {
                self.circuit_breaker.record_success(provider_id);
                value
            }
            Err(err) => {
                if err.is_retryable() {
                    self.circuit_breaker.record_failure(provider_id);
                }
                return Err(self.fail(task_type, err));
            }
        };

        let mut quality_warnings = Vec::new();
        if options.validate {
            let result = self
                .validator
                .validate_for(template.as_ref(), &value, context);
            if !result.is_valid() {
                return Err(self.fail(
                    task_type,
                    PipelineError::ValidationSchema {
                        task_type: task_type.to_string(),
                        errors: result.schema_errors,
                    },
                ));
            }
            if self.config.logging.log_quality_warnings {
                for warning in &result.quality_warnings {
                    tracing::warn!(warning = %warning, "Quality warning");
                }
            }
            quality_warnings = result.quality_warnings;

            if options.cache {
                self.cache
                    .insert(
                        key.clone(),
                        CachedResult::new(value.clone(), quality_warnings.clone()),
                    )
                    .await;
            }
        }

        self.metrics
            .record_success(task_type, started.elapsed(), false);
        tracing::info!(
            provider = provider_id,
            attempts,
            warnings = quality_warnings.len(),
            "Task completed"
        );

        Ok(TaskOutput {
            value,
            cache_hit: false,
            attempts,
            quality_warnings,
            provider: provider_id.to_string(),
            cache_key: key,
        })
    }

    /// One backend call plus parse, bounded by the completion timeout.
    async fn attempt(
        &self,
        task_type: &str,
        provider_id: &str,
        provider: &dyn LlmProvider,
        messages: Vec<ChatMessage>,
        completion: &CompletionConfig,
    ) -> Result<JsonValue, PipelineError> {
        let response =
            match tokio::time::timeout(completion.timeout, provider.complete(messages, completion))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => {
                    return Err(PipelineError::Provider {
                        provider: provider_id.to_string(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(PipelineError::Provider {
                        provider: provider_id.to_string(),
                        source: ProviderError::Timeout(completion.timeout),
                    })
                }
            };

        self.metrics.record_usage(task_type, &response.usage);
        if self.config.logging.log_responses {
            tracing::debug!(provider = provider_id, content = %response.content, "Backend response");
        }

        provider
            .parse_response(&response)
            .ok_or_else(|| PipelineError::Parse {
                provider: provider_id.to_string(),
                snippet: snippet(&response.content, 120),
            })
    }

    /// Meter and log a failed run.
    fn fail(&self, task_type: &str, err: PipelineError) -> PipelineError {
        let reason = err.failure_reason();
        self.metrics.record_failure(task_type, reason);
        tracing::warn!(reason = %reason, kind = ?err.kind(), error = %err, "Task failed");
        err
    }

    /// Metrics for every task type.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Human-readable metrics report.
    pub fn metrics_report(&self) -> String {
        self.metrics.report()
    }

    /// Print the metrics report to stdout.
    pub fn print_metrics(&self) {
        self.metrics.print_report();
    }

    /// Clear all recorded metrics.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Circuit state for one provider.
    pub fn circuit_breaker_state(&self, provider: &str) -> CircuitSnapshot {
        self.circuit_breaker.state(provider)
    }

    /// Circuit states for every provider that has seen traffic.
    pub fn circuit_breaker_states(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.circuit_breaker.states()
    }

    pub fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset();
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Registered provider identifiers.
    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: RuntimeConfig,
    templates: TemplateRegistry,
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
}

impl OrchestratorBuilder {
    /// Default config, built-in templates, no providers.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            templates: TemplateRegistry::with_defaults(),
            providers: BTreeMap::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the template registry.
    pub fn templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    /// Register one more template.
    pub fn template(mut self, template: Arc<dyn PromptTemplate>) -> Self {
        self.templates.register(template);
        self
    }

    /// Register a provider under its [`name`](LlmProvider::name).
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    /// Create a provider through a factory registry and register it.
    pub fn provider_from_config(
        self,
        registry: &ProviderRegistry,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Self, ProviderError> {
        let provider = registry.create(provider_type, config)?;
        Ok(self.provider(provider))
    }

    /// Build the orchestrator.
    ///
    /// Fails if the configuration is invalid or the default provider is not
    /// registered.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;

        if !self.providers.contains_key(&self.config.default_provider) {
            return Err(ConfigError::Invalid(format!(
                "default provider '{}' is not registered (registered: {:?})",
                self.config.default_provider,
                self.providers.keys().collect::<Vec<_>>()
            )));
        }

        let cache = Arc::new(ResultCache::new(&self.config.cache));
        let circuit_breaker = Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone()));
        let metrics = Arc::new(MetricsRecorder::new(self.config.metrics.clone()));

        tracing::debug!(
            providers = ?self.providers.keys().collect::<Vec<_>>(),
            task_types = ?self.templates.task_types(),
            "Orchestrator built"
        );

        Ok(Orchestrator {
            config: self.config,
            templates: self.templates,
            providers: self.providers,
            validator: ResponseValidator::new(),
            cache,
            circuit_breaker,
            metrics,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
