//! # lectern-runtime
//!
//! Resilient execution of LLM tasks.
//!
//! `lectern-core` decides what to ask and what an acceptable answer looks
//! like. This crate does the asking, wrapping every backend call in:
//! - a result cache keyed by a fingerprint of the request
//! - a per-provider circuit breaker
//! - bounded retries with exponential backoff
//! - schema validation before anything is returned or cached
//! - per-task-type metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use lectern_runtime::{Orchestrator, RuntimeConfig, ScriptedProvider};
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(RuntimeConfig::default().with_default_provider("scripted"))
//!     .provider(Arc::new(ScriptedProvider::new("scripted").with_json(reply)))
//!     .build()?;
//!
//! let output = orchestrator.run("eli5", &context, &RunOptions::default()).await?;
//! println!("{}", output.value["explanation"]);
//! orchestrator.print_metrics();
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod resilience;

pub use cache::{fingerprint, CacheConfig, CacheStats, CachedResult, ResultCache};
pub use config::{ConfigError, LoggingConfig, RuntimeConfig};
pub use error::{ErrorKind, PipelineError};
pub use metrics::{
    FailureReason, LatencySummary, MetricsConfig, MetricsRecorder, MetricsSnapshot,
    TaskMetricsSnapshot, UsageTotals,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, TaskOutput};
pub use providers::{
    extract_json, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, ScriptedProvider, ScriptedReply, TokenUsage,
};
pub use resilience::{
    with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitStatus,
    RetryPolicy, RetryableError,
};

pub use lectern_core::{Context, RunOptions, Task};
