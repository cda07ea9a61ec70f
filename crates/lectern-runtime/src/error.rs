//! Pipeline error taxonomy.

use lectern_core::TemplateError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::FailureReason;
use crate::providers::ProviderError;
use crate::resilience::RetryableError;

/// Errors returned by [`Orchestrator::run`](crate::Orchestrator::run).
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Unknown task type: '{task_type}'. Available: {available:?}")]
    UnknownTaskType {
        task_type: String,
        available: Vec<String>,
    },

    #[error("Invalid context for task '{task_type}': {message}")]
    InvalidContext { task_type: String, message: String },

    #[error("Unknown provider: '{provider}'. Available: {available:?}")]
    UnknownProvider {
        provider: String,
        available: Vec<String>,
    },

    #[error("Circuit open for provider '{provider}', backend not called")]
    CircuitOpen { provider: String },

    #[error("Provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("Provider '{provider}' returned unparsable output: {snippet}")]
    Parse { provider: String, snippet: String },

    #[error("Response for task '{task_type}' failed schema validation: {}", .errors.join("; "))]
    ValidationSchema {
        task_type: String,
        errors: Vec<String>,
    },

    #[error("Result for task '{task_type}' does not match the requested type: {message}")]
    Decode { task_type: String, message: String },
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTaskType,
    InvalidContext,
    UnknownProvider,
    CircuitOpen,
    Provider,
    Parse,
    ValidationSchema,
    Decode,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnknownTaskType { .. } => ErrorKind::UnknownTaskType,
            PipelineError::InvalidContext { .. } => ErrorKind::InvalidContext,
            PipelineError::UnknownProvider { .. } => ErrorKind::UnknownProvider,
            PipelineError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            PipelineError::Provider { .. } => ErrorKind::Provider,
            PipelineError::Parse { .. } => ErrorKind::Parse,
            PipelineError::ValidationSchema { .. } => ErrorKind::ValidationSchema,
            PipelineError::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// Metrics bucket this failure is counted under.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            PipelineError::UnknownTaskType { .. }
            | PipelineError::InvalidContext { .. }
            | PipelineError::UnknownProvider { .. } => FailureReason::Usage,
            PipelineError::CircuitOpen { .. } => FailureReason::CircuitBreaker,
            PipelineError::Provider { .. } | PipelineError::Parse { .. } => {
                FailureReason::Provider
            }
            PipelineError::ValidationSchema { .. } | PipelineError::Decode { .. } => {
                FailureReason::Validation
            }
        }
    }

    /// Schema errors, when this is a validation failure.
    pub fn schema_errors(&self) -> &[String] {
        match self {
            PipelineError::ValidationSchema { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl RetryableError for PipelineError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Provider { .. } | PipelineError::Parse { .. }
        )
    }
}

impl From<TemplateError> for PipelineError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::UnknownTaskType {
                task_type,
                available,
            } => PipelineError::UnknownTaskType {
                task_type,
                available,
            },
            TemplateError::MissingContext { task_type, field } => PipelineError::InvalidContext {
                task_type,
                message: format!("missing required context field '{field}'"),
            },
        }
    }
}

/// First `max` characters of backend output, for error messages.
pub(crate) fn snippet(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_backend_failures_are_retryable() {
        let provider = PipelineError::Provider {
            provider: "anthropic".into(),
            source: ProviderError::Timeout(Duration::from_secs(60)),
        };
        let parse = PipelineError::Parse {
            provider: "anthropic".into(),
            snippet: "not json".into(),
        };
        let schema = PipelineError::ValidationSchema {
            task_type: "eli5".into(),
            errors: vec!["\"explanation\" is a required property at /".into()],
        };
        let circuit = PipelineError::CircuitOpen {
            provider: "anthropic".into(),
        };

        assert!(provider.is_retryable());
        assert!(parse.is_retryable());
        assert!(!schema.is_retryable());
        assert!(!circuit.is_retryable());
    }

    #[test]
    fn test_failure_reasons() {
        let unknown = PipelineError::UnknownTaskType {
            task_type: "haiku".into(),
            available: vec!["eli5".into()],
        };
        assert_eq!(unknown.failure_reason(), FailureReason::Usage);
        assert_eq!(unknown.kind(), ErrorKind::UnknownTaskType);

        let circuit = PipelineError::CircuitOpen {
            provider: "anthropic".into(),
        };
        assert_eq!(circuit.failure_reason(), FailureReason::CircuitBreaker);
    }

    #[test]
    fn test_from_template_error() {
        let err: PipelineError = TemplateError::MissingContext {
            task_type: "hint".into(),
            field: "question".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidContext);
        assert!(err.to_string().contains("question"));
    }

    #[test]
    fn test_validation_message_lists_errors() {
        let err = PipelineError::ValidationSchema {
            task_type: "eli5".into(),
            errors: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().ends_with("a; b"));
        assert_eq!(err.schema_errors().len(), 2);
    }

    #[test]
    fn test_snippet_truncates() {
        assert_eq!(snippet("abcdef", 3), "abc...");
        assert_eq!(snippet("abc", 3), "abc");
    }
}
