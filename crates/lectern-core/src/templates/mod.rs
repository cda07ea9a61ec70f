//! Prompt templates and the registry that resolves them by task type.
//!
//! A template turns a task context into a prompt and declares what a valid
//! response looks like. Templates hold no state; the registry is a lookup
//! table built once at startup.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = TemplateRegistry::with_defaults();
//! let template = registry.resolve("eli5")?;
//! let prompt = template.build(&context)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::schema::ResponseSchema;
use crate::types::Context;
use crate::validation::QualityRule;

mod builtin;

pub use builtin::{builtin_templates, SimpleTemplate, SYSTEM_PROMPT};

/// Errors from template resolution and rendering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Unknown task type: '{task_type}'. Available: {available:?}")]
    UnknownTaskType {
        task_type: String,
        available: Vec<String>,
    },

    #[error("Task '{task_type}' is missing required context field '{field}'")]
    MissingContext { task_type: String, field: String },
}

/// A prompt builder paired with the contract its responses must satisfy.
pub trait PromptTemplate: Send + Sync {
    /// Task type this template serves (e.g. "eli5").
    fn task_type(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        "Prompt template"
    }

    /// Render the user prompt for a context.
    fn build(&self, context: &Context) -> Result<String, TemplateError>;

    /// Structural contract for parsed responses.
    fn schema(&self) -> &ResponseSchema;

    /// Heuristic checks applied after the schema check.
    fn quality_rules(&self) -> &[QualityRule] {
        &[]
    }
}

/// Registry of prompt templates keyed by task type.
#[derive(Default, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<dyn PromptTemplate>>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in task type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for template in builtin_templates() {
            registry.register(Arc::new(template));
        }
        registry
    }

    /// Register a template, replacing any existing one for the same task type.
    pub fn register(&mut self, template: Arc<dyn PromptTemplate>) {
        if let Err(e) = template.schema().compile() {
            tracing::warn!(
                task_type = template.task_type(),
                error = %e,
                "Registered template has an invalid schema; every response will fail validation"
            );
        }
        self.templates
            .insert(template.task_type().to_string(), template);
    }

    /// Resolve a task type to its template.
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn PromptTemplate>, TemplateError> {
        self.templates
            .get(task_type)
            .cloned()
            .ok_or_else(|| TemplateError::UnknownTaskType {
                task_type: task_type.to_string(),
                available: self.task_types().into_iter().map(String::from).collect(),
            })
    }

    /// List registered task types in sorted order.
    pub fn task_types(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a task type is registered.
    pub fn contains(&self, task_type: &str) -> bool {
        self.templates.contains_key(task_type)
    }

    /// Schema document for a task type.
    pub fn schema_json(&self, task_type: &str) -> Result<JsonValue, TemplateError> {
        self.resolve(task_type).map(|t| t.schema().as_json().clone())
    }
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTemplate {
        schema: ResponseSchema,
    }

    impl PromptTemplate for EchoTemplate {
        fn task_type(&self) -> &str {
            "echo"
        }

        fn build(&self, context: &Context) -> Result<String, TemplateError> {
            Ok(serde_json::to_string(context).unwrap_or_default())
        }

        fn schema(&self) -> &ResponseSchema {
            &self.schema
        }
    }

    #[test]
    fn test_defaults_are_registered() {
        let registry = TemplateRegistry::with_defaults();
        assert_eq!(
            registry.task_types(),
            vec!["eli5", "explanation", "hint", "quiz", "summary"]
        );
    }

    #[test]
    fn test_unknown_task_type() {
        let registry = TemplateRegistry::with_defaults();
        match registry.resolve("haiku") {
            Err(TemplateError::UnknownTaskType { task_type, available }) => {
                assert_eq!(task_type, "haiku");
                assert!(available.contains(&"eli5".to_string()));
            }
            _ => panic!("Expected UnknownTaskType"),
        }
    }

    #[test]
    fn test_register_custom_template() {
        let mut registry = TemplateRegistry::new();
        registry.register(Arc::new(EchoTemplate {
            schema: ResponseSchema::new(json!({"type": "object"})),
        }));

        assert!(registry.contains("echo"));
        let template = registry.resolve("echo").unwrap();
        let mut context = Context::new();
        context.insert("a".into(), json!(1));
        assert_eq!(template.build(&context).unwrap(), r#"{"a":1}"#);
        assert!(template.quality_rules().is_empty());
    }

    #[test]
    fn test_builtin_schemas_compile() {
        let registry = TemplateRegistry::with_defaults();
        for task_type in registry.task_types() {
            let template = registry.resolve(task_type).unwrap();
            assert!(
                template.schema().compile().is_ok(),
                "schema for {} does not compile",
                task_type
            );
        }
    }
}
