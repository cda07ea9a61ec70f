//! Response validation ensures backend output is safe to consume.
//!
//! Schema errors are fatal: the response must not be cached or returned.
//! Quality warnings are advisory: the response still flows to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::quality::{scan_placeholders, QualityRule};
use crate::schema::ResponseSchema;
use crate::templates::PromptTemplate;
use crate::types::Context;

/// Outcome of validating one response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// False if any structural check failed
    pub valid: bool,

    /// Structural violations, in schema order
    pub schema_errors: Vec<String>,

    /// Heuristic findings that do not invalidate the response
    pub quality_warnings: Vec<String>,
}

impl ValidationResult {
    /// True if the response passed every structural check.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// True if any quality heuristic fired.
    pub fn has_warnings(&self) -> bool {
        !self.quality_warnings.is_empty()
    }
}

/// Validates parsed responses against a task's schema and quality rules.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self
    }

    /// Validate a response against a schema.
    ///
    /// Runs the structural check and the placeholder scan. Task-specific
    /// rules need the request context; see [`validate_for`](Self::validate_for).
    pub fn validate(
        &self,
        task_type: &str,
        response: &JsonValue,
        schema: &ResponseSchema,
    ) -> ValidationResult {
        self.validate_with_rules(task_type, response, schema, &[], &Context::new())
    }

    /// Validate a response using everything a template declares.
    pub fn validate_for(
        &self,
        template: &dyn PromptTemplate,
        response: &JsonValue,
        context: &Context,
    ) -> ValidationResult {
        self.validate_with_rules(
            template.task_type(),
            response,
            template.schema(),
            template.quality_rules(),
            context,
        )
    }

    /// Validate a response against a schema and an explicit rule list.
    pub fn validate_with_rules(
        &self,
        task_type: &str,
        response: &JsonValue,
        schema: &ResponseSchema,
        rules: &[QualityRule],
        context: &Context,
    ) -> ValidationResult {
        let schema_errors = schema.check(response);

        let mut quality_warnings = scan_placeholders(response);
        quality_warnings.extend(rules.iter().filter_map(|rule| rule.apply(response, context)));

        if !schema_errors.is_empty() {
            tracing::debug!(
                task_type,
                errors = schema_errors.len(),
                "Response failed schema validation"
            );
        }

        ValidationResult {
            valid: schema_errors.is_empty(),
            schema_errors,
            quality_warnings,
        }
    }
}
