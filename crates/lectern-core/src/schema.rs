//! Structural response schemas.
//!
//! Each task type declares the shape of a valid backend response as a JSON
//! Schema document. The schema is compiled once, on first use, and reused for
//! every response of that task type.

use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors from schema compilation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Invalid response schema: {0}")]
    Invalid(String),
}

/// A JSON Schema describing a valid response for one task type.
pub struct ResponseSchema {
    raw: JsonValue,
    compiled: OnceLock<Result<jsonschema::Validator, String>>,
}

impl ResponseSchema {
    /// Wrap a JSON Schema document. Compilation is deferred to first use.
    pub fn new(raw: JsonValue) -> Self {
        Self {
            raw,
            compiled: OnceLock::new(),
        }
    }

    /// The schema document as JSON.
    pub fn as_json(&self) -> &JsonValue {
        &self.raw
    }

    /// Top-level fields the schema marks as required.
    pub fn required_fields(&self) -> Vec<&str> {
        self.raw["required"]
            .as_array()
            .map(|fields| fields.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default()
    }

    /// Compile the schema eagerly, surfacing errors at registration time.
    pub fn compile(&self) -> Result<(), SchemaError> {
        self.validator().map(|_| ())
    }

    /// Check an instance, returning one message per structural violation.
    ///
    /// An empty list means the instance conforms.
    pub fn check(&self, instance: &JsonValue) -> Vec<String> {
        let validator = match self.validator() {
            Ok(v) => v,
            Err(e) => return vec![e.to_string()],
        };

        validator
            .iter_errors(instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                format!("{} at {}", e, path)
            })
            .collect()
    }

    fn validator(&self) -> Result<&jsonschema::Validator, SchemaError> {
        let result = self.compiled.get_or_init(|| {
            jsonschema::options()
                .build(&self.raw)
                .map_err(|e| format!("failed to compile schema: {}", e))
        });

        match result {
            Ok(v) => Ok(v),
            Err(e) => Err(SchemaError::Invalid(e.clone())),
        }
    }
}

impl Clone for ResponseSchema {
    fn clone(&self) -> Self {
        Self::new(self.raw.clone())
    }
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("required", &self.required_fields())
            .field("compiled", &self.compiled.get().map(|r| r.is_ok()))
            .finish()
    }
}
