//! # lectern-core
//!
//! Deterministic building blocks for the Lectern task pipeline.
//!
//! This crate answers two questions for every task type:
//! - What prompt do we send?
//! - What does an acceptable response look like?
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: nothing here talks to a backend
//! 2. **Explicit lookup**: unknown task types fail with an error, never a default
//! 3. **Fatal vs advisory**: schema violations invalidate a response, quality
//!    heuristics only warn
//!
//! ## Example
//!
//! ```rust,ignore
//! use lectern_core::{Context, ResponseValidator, TemplateRegistry};
//!
//! let registry = TemplateRegistry::with_defaults();
//! let template = registry.resolve("eli5")?;
//! let prompt = template.build(&context)?;
//!
//! let result = ResponseValidator::new().validate_for(template.as_ref(), &parsed, &context);
//! if !result.is_valid() {
//!     eprintln!("rejected: {:?}", result.schema_errors);
//! }
//! ```

pub mod schema;
pub mod templates;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use schema::{ResponseSchema, SchemaError};
pub use templates::{PromptTemplate, SimpleTemplate, TemplateError, TemplateRegistry, SYSTEM_PROMPT};
pub use types::{Context, RunOptions, Task};
pub use validation::{QualityRule, ResponseValidator, ValidationResult};
