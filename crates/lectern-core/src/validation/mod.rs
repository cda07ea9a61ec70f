//! Validation of backend responses.
//!
//! Backends are non-deterministic. Every parsed response is checked before
//! it is cached or handed to a caller:
//! - structural checks against the task's JSON Schema (fatal)
//! - heuristic quality checks (warnings only)

mod quality;
mod validator;

pub use quality::{contains_placeholder, scan_placeholders, QualityRule};
pub use validator::{ResponseValidator, ValidationResult};
