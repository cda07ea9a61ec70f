//! Heuristic quality checks for backend responses.
//!
//! Quality checks never invalidate a response. They flag output that is
//! structurally fine but looks unfinished: placeholder text, explanations that
//! are too short to be useful, or answers that just parrot the input.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::Context;

lazy_static! {
    /// Placeholder patterns, each paired with the label used in warnings.
    static ref PLACEHOLDER_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("lorem ipsum", Regex::new(r"(?i)\blorem ipsum\b").unwrap()),
        (
            "bracketed placeholder",
            Regex::new(r"(?i)\[(?:insert|placeholder|your|add)\b[^\]]*\]").unwrap(),
        ),
        (
            "angle-bracket placeholder",
            Regex::new(r"(?i)<(?:placeholder|insert)\b[^>]*>").unwrap(),
        ),
        ("TODO marker", Regex::new(r"\b(?:TODO|TBD|FIXME)\b").unwrap()),
        ("unrendered template variable", Regex::new(r"\{\{\s*\w+\s*\}\}").unwrap()),
        ("filler text", Regex::new(r"(?i)\bx{3,}\b").unwrap()),
    ];
}

/// A per-task heuristic applied after structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityRule {
    /// A string field shorter than `chars` characters is suspicious
    MinLength { field: String, chars: usize },

    /// An array field must not contain blank strings
    NonEmptyItems { field: String },

    /// A string field must not simply repeat a context value
    NoEcho { field: String, context_key: String },
}

impl QualityRule {
    /// Shorthand for [`QualityRule::MinLength`].
    pub fn min_length(field: impl Into<String>, chars: usize) -> Self {
        Self::MinLength {
            field: field.into(),
            chars,
        }
    }

    /// Shorthand for [`QualityRule::NonEmptyItems`].
    pub fn non_empty_items(field: impl Into<String>) -> Self {
        Self::NonEmptyItems {
            field: field.into(),
        }
    }

    /// Shorthand for [`QualityRule::NoEcho`].
    pub fn no_echo(field: impl Into<String>, context_key: impl Into<String>) -> Self {
        Self::NoEcho {
            field: field.into(),
            context_key: context_key.into(),
        }
    }

    /// Apply the rule, returning a warning if it fires.
    ///
    /// Missing or mistyped fields are left to the schema check.
    pub fn apply(&self, response: &JsonValue, context: &Context) -> Option<String> {
        match self {
            QualityRule::MinLength { field, chars } => {
                let text = response.get(field)?.as_str()?;
                let actual = text.trim().chars().count();
                (actual < *chars).then(|| {
                    format!(
                        "{} is suspiciously short ({} chars, expected at least {})",
                        field, actual, chars
                    )
                })
            }
            QualityRule::NonEmptyItems { field } => {
                let items = response.get(field)?.as_array()?;
                let blank = items
                    .iter()
                    .filter(|item| item.as_str().is_some_and(|s| s.trim().is_empty()))
                    .count();
                (blank > 0).then(|| format!("{} contains {} blank item(s)", field, blank))
            }
            QualityRule::NoEcho { field, context_key } => {
                let text = response.get(field)?.as_str()?;
                let source = context.get(context_key)?.as_str()?;
                (normalize(text) == normalize(source) && !source.trim().is_empty())
                    .then(|| format!("{} repeats the input '{}' verbatim", field, context_key))
            }
        }
    }
}

/// Scan every string in the response for placeholder text.
///
/// Returns one warning per (pattern, location) pair.
pub fn scan_placeholders(response: &JsonValue) -> Vec<String> {
    let mut warnings = Vec::new();
    walk_strings(response, String::new(), &mut |path, text| {
        for (label, pattern) in PLACEHOLDER_PATTERNS.iter() {
            if pattern.is_match(text) {
                let location = if path.is_empty() { "/" } else { path };
                warnings.push(format!("placeholder text ({}) at {}", label, location));
            }
        }
    });
    warnings
}

/// Check if text contains any known placeholder pattern.
pub fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER_PATTERNS.iter().any(|(_, p)| p.is_match(text))
}

fn walk_strings(value: &JsonValue, path: String, visit: &mut dyn FnMut(&str, &str)) {
    match value {
        JsonValue::String(s) => visit(&path, s),
        JsonValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk_strings(item, format!("{}/{}", path, i), visit);
            }
        }
        JsonValue::Object(map) => {
            for (key, item) in map {
                walk_strings(item, format!("{}/{}", path, key), visit);
            }
        }
        _ => {}
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
