//! Built-in task templates.
//!
//! Template bodies are deliberately plain: the interesting behaviour lives in
//! the schema and quality rules each one declares.

use serde_json::{json, Value as JsonValue};

use super::{PromptTemplate, TemplateError};
use crate::schema::ResponseSchema;
use crate::types::Context;
use crate::validation::QualityRule;

/// System prompt shared by every task type.
pub const SYSTEM_PROMPT: &str = r#"
You are a careful educational content assistant.

## Output Contract
1. Respond with exactly ONE JSON object and nothing else
2. Use exactly the field names requested in the task
3. Never leave placeholder text such as "TODO" or "[insert ...]"
4. If you are unsure, say so inside the relevant field instead of inventing facts
"#;

/// A template backed by a render function and a static field list.
pub struct SimpleTemplate {
    task_type: &'static str,
    description: &'static str,
    required: &'static [&'static str],
    render: fn(&Context) -> String,
    schema: ResponseSchema,
    rules: Vec<QualityRule>,
}

impl SimpleTemplate {
    /// Create a template.
    ///
    /// `required` lists context fields that must be present and non-empty.
    pub fn new(
        task_type: &'static str,
        description: &'static str,
        required: &'static [&'static str],
        render: fn(&Context) -> String,
        schema: JsonValue,
    ) -> Self {
        Self {
            task_type,
            description,
            required,
            render,
            schema: ResponseSchema::new(schema),
            rules: Vec::new(),
        }
    }

    /// Add a quality rule.
    pub fn with_rule(mut self, rule: QualityRule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl PromptTemplate for SimpleTemplate {
    fn task_type(&self) -> &str {
        self.task_type
    }

    fn description(&self) -> &str {
        self.description
    }

    fn build(&self, context: &Context) -> Result<String, TemplateError> {
        for field in self.required {
            let present = match context.get(*field) {
                None | Some(JsonValue::Null) => false,
                Some(JsonValue::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(TemplateError::MissingContext {
                    task_type: self.task_type.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok((self.render)(context))
    }

    fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    fn quality_rules(&self) -> &[QualityRule] {
        &self.rules
    }
}

/// Every built-in template, in registration order.
pub fn builtin_templates() -> Vec<SimpleTemplate> {
    vec![eli5(), explanation(), hint(), quiz(), summary()]
}

fn eli5() -> SimpleTemplate {
    SimpleTemplate::new(
        "eli5",
        "Explain a question and its answer to a ten-year-old",
        &["question", "answer"],
        |ctx| {
            format!(
                r#"Explain this question and its answer as if to a curious ten-year-old.

Question: {}
Answer: {}

Return JSON with:
- "explanation": a friendly explanation in plain words (3-5 sentences)
- "analogy": one everyday analogy
- "key_points": 1 to 5 short takeaways"#,
                field(ctx, "question"),
                field(ctx, "answer")
            )
        },
        json!({
            "type": "object",
            "required": ["explanation", "analogy", "key_points"],
            "properties": {
                "explanation": {"type": "string", "minLength": 1},
                "analogy": {"type": "string"},
                "key_points": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5
                }
            }
        }),
    )
    .with_rule(QualityRule::min_length("explanation", 80))
    .with_rule(QualityRule::non_empty_items("key_points"))
    .with_rule(QualityRule::no_echo("explanation", "answer"))
}

fn explanation() -> SimpleTemplate {
    SimpleTemplate::new(
        "explanation",
        "Explain why an answer is correct",
        &["question", "answer"],
        |ctx| {
            let subject = match ctx.get("subject") {
                Some(_) => format!("Subject: {}\n", field(ctx, "subject")),
                None => String::new(),
            };
            format!(
                r#"{}Question: {}
Correct answer: {}

Explain step by step why the answer is correct.

Return JSON with:
- "explanation": the reasoning
- "difficulty": one of "easy", "medium", "hard"
- "misconceptions": common wrong answers and why they are wrong (may be empty)"#,
                subject,
                field(ctx, "question"),
                field(ctx, "answer")
            )
        },
        json!({
            "type": "object",
            "required": ["explanation", "difficulty", "misconceptions"],
            "properties": {
                "explanation": {"type": "string", "minLength": 1},
                "difficulty": {"type": "string", "enum": ["easy", "medium", "hard"]},
                "misconceptions": {"type": "array", "items": {"type": "string"}}
            }
        }),
    )
    .with_rule(QualityRule::min_length("explanation", 120))
    .with_rule(QualityRule::non_empty_items("misconceptions"))
    .with_rule(QualityRule::no_echo("explanation", "answer"))
}

fn hint() -> SimpleTemplate {
    SimpleTemplate::new(
        "hint",
        "Nudge a learner towards an answer without revealing it",
        &["question"],
        |ctx| {
            let level = ctx.get("level").and_then(JsonValue::as_u64).unwrap_or(1);
            format!(
                r#"Write a level {} hint (1 = gentle, 3 = strong) for this question.
Do not reveal the answer.

Question: {}

Return JSON with:
- "hint": the hint text
- "level": the hint level as an integer from 1 to 3
- "reveals_answer": true if the hint gives the answer away"#,
                level,
                field(ctx, "question")
            )
        },
        json!({
            "type": "object",
            "required": ["hint", "level", "reveals_answer"],
            "properties": {
                "hint": {"type": "string", "minLength": 1},
                "level": {"type": "integer", "minimum": 1, "maximum": 3},
                "reveals_answer": {"type": "boolean"}
            }
        }),
    )
    .with_rule(QualityRule::min_length("hint", 20))
}

fn quiz() -> SimpleTemplate {
    SimpleTemplate::new(
        "quiz",
        "Generate multiple-choice questions on a topic",
        &["topic"],
        |ctx| {
            let count = ctx.get("count").and_then(JsonValue::as_u64).unwrap_or(3);
            format!(
                r#"Write {} multiple-choice questions about: {}

Return JSON with:
- "questions": an array where each item has
  - "prompt": the question text
  - "choices": 2 to 5 answer options
  - "answer_index": zero-based index of the correct choice
  - "rationale": why that choice is correct"#,
                count,
                field(ctx, "topic")
            )
        },
        json!({
            "type": "object",
            "required": ["questions"],
            "properties": {
                "questions": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["prompt", "choices", "answer_index", "rationale"],
                        "properties": {
                            "prompt": {"type": "string", "minLength": 1},
                            "choices": {
                                "type": "array",
                                "items": {"type": "string"},
                                "minItems": 2,
                                "maxItems": 5
                            },
                            "answer_index": {"type": "integer", "minimum": 0},
                            "rationale": {"type": "string"}
                        }
                    }
                }
            }
        }),
    )
}

fn summary() -> SimpleTemplate {
    SimpleTemplate::new(
        "summary",
        "Summarize study material",
        &["text"],
        |ctx| {
            format!(
                r#"Summarize the following study material for revision.

Material:
{}

Return JSON with:
- "summary": a short paragraph
- "bullet_points": the most important facts"#,
                field(ctx, "text")
            )
        },
        json!({
            "type": "object",
            "required": ["summary", "bullet_points"],
            "properties": {
                "summary": {"type": "string", "minLength": 1},
                "bullet_points": {"type": "array", "items": {"type": "string"}}
            }
        }),
    )
    .with_rule(QualityRule::min_length("summary", 40))
    .with_rule(QualityRule::non_empty_items("bullet_points"))
    .with_rule(QualityRule::no_echo("summary", "text"))
}

/// Render a context field for interpolation.
fn field(ctx: &Context, key: &str) -> String {
    match ctx.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
