//! The sorting condition DSL: spec.md §4.7, ported from
//! `original_source/anacsync/sorter.py`'s `_evaluate_condition`.
//!
//! Four binary operators plus the `true`/`false` constants, evaluated
//! against a flat field context. Unlike the original, which fell back to
//! `eval()` for anything it didn't recognize, an unparseable condition here
//! is simply a parse error — there is no sandboxed-`eval` escape hatch to
//! port.

use std::collections::HashMap;

use regex::RegexBuilder;

/// One field lookup in the sort context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Number(u64),
}

impl Value {
    fn as_str_lossy(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(n) => n.to_string(),
        }
    }
}

pub type Context = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Matches { field: String, pattern: String },
    Contains { field: String, substring: String },
    Eq { field: String, expected: String },
    Ne { field: String, expected: String },
    True,
    False,
}

/// Parse a condition string, matching the original's operator precedence:
/// `matches`, then `contains`, then `==`, then `!=`, then the two literal
/// constants.
fn parse(condition: &str) -> Result<Condition, String> {
    let trimmed = condition.trim();

    if let Some((field, pattern)) = trimmed.split_once(" matches ") {
        return Ok(Condition::Matches {
            field: field.trim().to_string(),
            pattern: unquote(pattern.trim()),
        });
    }
    if let Some((field, substring)) = trimmed.split_once(" contains ") {
        return Ok(Condition::Contains {
            field: field.trim().to_string(),
            substring: unquote(substring.trim()),
        });
    }
    if let Some((field, expected)) = trimmed.split_once(" == ") {
        return Ok(Condition::Eq {
            field: field.trim().to_string(),
            expected: unquote(expected.trim()),
        });
    }
    if let Some((field, expected)) = trimmed.split_once(" != ") {
        return Ok(Condition::Ne {
            field: field.trim().to_string(),
            expected: unquote(expected.trim()),
        });
    }
    match trimmed {
        "true" => Ok(Condition::True),
        "false" => Ok(Condition::False),
        other => Err(format!("unrecognized sorting condition: {other:?}")),
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'').to_string()
}

/// Evaluate a parsed condition against a context. A missing field behaves
/// as an empty string, matching the original's `context.get(field, '')`.
pub fn evaluate(condition: &Condition, context: &Context) -> bool {
    match condition {
        Condition::Matches { field, pattern } => {
            let value = lookup(context, field);
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(&value))
                .unwrap_or(false)
        }
        Condition::Contains { field, substring } => {
            let value = lookup(context, field).to_ascii_lowercase();
            value.contains(&substring.to_ascii_lowercase())
        }
        Condition::Eq { field, expected } => lookup(context, field) == *expected,
        Condition::Ne { field, expected } => lookup(context, field) != *expected,
        Condition::True => true,
        Condition::False => false,
    }
}

fn lookup(context: &Context, field: &str) -> String {
    context.get(field).map(|v| v.as_str_lossy()).unwrap_or_default()
}

/// Parse and evaluate in one step, returning `false` (never erroring out a
/// whole sort run) when the condition string is malformed.
pub fn matches(raw_condition: &str, context: &Context) -> bool {
    match parse(raw_condition) {
        Ok(condition) => evaluate(&condition, context),
        Err(_) => false,
    }
}
