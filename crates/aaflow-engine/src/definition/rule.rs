use serde_json::Value;

use aaflow_core::types::Context;

use super::template::{lookup, value_text};

/// A parsed `key OP "value"` test against context data.
///
/// Supported forms are `key == "v"`, `key != "v"` and `key contains "v"`.
/// Non-string data is compared by its JSON text, so `count == 3` matches a
/// numeric 3. A missing key never matches, whatever the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Contains { key: String, value: String },
}

impl Condition {
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();

        if let Some((key, value)) = split_operator(expr, " contains ") {
            return Some(Self::Contains { key, value });
        }
        if let Some((key, value)) = split_operator(expr, "!=") {
            return Some(Self::NotEquals { key, value });
        }
        if let Some((key, value)) = split_operator(expr, "==") {
            return Some(Self::Equals { key, value });
        }
        None
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        match self {
            Self::Equals { key, value } => {
                lookup(key, ctx, None).is_some_and(|v| value_text(v) == *value)
            }
            Self::NotEquals { key, value } => {
                lookup(key, ctx, None).is_some_and(|v| value_text(v) != *value)
            }
            Self::Contains { key, value } => match lookup(key, ctx, None) {
                Some(Value::Array(list)) => list.iter().any(|v| value_text(v) == *value),
                Some(Value::String(s)) => s.contains(value.as_str()),
                _ => false,
            },
        }
    }
}

fn split_operator(expr: &str, op: &str) -> Option<(String, String)> {
    let (key, value) = expr.split_once(op)?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.to_string(), value.to_string()))
}
