use serde_json::Value;

use aaflow_core::types::Context;

/// Resolve a dotted path against `context.data`.
///
/// `item` and `item.<path>` resolve against the current batch element when
/// one is given. Numeric segments index into arrays.
pub fn lookup<'a>(path: &str, ctx: &'a Context, item: Option<&'a Value>) -> Option<&'a Value> {
    let mut segments = path.trim().split('.');
    let first = segments.next()?;

    let mut current = match item {
        Some(item) if first == "item" => item,
        _ => ctx.get(first)?,
    };

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(list) => list.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Text form used when a value is spliced into a larger string.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render `{{path}}` placeholders in a string.
///
/// A string that is exactly one placeholder keeps the referenced value's
/// JSON type. Otherwise placeholders are spliced in as text and missing
/// paths render as empty.
pub fn render_str(template: &str, ctx: &Context, item: Option<&Value>) -> Value {
    if let Some(path) = sole_placeholder(template) {
        return lookup(path, ctx, item).cloned().unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);
        let path = &rest[open + 2..open + 2 + close];
        if let Some(value) = lookup(path, ctx, item) {
            out.push_str(&value_text(value));
        }
        rest = &rest[open + 2 + close + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// Render placeholders in every string inside `template`.
pub fn render(template: &Value, ctx: &Context, item: Option<&Value>) -> Value {
    match template {
        Value::String(s) => render_str(s, ctx, item),
        Value::Array(list) => Value::Array(list.iter().map(|v| render(v, ctx, item)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, ctx, item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render to plain text, for URLs, headers and prompts.
pub fn render_text(template: &str, ctx: &Context) -> String {
    value_text(&render_str(template, ctx, None))
}

fn sole_placeholder(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}
