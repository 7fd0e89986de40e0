//! `{{path}}` placeholders in step configs

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use super::ActionError;

/// `{{ path }}`, capturing the trimmed path
const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([^{}]*?)\s*\}\}";

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> Result<&'static Regex, ActionError> {
    if let Some(regex) = PLACEHOLDER.get() {
        return Ok(regex);
    }
    let regex = Regex::new(PLACEHOLDER_PATTERN)
        .map_err(|e| ActionError::non_retryable(format!("placeholder pattern: {e}")))?;
    Ok(PLACEHOLDER.get_or_init(|| regex))
}

/// Look up a dotted path (`event.payload.email`, `steps.0.contact_id`)
pub fn lookup_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(scope, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Render every placeholder in `config` against `scope`
///
/// A string that is exactly one placeholder takes the referenced value with
/// its JSON type (missing paths become `null`). Placeholders embedded in
/// longer strings are interpolated as text (missing paths become empty).
pub fn render(config: &Value, scope: &Value) -> Result<Value, ActionError> {
    render_with(placeholder()?, config, scope)
}

fn render_with(regex: &Regex, config: &Value, scope: &Value) -> Result<Value, ActionError> {
    Ok(match config {
        Value::String(s) => render_string(regex, s, scope),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_with(regex, v, scope))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_with(regex, v, scope)?)))
                .collect::<Result<_, ActionError>>()?,
        ),
        other => other.clone(),
    })
}

fn render_string(regex: &Regex, s: &str, scope: &Value) -> Value {
    let trimmed = s.trim();
    if let Some(caps) = regex.captures(trimmed) {
        let whole = caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == trimmed.len());
        if whole {
            return lookup_path(scope, &caps[1]).cloned().unwrap_or(Value::Null);
        }
    }

    let rendered = regex.replace_all(s, |caps: &Captures| {
        lookup_path(scope, &caps[1]).map(as_text).unwrap_or_default()
    });
    Value::String(rendered.into_owned())
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
