//! Token substitution for setup documents.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{PtpError, PtpResult};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap()
});

/// Replace every `{{ dotted.token }}` with its scalar value from `context`.
/// Undefined tokens and tokens resolving to objects or arrays are errors.
pub fn render_template(text: &str, context: &Value) -> PtpResult<String> {
    let mut rendered = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in TOKEN_RE.captures_iter(text) {
        #[allow(clippy::unwrap_used)]
        let whole = caps.get(0).unwrap();
        let token = &caps[1];
        rendered.push_str(&text[last_end..whole.start()]);
        rendered.push_str(&resolve_token(token, context)?);
        last_end = whole.end();
    }
    rendered.push_str(&text[last_end..]);
    Ok(rendered)
}

fn resolve_token(token: &str, context: &Value) -> PtpResult<String> {
    let mut current = context;
    for part in token.split('.') {
        current = current.get(part).ok_or_else(|| {
            PtpError::Template(format!("undefined token '{token}' in setup template"))
        })?;
    }
    match current {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(PtpError::Template(format!(
            "token '{token}' does not resolve to a scalar"
        ))),
    }
}

/// Recursively replace string values that hold embedded JSON (they start
/// with `{` or `[`) by their parsed form. Strings that fail to parse are
/// left alone.
pub fn parse_embedded_json(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match json5::from_str::<Value>(&s) {
                    Ok(parsed) => parse_embedded_json(parsed),
                    Err(_) => Value::String(s),
                }
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(parse_embedded_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, parse_embedded_json(v)))
                .collect(),
        ),
        other => other,
    }
}
