//! Repair pipeline for model output that should be JSON.
//!
//! Reasoning models wrap JSON in prose or code fences, nest stringified JSON
//! inside JSON, mix quote styles, and occasionally return a bare string where
//! an object was requested. Each stage here is a pure function over text or a
//! `serde_json::Value`, applied in order by [`repair_to_value`].

use serde_json::Value;

/// Extracts the first balanced JSON object or array from free text.
/// Tracks string/escape state so braces inside strings do not count.
pub fn extract_balanced_json(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find(['{', '['])?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts candidate JSON from fenced code blocks (```json ... ``` or bare fences).
pub fn extract_from_fences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        let Some(close) = body.find("```") else { break };
        let candidate = body[..close].trim();
        if candidate.starts_with('{') || candidate.starts_with('[') {
            out.push(candidate);
        }
        rest = &body[close + 3..];
    }
    out
}

/// Last-resort quote repair: single quotes become double quotes. Only worth
/// trying after standard parsing failed.
pub fn repair_quotes(text: &str) -> String {
    text.replace('\'', "\"")
}

/// Recursively parses any string that itself looks like a JSON object or
/// array. Handles models that return JSON strings inside JSON.
pub fn parse_nested_strings(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, parse_nested_strings(v)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(parse_nested_strings).collect())
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if (trimmed.starts_with('{') && trimmed.ends_with('}'))
                || (trimmed.starts_with('[') && trimmed.ends_with(']'))
            {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed) => parse_nested_strings(parsed),
                    Err(_) => Value::String(s),
                }
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// Drops `null` entries from arrays (models pad lists with nulls).
pub fn filter_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter().map(|(k, v)| (k, filter_nulls(v))).collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(filter_nulls)
                .collect(),
        ),
        other => other,
    }
}

/// Wraps bare strings found in arrays of objects into the target object
/// shape: the string becomes the value of `primary_key`, remaining keys get
/// empty strings. Used where a topic object was expected and the model
/// returned just a title.
pub fn coerce_string_items(value: Value, primary_key: &str, other_keys: &[&str]) -> Value {
    match value {
        Value::Array(items) => {
            let any_object = items.iter().any(Value::is_object);
            Value::Array(
                items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) if any_object || !s.is_empty() => {
                            let mut obj = serde_json::Map::new();
                            obj.insert(primary_key.to_string(), Value::String(s));
                            for k in other_keys {
                                obj.insert((*k).to_string(), Value::String(String::new()));
                            }
                            Value::Object(obj)
                        }
                        other => coerce_string_items(other, primary_key, other_keys),
                    })
                    .collect(),
            )
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, coerce_string_items(v, primary_key, other_keys)))
                .collect(),
        ),
        other => other,
    }
}

/// Full repair: raw model text to a JSON value.
///
/// Order: direct parse → balanced extraction → fenced blocks → quote repair,
/// then nested-string parsing and null filtering on whatever parsed.
pub fn repair_to_value(raw: &str) -> Result<Value, String> {
    let candidates: Vec<String> = std::iter::once(raw.trim().to_string())
        .chain(extract_balanced_json(raw).map(str::to_string))
        .chain(extract_from_fences(raw).into_iter().map(str::to_string))
        .collect();

    for candidate in &candidates {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            return Ok(filter_nulls(parse_nested_strings(v)));
        }
    }
    for candidate in &candidates {
        if let Ok(v) = serde_json::from_str::<Value>(&repair_quotes(candidate)) {
            return Ok(filter_nulls(parse_nested_strings(v)));
        }
    }
    Err(format!(
        "no parseable JSON in model output ({} chars)",
        raw.len()
    ))
}
