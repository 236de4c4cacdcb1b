use serde_json::{Map, Value};

pub(crate) type Record = Map<String, Value>;

pub(crate) fn object(value: Option<&Value>) -> Option<&Record> {
    value.and_then(Value::as_object)
}

pub(crate) fn objects(value: Option<&Value>) -> Vec<&Record> {
    match value {
        Some(Value::Array(entries)) => entries.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Strings pass through, numbers are stringified, anything else is empty.
pub(crate) fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(raw)) => raw.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

/// Booleans count as 0/1 and floats truncate toward zero.
pub(crate) fn integer(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Bool(flag)) => i64::from(*flag),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_u64().map(|_| i64::MAX))
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
            .unwrap_or(default),
        _ => default,
    }
}

pub(crate) fn decimal(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Bool(flag)) => f64::from(u8::from(*flag)),
        Some(Value::Number(number)) => number.as_f64().unwrap_or(default),
        _ => default,
    }
}

pub(crate) fn boolean(value: Option<&Value>) -> Option<bool> {
    value.and_then(Value::as_bool)
}

pub(crate) fn strings(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::Array(entries)) => entries.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn join_non_empty(parts: &[String], separator: &str) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}
