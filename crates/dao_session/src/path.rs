use serde_json::Value;
use std::fmt;

/// Canonical lookup key for a subscription path.
///
/// A path is any JSON value, e.g. `["user", "42"]` or `{"table": "posts"}`.
/// The key is its compact JSON serialization. `serde_json` keeps object keys
/// sorted, so structurally equal paths produce the same key regardless of
/// the key order they arrived with, and distinct structures never collide.
/// Integral floats are written as integers, so `[1.0]` and `[1]` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey(String);

impl PathKey {
    pub fn new(path: &Value) -> Self {
        PathKey(canonical(path).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Value> for PathKey {
    fn from(path: &Value) -> Self {
        PathKey::new(path)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Largest integer a double holds exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_991.0;

fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGER => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), canonical(item)))
                .collect(),
        ),
        _ => value.clone(),
    }
}
