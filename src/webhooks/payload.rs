//! Tolerant accessors over semi-structured webhook payloads.
//!
//! GitHub payloads are deep JSON objects whose optional parts come and go
//! between event types and API versions. Every accessor here returns `None`
//! for a missing or wrongly-typed field instead of failing, so callers decide
//! how absence is rendered.

use serde_json::Value;

/// A borrowed view of a webhook payload.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a>(pub &'a Value);

impl<'a> Payload<'a> {
    pub fn new(value: &'a Value) -> Self {
        Payload(value)
    }

    /// Walks `path` through nested objects.
    pub fn get(&self, path: &[&str]) -> Option<&'a Value> {
        path.iter().try_fold(self.0, |value, segment| value.get(*segment))
    }

    /// Returns the string at `path`, treating an empty string as absent.
    pub fn str(&self, path: &[&str]) -> Option<&'a str> {
        self.get(path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns the string at `path` or `default` when absent.
    pub fn str_or(&self, path: &[&str], default: &'a str) -> &'a str {
        self.str(path).unwrap_or(default)
    }

    pub fn u64(&self, path: &[&str]) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn bool(&self, path: &[&str]) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// Returns the array at `path`, or an empty slice when absent.
    pub fn array(&self, path: &[&str]) -> &'a [Value] {
        self.get(path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The payload's `action` field, if any.
    pub fn action(&self) -> Option<&'a str> {
        self.str(&["action"])
    }

    /// The repository's full name (`owner/name`).
    pub fn repo_full_name(&self) -> Option<&'a str> {
        self.str(&["repository", "full_name"])
    }
}
