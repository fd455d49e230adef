use serde::{Deserialize, Serialize};
use serde_json::Value;

use planweave_core::types::{CapabilityOutput, ExecutionStatus, Namespace};

/// The shared namespace ("globals_schema") steps read from and write to.
///
/// Keys are unique and the last writer wins. Nothing is ever removed while a
/// run is in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Globals {
    data: Namespace,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a namespace from initial data.
    pub fn from_map(data: Namespace) -> Self {
        Self { data }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Set a value, overwriting any previous writer.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Merge a map into the namespace (overwrites on conflict).
    pub fn merge(&mut self, other: &Namespace) {
        for (k, v) in other {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Resolve `reads` against the namespace.
    ///
    /// Returns the values found and the keys that were missing.
    pub fn select(&self, reads: &[String]) -> (Namespace, Vec<String>) {
        let mut found = Namespace::new();
        let mut missing = Vec::new();
        for key in reads {
            match self.data.get(key) {
                Some(v) => {
                    found.insert(key.clone(), v.clone());
                }
                None => missing.push(key.clone()),
            }
        }
        (found, missing)
    }

    /// Copy each declared write from a completed step's output.
    ///
    /// A successful code execution result takes precedence over the output's
    /// own fields. When exactly one write is declared and the execution
    /// produced exactly one value, that value is used whatever its name.
    /// Returns the writes that could not be found.
    pub fn ingest_writes(&mut self, writes: &[String], output: &CapabilityOutput) -> Vec<String> {
        let exec_result = match output.execution_status.as_deref() {
            Some(s) if s == ExecutionStatus::Success.to_string() => {
                output.execution_result.as_ref().and_then(|v| v.as_object())
            }
            _ => None,
        };

        let mut missing = Vec::new();
        for key in writes {
            if let Some(result) = exec_result {
                if let Some(v) = result.get(key) {
                    self.data.insert(key.clone(), v.clone());
                    continue;
                }
                if result.len() == 1 && writes.len() == 1 {
                    if let Some(v) = result.values().next() {
                        self.data.insert(key.clone(), v.clone());
                        continue;
                    }
                }
            }

            match output.field(key) {
                Some(v) => {
                    self.data.insert(key.clone(), v.clone());
                }
                None => missing.push(key.clone()),
            }
        }
        missing
    }

    /// Namespace keys in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        self.data.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &Namespace {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_basic_operations() {
        let mut g = Globals::new();
        g.set("name", json!("Alice"));
        g.set("count", json!(42));

        assert_eq!(g.get_str("name"), Some("Alice"));
        assert_eq!(g.get("count"), Some(&json!(42)));
        assert_eq!(g.get("missing"), None);
        assert_eq!(g.keys(), vec!["name", "count"]);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut g = Globals::new();
        g.set("a", json!(1));
        g.set("b", json!(2));

        let mut other = Namespace::new();
        other.insert("b".into(), json!("overwritten"));
        other.insert("c".into(), json!(3));
        g.merge(&other);

        assert_eq!(g.get("a"), Some(&json!(1)));
        assert_eq!(g.get_str("b"), Some("overwritten"));
        assert_eq!(g.get("c"), Some(&json!(3)));
    }

    #[test]
    fn test_select_partial() {
        let mut g = Globals::new();
        g.set("x", json!(5));

        let (found, missing) = g.select(&keys(&["x", "y"]));
        assert_eq!(found.get("x"), Some(&json!(5)));
        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["y"]);
    }

    #[test]
    fn test_ingest_direct_fields() {
        let mut g = Globals::new();
        let out = CapabilityOutput::default()
            .with_field("findings", json!("Rust is fast"))
            .with_field("score", json!(9.5));

        let missing = g.ingest_writes(&keys(&["findings", "score"]), &out);
        assert!(missing.is_empty());
        assert_eq!(g.get_str("findings"), Some("Rust is fast"));
        assert_eq!(g.get("score"), Some(&json!(9.5)));
    }

    #[test]
    fn test_ingest_missing_write_is_reported_not_inserted() {
        let mut g = Globals::new();
        let out = CapabilityOutput::default().with_field("a", json!(1));

        let missing = g.ingest_writes(&keys(&["a", "b"]), &out);
        assert_eq!(missing, vec!["b"]);
        assert!(!g.contains("b"));
    }

    #[test]
    fn test_ingest_prefers_execution_result() {
        let mut g = Globals::new();
        let mut out = CapabilityOutput::default().with_field("total", json!("stale"));
        out.execution_status = Some("success".into());
        out.execution_result = Some(json!({"total": 42}));

        g.ingest_writes(&keys(&["total"]), &out);
        assert_eq!(g.get("total"), Some(&json!(42)));
    }

    #[test]
    fn test_ingest_single_value_fallback() {
        let mut g = Globals::new();
        let mut out = CapabilityOutput::default();
        out.execution_status = Some("success".into());
        out.execution_result = Some(json!({"result": [1, 2, 3]}));

        let missing = g.ingest_writes(&keys(&["numbers_T004"]), &out);
        assert!(missing.is_empty());
        assert_eq!(g.get("numbers_T004"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_ingest_ignores_failed_execution() {
        let mut g = Globals::new();
        let mut out = CapabilityOutput::default();
        out.execution_status = Some("error".into());
        out.execution_result = Some(json!({"total": 42}));

        let missing = g.ingest_writes(&keys(&["total"]), &out);
        assert_eq!(missing, vec!["total"]);
    }

    #[test]
    fn test_ingest_empty_writes() {
        let mut g = Globals::new();
        let out = CapabilityOutput::default().with_field("x", json!(1));
        assert!(g.ingest_writes(&[], &out).is_empty());
        assert!(g.is_empty());
    }
}
