use std::collections::HashMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Per-parse key-value store shared across the resolver chain.
///
/// Created fresh for every parse and never shared across requests. Keys are
/// namespaced by convention; reserved prefixes:
///
/// - `resolver:json:` parsed-payload cache of the JSON resolver
/// - `resolver:kv:` pair index of the loose key-value resolver
/// - `resolver:leanllm:` batch results, budgets and usage summary of the
///   lean LLM resolver
/// - `extractor:` bookkeeping written by the extractor itself
#[derive(Debug, Default)]
pub struct Scratchpad {
    entries: RwLock<HashMap<String, Value>>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Typed read; `None` when the key is absent or fails to deserialize.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        serde_json::from_value(value).ok()
    }

    /// Typed write; serialization failures are dropped (all stored types in
    /// the kernel serialize infallibly).
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.set(key, v);
        }
    }

    /// Current value of a numeric counter key (0 when unset).
    pub fn counter(&self, key: &str) -> u64 {
        self.entries
            .read()
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Add to a counter and return the new value.
    pub fn add_counter(&self, key: &str, delta: u64) -> u64 {
        let mut entries = self.entries.write();
        let next = entries
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .saturating_add(delta);
        entries.insert(key.to_string(), Value::from(next));
        next
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_round_trip() {
        let pad = Scratchpad::new();
        pad.set("resolver:json:payload", json!({"a": 1}));
        assert_eq!(pad.get("resolver:json:payload"), Some(json!({"a": 1})));
        assert!(pad.get("missing").is_none());
    }

    #[test]
    fn counters_accumulate() {
        let pad = Scratchpad::new();
        assert_eq!(pad.counter("resolver:leanllm:invocations"), 0);
        assert_eq!(pad.add_counter("resolver:leanllm:invocations", 1), 1);
        assert_eq!(pad.add_counter("resolver:leanllm:invocations", 2), 3);
        assert_eq!(pad.counter("resolver:leanllm:invocations"), 3);
    }

    #[test]
    fn typed_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Marker {
            hits: u32,
        }
        let pad = Scratchpad::new();
        pad.set_as("extractor:marker", &Marker { hits: 4 });
        assert_eq!(pad.get_as::<Marker>("extractor:marker"), Some(Marker { hits: 4 }));
    }
}
