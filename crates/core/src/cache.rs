use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use psr_domain::{ParseDiagnostic, ParseOptions, Result, SearchPlan};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry + key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One cached architect outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCacheEntry {
    pub plan: SearchPlan,
    pub confidence: f64,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub tokens: u32,
    pub processing_time_ms: u64,
    /// RFC 3339 write time; drives the staleness policy.
    pub updated_at: String,
    pub profile: Option<String>,
}

impl PlanCacheEntry {
    /// Entry age in milliseconds, saturating at zero for clock skew.
    pub fn age_ms(&self) -> u64 {
        chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|t| {
                chrono::Utc::now()
                    .signed_duration_since(t)
                    .num_milliseconds()
                    .max(0) as u64
            })
            .unwrap_or(u64::MAX)
    }
}

/// Serialize with object keys sorted recursively, so logically equal values
/// digest identically regardless of construction order.
fn stable_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    sorted.insert(key.clone(), canonicalize(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

/// Deterministic cache key: sha256 of the stable-JSON fingerprint of the
/// schema, instructions, options and profile.
pub fn plan_cache_key(
    output_schema: &Map<String, Value>,
    instructions: Option<&str>,
    options: Option<&ParseOptions>,
    profile: Option<&str>,
) -> String {
    let fingerprint = json!({
        "schema": Value::Object(output_schema.clone()),
        "instructions": instructions,
        "options": options.map(|o| serde_json::to_value(o).unwrap_or(Value::Null)),
        "profile": profile,
    });
    let mut hasher = Sha256::new();
    hasher.update(stable_json(&fingerprint).as_bytes());
    hex::encode(hasher.finalize())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache trait + default store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pluggable keyed store of architect plans. Implementations must be safe
/// for concurrent `get`/`set`.
#[async_trait]
pub trait PlanCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PlanCacheEntry>>;
    async fn set(&self, key: &str, entry: PlanCacheEntry) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Drop all entries, or only those tagged with the given profile.
    async fn clear(&self, profile: Option<&str>) -> Result<()>;
}

/// Default store: a cloning in-memory map.
///
/// Entries are cloned on both store and fetch, so a caller mutating a plan
/// it got back can never poison later hits.
#[derive(Default)]
pub struct InMemoryPlanCache {
    entries: RwLock<HashMap<String, PlanCacheEntry>>,
}

impl InMemoryPlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PlanCache for InMemoryPlanCache {
    async fn get(&self, key: &str) -> Result<Option<PlanCacheEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, entry: PlanCacheEntry) -> Result<()> {
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self, profile: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write();
        match profile {
            Some(tag) => entries.retain(|_, e| e.profile.as_deref() != Some(tag)),
            None => entries.clear(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psr_domain::{
        Complexity, DetectedFormat, PlanMetadata, PlanOrigin, PlanStrategy,
    };

    fn sample_plan() -> SearchPlan {
        SearchPlan {
            id: "p1".into(),
            version: 1,
            steps: vec![],
            strategy: PlanStrategy::Sequential,
            confidence_threshold: 0.5,
            metadata: PlanMetadata {
                detected_format: DetectedFormat::Text,
                complexity: Complexity::Low,
                estimated_tokens: 100,
                origin: PlanOrigin::Heuristic,
                planner_confidence: 0.8,
            },
        }
    }

    fn entry(profile: Option<&str>) -> PlanCacheEntry {
        PlanCacheEntry {
            plan: sample_plan(),
            confidence: 0.8,
            diagnostics: vec![],
            tokens: 90,
            processing_time_ms: 3,
            updated_at: chrono::Utc::now().to_rfc3339(),
            profile: profile.map(str::to_string),
        }
    }

    fn schema(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn key_is_deterministic_and_order_insensitive() {
        let a = schema(&[("name", "string"), ("email", "email")]);
        let b = schema(&[("email", "email"), ("name", "string")]);
        assert_eq!(
            plan_cache_key(&a, Some("extract"), None, None),
            plan_cache_key(&b, Some("extract"), None, None)
        );
    }

    #[test]
    fn key_varies_with_each_component() {
        let s = schema(&[("name", "string")]);
        let base = plan_cache_key(&s, None, None, None);
        assert_ne!(base, plan_cache_key(&s, Some("x"), None, None));
        assert_ne!(base, plan_cache_key(&s, None, None, Some("sensor-grid")));
        let opts = ParseOptions {
            confidence_threshold: Some(0.9),
            ..Default::default()
        };
        assert_ne!(base, plan_cache_key(&s, None, Some(&opts), None));
    }

    #[tokio::test]
    async fn fetched_entries_are_isolated_clones() {
        let cache = InMemoryPlanCache::new();
        cache.set("k", entry(None)).await.unwrap();

        let mut fetched = cache.get("k").await.unwrap().unwrap();
        fetched.plan.metadata.origin = PlanOrigin::Model;
        fetched.plan.id = "mutated".into();

        let again = cache.get("k").await.unwrap().unwrap();
        assert_eq!(again.plan.id, "p1");
        assert_eq!(again.plan.metadata.origin, PlanOrigin::Heuristic);
    }

    #[tokio::test]
    async fn clear_by_profile_tag() {
        let cache = InMemoryPlanCache::new();
        cache.set("a", entry(Some("vibe-coder"))).await.unwrap();
        cache.set("b", entry(None)).await.unwrap();

        cache.clear(Some("vibe-coder")).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());

        cache.clear(None).await.unwrap();
        assert!(cache.is_empty());
    }
}
