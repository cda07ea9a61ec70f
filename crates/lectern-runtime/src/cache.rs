//! Caching layer for lectern-runtime.
//!
//! Stores validated results keyed by a fingerprint of the task's logical
//! inputs, so repeated identical requests skip the backend entirely. Only
//! validated results are ever inserted.

use chrono::{DateTime, Utc};
use lectern_core::Context;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::duration_str;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are treated as misses
    #[serde(with = "duration_str")]
    pub ttl: Duration,

    /// Capacity before least-recently-used entries are evicted
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

/// A validated result held by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// The validated response
    pub value: JsonValue,

    /// Quality warnings raised when the response was validated
    pub quality_warnings: Vec<String>,

    /// When the entry was stored
    pub stored_at: DateTime<Utc>,
}

impl CachedResult {
    /// Wrap a validated value, stamped with the current time.
    pub fn new(value: JsonValue, quality_warnings: Vec<String>) -> Self {
        Self {
            value,
            quality_warnings,
            stored_at: Utc::now(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Result cache using moka.
pub struct ResultCache {
    cache: Cache<String, CachedResult>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Create a new cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live entry.
    pub async fn get(&self, key: &str) -> Option<CachedResult> {
        let entry = self.cache.get(key).await;
        match entry {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        entry
    }

    /// Store a result, replacing any existing entry for the key.
    pub async fn insert(&self, key: String, result: CachedResult) {
        self.cache.insert(key, result).await;
    }

    /// Check for a live entry without touching hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        tracing::info!("Result cache cleared");
    }

    /// Current statistics.
    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.cache.entry_count(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Deterministic cache key for a task.
///
/// SHA-256 over a canonical JSON encoding of the task type, context,
/// provider and generation parameters. Object keys are sorted at every
/// level, so insertion order never changes the key. Execution-only options
/// (`cache`, `validate`, `retries`, `trace_id`) are excluded.
pub fn fingerprint(
    task_type: &str,
    context: &Context,
    provider: &str,
    params: &Map<String, JsonValue>,
) -> String {
    let mut material = String::new();
    material.push_str("{\"context\":");
    write_canonical(&mut material, &JsonValue::Object(context.clone()));
    material.push_str(",\"params\":");
    write_canonical(&mut material, &JsonValue::Object(params.clone()));
    material.push_str(",\"provider\":");
    write_canonical(&mut material, &JsonValue::String(provider.to_string()));
    material.push_str(",\"task_type\":");
    write_canonical(&mut material, &JsonValue::String(task_type.to_string()));
    material.push('}');

    format!("{:x}", Sha256::digest(material.as_bytes()))
}

fn write_canonical(out: &mut String, value: &JsonValue) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ctx(value: JsonValue) -> Context {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = ResultCache::default();
        let key = fingerprint("eli5", &ctx(json!({"question": "Q"})), "scripted", &Map::new());

        // Cache miss
        assert!(cache.get(&key).await.is_none());

        cache
            .insert(key.clone(), CachedResult::new(json!({"explanation": "E"}), vec![]))
            .await;

        // Cache hit
        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached.value["explanation"], "E");

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);

        cache.clear().await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_insert_overwrites() {
        let cache = ResultCache::default();
        cache.insert("k".into(), CachedResult::new(json!(1), vec![])).await;
        cache.insert("k".into(), CachedResult::new(json!(2), vec![])).await;
        assert_eq!(cache.get("k").await.unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = ResultCache::new(&CacheConfig {
            ttl: Duration::from_millis(50),
            max_entries: 10,
        });
        cache.insert("k".into(), CachedResult::new(json!(1), vec![])).await;
        assert!(cache.contains("k"));

        // moka keeps its own clock, so this has to be a real wait
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key = fingerprint("eli5", &ctx(json!({"question": "Q", "answer": "A"})), "anthropic", &Map::new());
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            key,
            fingerprint("eli5", &ctx(json!({"answer": "A", "question": "Q"})), "anthropic", &Map::new())
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let base = fingerprint("eli5", &ctx(json!({"question": "Q"})), "anthropic", &Map::new());
        let other_task = fingerprint("hint", &ctx(json!({"question": "Q"})), "anthropic", &Map::new());
        let other_provider = fingerprint("eli5", &ctx(json!({"question": "Q"})), "local", &Map::new());
        let mut params = Map::new();
        params.insert("temperature".into(), json!(0.7));
        let other_params = fingerprint("eli5", &ctx(json!({"question": "Q"})), "anthropic", &params);

        assert_ne!(base, other_task);
        assert_ne!(base, other_provider);
        assert_ne!(base, other_params);
    }

    #[test]
    fn test_canonical_encoding_sorts_nested_keys() {
        let mut out = String::new();
        write_canonical(&mut out, &json!({"b": {"y": 1, "x": [true, null]}, "a": "s"}));
        assert_eq!(out, r#"{"a":"s","b":{"x":[true,null],"y":1}}"#);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8),
            params in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9 ]{0,12}", 0..4),
        ) {
            let mut forward = Context::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Context::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }

            let mut params_forward = Map::new();
            for (k, v) in params.iter() {
                params_forward.insert(k.clone(), json!(v));
            }
            let mut params_backward = Map::new();
            for (k, v) in params.iter().rev() {
                params_backward.insert(k.clone(), json!(v));
            }

            prop_assert_eq!(
                fingerprint("eli5", &forward, "anthropic", &params_forward),
                fingerprint("eli5", &backward, "anthropic", &params_backward)
            );
        }
    }
}
