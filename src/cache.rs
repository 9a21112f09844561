/// Deterministic namespaced cache with TTL expiry and LRU eviction
///
/// Keys are normalized before lookup so that trivially different spellings of
/// the same query share an entry. Recency for eviction is tracked with a
/// monotonic access sequence rather than wall-clock timestamps, so eviction
/// order is reproducible; only TTL expiry consults the clock.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::types::CacheNamespaceStats;

pub const NS_SEARCH: &str = "search";
pub const NS_EMBEDDINGS: &str = "embeddings";
pub const NS_METADATA: &str = "metadata";
pub const NS_CONTEXT: &str = "context";

const ALL_NAMESPACES: [&str; 4] = [NS_SEARCH, NS_EMBEDDINGS, NS_METADATA, NS_CONTEXT];

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Normalize a cache key: trim, lowercase, collapse runs of whitespace
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: serde_json::Value,
    /// Unix epoch seconds after which the entry is stale
    expires_at: u64,
    /// Monotonic access sequence, used for LRU ordering
    last_access: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// A single cache namespace
#[derive(Debug)]
pub struct NamespaceCache {
    name: String,
    ttl_secs: u64,
    max_entries: usize,
    entries: HashMap<String, CacheEntry>,
    seq: u64,
    counters: Counters,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedNamespace {
    entries: HashMap<String, CacheEntry>,
    seq: u64,
}

impl NamespaceCache {
    pub fn new(name: &str, ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            name: name.to_string(),
            ttl_secs,
            max_entries,
            entries: HashMap::new(),
            seq: 0,
            counters: Counters::default(),
        }
    }

    fn get_at(&mut self, key: &str, now: u64) -> Option<serde_json::Value> {
        let key = normalize_key(key);
        let expired = match self.entries.get(&key) {
            Some(entry) => entry.expires_at <= now,
            None => {
                self.counters.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.remove(&key);
            self.counters.expirations += 1;
            self.counters.misses += 1;
            return None;
        }
        self.seq += 1;
        self.counters.hits += 1;
        let entry = self.entries.get_mut(&key)?;
        entry.last_access = self.seq;
        Some(entry.value.clone())
    }

    fn put_at(&mut self, key: &str, value: serde_json::Value, now: u64) {
        let key = normalize_key(key);
        self.seq += 1;
        self.entries.insert(key, CacheEntry {
            value,
            expires_at: now.saturating_add(self.ttl_secs),
            last_access: self.seq,
        });
        while self.entries.len() > self.max_entries {
            // Oldest access first; key order breaks ties deterministically
            let victim = self
                .entries
                .iter()
                .min_by(|(ka, a), (kb, b)| a.last_access.cmp(&b.last_access).then(ka.cmp(kb)))
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    self.entries.remove(&k);
                    self.counters.evictions += 1;
                }
                None => break,
            }
        }
    }

    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        self.get_at(key, now_epoch())
    }

    pub fn put(&mut self, key: &str, value: serde_json::Value) {
        self.put_at(key, value, now_epoch());
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn stats(&self) -> CacheNamespaceStats {
        CacheNamespaceStats {
            namespace: self.name.clone(),
            entries: self.entries.len(),
            hits: self.counters.hits,
            misses: self.counters.misses,
            evictions: self.counters.evictions,
            expirations: self.counters.expirations,
            ttl_secs: self.ttl_secs,
        }
    }

    /// Zero the counters and return their values from before the reset
    pub fn reset_counters(&mut self) -> CacheNamespaceStats {
        let prior = self.stats();
        self.counters = Counters::default();
        prior
    }

    fn load_from(&mut self, path: &Path, now: u64) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedNamespace = serde_json::from_str(&content)?;
        self.seq = persisted.seq;
        self.entries = persisted
            .entries
            .into_iter()
            .filter(|(_, e)| e.expires_at > now)
            .collect();
        Ok(self.entries.len())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let persisted = PersistedNamespace {
            entries: self.entries.clone(),
            seq: self.seq,
        };
        let content = serde_json::to_string(&persisted)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// All cache namespaces behind one handle
///
/// Persistence is best-effort: a namespace that fails to load starts empty,
/// a namespace that fails to save is logged and dropped.
pub struct CacheManager {
    namespaces: HashMap<&'static str, Mutex<NamespaceCache>>,
    persist: bool,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        let mut namespaces = HashMap::new();
        for (name, ttl) in [
            (NS_SEARCH, config.search_ttl_secs),
            (NS_EMBEDDINGS, config.embeddings_ttl_secs),
            (NS_METADATA, config.metadata_ttl_secs),
            (NS_CONTEXT, config.context_ttl_secs),
        ] {
            namespaces.insert(
                name,
                Mutex::new(NamespaceCache::new(name, ttl, config.max_entries)),
            );
        }
        Self {
            namespaces,
            persist: config.persist,
        }
    }

    fn with_namespace<T>(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut NamespaceCache) -> T,
    ) -> Result<T, CacheError> {
        let cache = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))?;
        let mut guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(f(&mut guard))
    }

    /// Look up a typed value; a deserialization mismatch counts as a miss
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let value = self.with_namespace(namespace, |c| c.get(key)).ok()??;
        serde_json::from_value(value).ok()
    }

    pub fn put<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        let Ok(json) = serde_json::to_value(value) else {
            return;
        };
        if let Err(e) = self.with_namespace(namespace, |c| c.put(key, json)) {
            warn!("Cache put failed: {}", e);
        }
    }

    /// Clear one namespace, or all of them when `namespace` is None
    ///
    /// Counters are zeroed only for the namespaces actually cleared, and the
    /// values from before the reset are returned. An unknown namespace is
    /// rejected before any state changes.
    pub fn clear(
        &self,
        namespace: Option<&str>,
    ) -> Result<(Vec<String>, usize, Vec<CacheNamespaceStats>), CacheError> {
        let targets: Vec<&str> = match namespace {
            Some(ns) => {
                if !self.namespaces.contains_key(ns) {
                    return Err(CacheError::UnknownNamespace(ns.to_string()));
                }
                vec![ns]
            }
            None => ALL_NAMESPACES.to_vec(),
        };
        let mut removed = 0;
        let mut cleared = Vec::new();
        let mut prior = Vec::new();
        for ns in targets {
            let (n, stats) = self.with_namespace(ns, |c| {
                let stats = c.reset_counters();
                (c.clear(), stats)
            })?;
            removed += n;
            prior.push(stats);
            cleared.push(ns.to_string());
        }
        Ok((cleared, removed, prior))
    }

    /// Drop result-level namespaces after the index changes
    pub fn invalidate_results(&self) {
        for ns in [NS_SEARCH, NS_CONTEXT] {
            if let Ok(removed) = self.with_namespace(ns, |c| c.clear())
                && removed > 0
            {
                debug!("Invalidated {} stale '{}' cache entries", removed, ns);
            }
        }
    }

    pub fn stats(&self, namespace: Option<&str>) -> Result<Vec<CacheNamespaceStats>, CacheError> {
        let targets: Vec<&str> = match namespace {
            Some(ns) => {
                if !self.namespaces.contains_key(ns) {
                    return Err(CacheError::UnknownNamespace(ns.to_string()));
                }
                vec![ns]
            }
            None => ALL_NAMESPACES.to_vec(),
        };
        let mut out = Vec::new();
        for ns in targets {
            out.push(self.with_namespace(ns, |c| c.stats())?);
        }
        Ok(out)
    }

    /// Load persisted namespaces from `dir`; missing or corrupt files start empty
    pub fn load(&self, dir: &Path) {
        if !self.persist {
            return;
        }
        let now = now_epoch();
        for ns in ALL_NAMESPACES {
            let path = self.namespace_path(dir, ns);
            if !path.exists() {
                continue;
            }
            let result = self.with_namespace(ns, |c| c.load_from(&path, now));
            match result {
                Ok(Ok(n)) => debug!("Loaded {} cache entries into '{}'", n, ns),
                Ok(Err(e)) => warn!("Discarding unreadable cache file for '{}': {}", ns, e),
                Err(_) => {}
            }
        }
    }

    /// Persist all namespaces to `dir`
    pub fn save(&self, dir: &Path) {
        if !self.persist {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Cannot create cache directory {}: {}", dir.display(), e);
            return;
        }
        for ns in ALL_NAMESPACES {
            let path = self.namespace_path(dir, ns);
            let result = self.with_namespace(ns, |c| c.save_to(&path));
            if let Ok(Err(e)) = result {
                warn!("Failed to persist cache '{}': {}", ns, e);
            }
        }
    }

    fn namespace_path(&self, dir: &Path, namespace: &str) -> PathBuf {
        dir.join(format!("cache_{}.json", namespace))
    }
}
