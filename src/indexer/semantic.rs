/// Semantic vector index with signature validation
///
/// Embeddings are stored per chunk id together with the chunk's content
/// signature and the model that produced them. A vector whose signature no
/// longer matches the chunk, or whose model differs from the active provider,
/// is stale and contributes no semantic signal until re-embedded. The
/// provider itself is initialized lazily on first use so that indexing and
/// lexical search never wait for model startup.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheManager, NS_EMBEDDINGS};
use crate::config::SemanticConfig;
use crate::embedding::{cosine_similarity, create_provider, EmbeddingProvider};
use crate::storage::StorageLayout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    pub model: String,
    /// Content signature of the chunk at embedding time
    pub signature: String,
}

enum ProviderSlot {
    Unset,
    Ready(Arc<dyn EmbeddingProvider>),
    Unavailable,
}

/// A chunk waiting for an embedding
pub struct EmbedItem {
    pub chunk_id: String,
    pub signature: String,
    pub content: String,
}

pub struct SemanticIndex {
    config: SemanticConfig,
    records: RwLock<HashMap<String, EmbeddingRecord>>,
    provider: Mutex<ProviderSlot>,
    enabled: AtomicBool,
    /// Vectors shared by content signature, so identical content anywhere in
    /// the tree is embedded once
    cache: Arc<CacheManager>,
}

impl SemanticIndex {
    pub fn new(config: SemanticConfig, cache: Arc<CacheManager>) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            provider: Mutex::new(ProviderSlot::Unset),
            enabled: AtomicBool::new(enabled),
            cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The active provider, initialized on first call
    ///
    /// A failed initialization is remembered so every later call is a cheap
    /// None instead of a repeated startup attempt.
    fn provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        let mut slot = self
            .provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &*slot {
            ProviderSlot::Ready(p) => Some(p.clone()),
            ProviderSlot::Unavailable => None,
            ProviderSlot::Unset => match create_provider(&self.config) {
                Ok(p) => {
                    *slot = ProviderSlot::Ready(p.clone());
                    Some(p)
                }
                Err(e) => {
                    warn!("Semantic channel disabled: {}", e);
                    *slot = ProviderSlot::Unavailable;
                    None
                }
            },
        }
    }

    pub fn provider_name(&self) -> Option<String> {
        let slot = self
            .provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &*slot {
            ProviderSlot::Ready(p) => Some(p.model_name().to_string()),
            _ => None,
        }
    }

    pub fn embedded_count(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Embed the given chunks, skipping any with a current vector
    ///
    /// Returns the number of vectors actually generated. Blocking; callers
    /// on the async path run this under spawn_blocking.
    pub fn embed_chunks(&self, items: Vec<EmbedItem>) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let pending: Vec<EmbedItem> = {
            let records = self
                .records
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            items
                .into_iter()
                .filter(|item| {
                    records
                        .get(&item.chunk_id)
                        .is_none_or(|r| r.signature != item.signature)
                })
                .collect()
        };
        if pending.is_empty() {
            return 0;
        }
        let Some(provider) = self.provider() else {
            return 0;
        };
        let model = provider.model_name().to_string();
        let max_chars = self.config.max_embed_chars;

        let mut embedded = 0;

        // Content already embedded under another chunk id (or in a previous
        // run) is served from the embeddings cache, keyed by signature
        let pending: Vec<EmbedItem> = pending
            .into_iter()
            .filter(|item| {
                let cached = self
                    .cache
                    .get::<EmbeddingRecord>(NS_EMBEDDINGS, &item.signature)
                    .filter(|record| record.model == model);
                match cached {
                    Some(record) => {
                        let mut records = self
                            .records
                            .write()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        records.insert(item.chunk_id.clone(), record);
                        embedded += 1;
                        false
                    }
                    None => true,
                }
            })
            .collect();

        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch
                .iter()
                .map(|item| truncate_chars(&item.content, max_chars))
                .collect();
            let vectors = match provider.embed_batch(texts) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Embedding batch failed: {}", e);
                    continue;
                }
            };
            let mut records = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (item, vector) in batch.iter().zip(vectors) {
                let record = EmbeddingRecord {
                    vector,
                    model: model.clone(),
                    signature: item.signature.clone(),
                };
                self.cache.put(NS_EMBEDDINGS, &item.signature, &record);
                records.insert(item.chunk_id.clone(), record);
                embedded += 1;
            }
        }
        debug!("Embedded {} chunks", embedded);
        embedded
    }

    pub fn remove_chunks(&self, chunk_ids: &[String]) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in chunk_ids {
            records.remove(id);
        }
    }

    /// Drop vectors for chunks that no longer exist
    pub fn retain_chunks(&self, valid: &dyn Fn(&str) -> bool) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.retain(|id, _| valid(id));
    }

    /// Score candidates against the query; absent entries mean "no signal"
    ///
    /// Cosine similarity is shifted from [-1, 1] to [0, 1] so it lives on
    /// the same scale as the normalized lexical score. Stale vectors are
    /// skipped, never scored.
    pub fn query_scores(
        &self,
        query: &str,
        candidates: &[(String, String)],
    ) -> HashMap<String, f32> {
        let mut scores = HashMap::new();
        if !self.is_enabled() {
            return scores;
        }
        let Some(provider) = self.provider() else {
            return scores;
        };
        let query_text = truncate_chars(query, self.config.max_embed_chars);
        let query_vec = match provider.embed_batch(vec![query_text]) {
            Ok(mut v) if !v.is_empty() => v.remove(0),
            Ok(_) => return scores,
            Err(e) => {
                warn!("Query embedding failed: {}", e);
                return scores;
            }
        };
        let model = provider.model_name();
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (chunk_id, signature) in candidates {
            if let Some(record) = records.get(chunk_id)
                && record.signature == *signature
                && record.model == model
            {
                let cosine = cosine_similarity(&query_vec, &record.vector);
                scores.insert(chunk_id.clone(), (cosine + 1.0) / 2.0);
            }
        }
        scores
    }

    pub fn save(&self, layout: &StorageLayout) -> Result<()> {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        layout.write_json(&layout.embeddings_path(), &*records)
    }

    pub fn load(&self, layout: &StorageLayout) -> Result<()> {
        if let Some(records) =
            layout.read_json::<HashMap<String, EmbeddingRecord>>(&layout.embeddings_path())?
        {
            let mut guard = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = records;
        }
        Ok(())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
