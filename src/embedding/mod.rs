/// Embedding providers for the semantic channel
mod fastembed_manager;
mod term_vector;

pub use fastembed_manager::FastEmbedManager;
pub use term_vector::TermVectorProvider;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::SemanticConfig;
use crate::error::EmbeddingError;

/// Trait for embedding generation
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Dimension of the vectors this provider produces
    fn dimension(&self) -> usize;

    /// Provider identifier, stored next to each vector
    fn model_name(&self) -> &str;
}

/// Build the configured provider, degrading to term vectors when allowed
///
/// The name `term-vector` selects the deterministic provider directly,
/// which is the offline and test configuration.
///
/// Model initialization can fail on machines without the model files or onnx
/// runtime; with `term_vector_fallback` enabled that is a capability gap, not
/// an error, and the deterministic bag-of-words provider takes over.
pub fn create_provider(
    config: &SemanticConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    if config.model_name == "term-vector" {
        return Ok(Arc::new(TermVectorProvider::new()));
    }
    match FastEmbedManager::new(&config.model_name) {
        Ok(manager) => {
            info!("Semantic channel using model '{}'", manager.model_name());
            Ok(Arc::new(manager))
        }
        Err(e) if config.term_vector_fallback => {
            warn!(
                "Embedding model unavailable ({}); falling back to term vectors",
                e
            );
            Ok(Arc::new(TermVectorProvider::new()))
        }
        Err(e) => Err(e),
    }
}

/// Cosine similarity between two vectors; 0.0 on dimension mismatch
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
