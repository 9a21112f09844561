/// FastEmbed-based embedding provider
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use super::EmbeddingProvider;
use crate::error::EmbeddingError;

pub struct FastEmbedManager {
    // fastembed's embed takes &mut self
    model: Mutex<TextEmbedding>,
    dimension: usize,
    name: String,
}

impl FastEmbedManager {
    /// Initialize the named model; unknown names fall back to all-MiniLM-L6-v2
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (model, dimension, canonical) = match model_name {
            "all-MiniLM-L6-v2" => (EmbeddingModel::AllMiniLML6V2, 384, "all-MiniLM-L6-v2"),
            "all-MiniLM-L12-v2" => (EmbeddingModel::AllMiniLML12V2, 384, "all-MiniLM-L12-v2"),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384, "bge-small-en-v1.5"),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768, "bge-base-en-v1.5"),
            other => {
                info!("Unknown model '{}', using all-MiniLM-L6-v2", other);
                (EmbeddingModel::AllMiniLML6V2, 384, "all-MiniLM-L6-v2")
            }
        };

        info!("Initializing FastEmbed model: {:?}", model);
        let mut options = InitOptions::default();
        options.model_name = model;
        options.show_download_progress = false;

        let embedding_model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(embedding_model),
            dimension,
            name: canonical.to_string(),
        })
    }
}

impl EmbeddingProvider for FastEmbedManager {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!("Generating embeddings for {} texts", texts.len());
        let mut model = self
            .model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let embeddings = model
            .embed(texts, None)
            .map_err(|e| EmbeddingError::GenerationFailed(e.to_string()))?;
        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
