/// Deterministic bag-of-words fallback provider
///
/// Hashes each token into a fixed-size bucket vector with FNV-1a and
/// L2-normalizes the counts. No model files, no network, and the same text
/// always yields the same vector, so the semantic channel stays usable (and
/// testable) on machines where the real model cannot load.
use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::text::tokenize;

pub const TERM_VECTOR_DIM: usize = 256;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub struct TermVectorProvider {
    dimension: usize,
}

impl TermVectorProvider {
    pub fn new() -> Self {
        Self {
            dimension: TERM_VECTOR_DIM,
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for TermVectorProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl EmbeddingProvider for TermVectorProvider {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "term-vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_vectors_are_deterministic() {
        let provider = TermVectorProvider::new();
        let a = provider.embed_batch(vec!["parse config file".to_string()]).unwrap();
        let b = provider.embed_batch(vec!["parse config file".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_vectors_are_normalized() {
        let provider = TermVectorProvider::new();
        let vectors = provider
            .embed_batch(vec!["alpha beta gamma".to_string()])
            .unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_terms_increase_similarity() {
        let provider = TermVectorProvider::new();
        let vectors = provider
            .embed_batch(vec![
                "parse config file".to_string(),
                "parse config directory".to_string(),
                "render html template".to_string(),
            ])
            .unwrap();
        let close = cosine_similarity(&vectors[0], &vectors[1]);
        let far = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(close > far);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let provider = TermVectorProvider::new();
        let vectors = provider.embed_batch(vec!["".to_string()]).unwrap();
        assert_eq!(vectors[0].len(), TERM_VECTOR_DIM);
        assert!(vectors[0].iter().all(|&v| v == 0.0));
    }
}
