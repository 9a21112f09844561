/// BM25 lexical index over chunk contents
///
/// An inverted index mapping term -> chunk id -> term frequency, with
/// per-chunk document lengths. Scores use BM25 with k1 = 1.5, b = 0.75 and
/// the idf form `ln((N - df + 0.5) / (df + 0.5) + 1)`, which is always
/// positive, so a matching term never pushes a score below zero.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::text::tokenize;

const K1: f32 = 1.5;
const B: f32 = 0.75;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    /// term -> chunk id -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    /// chunk id -> token count
    doc_len: HashMap<String, u32>,
    /// chunk id -> distinct terms, kept so removal never scans all postings
    chunk_terms: HashMap<String, Vec<String>>,
}

impl LexicalIndex {
    /// Index a chunk's content; the caller guarantees the id is not present
    pub fn add_chunk(&mut self, chunk_id: &str, content: &str) {
        let tokens = tokenize(content);
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }
        let mut terms: Vec<String> = tf.keys().cloned().collect();
        terms.sort();
        for (term, count) in tf {
            self.postings
                .entry(term)
                .or_default()
                .insert(chunk_id.to_string(), count);
        }
        self.doc_len.insert(chunk_id.to_string(), tokens.len() as u32);
        self.chunk_terms.insert(chunk_id.to_string(), terms);
    }

    /// Remove a chunk and drop any postings rows it emptied
    pub fn remove_chunk(&mut self, chunk_id: &str) {
        if let Some(terms) = self.chunk_terms.remove(chunk_id) {
            for term in terms {
                if let Some(row) = self.postings.get_mut(&term) {
                    row.remove(chunk_id);
                    if row.is_empty() {
                        self.postings.remove(&term);
                    }
                }
            }
        }
        self.doc_len.remove(chunk_id);
    }

    pub fn doc_count(&self) -> usize {
        self.doc_len.len()
    }

    pub fn distinct_terms(&self) -> usize {
        self.postings.len()
    }

    fn avg_doc_len(&self) -> f32 {
        if self.doc_len.is_empty() {
            return 0.0;
        }
        let total: u64 = self.doc_len.values().map(|&l| l as u64).sum();
        total as f32 / self.doc_len.len() as f32
    }

    /// BM25 scores for every chunk matching at least one query token
    pub fn score(&self, query_tokens: &[String]) -> Vec<(String, f32)> {
        let n = self.doc_count() as f32;
        if n == 0.0 {
            return Vec::new();
        }
        let avgdl = self.avg_doc_len().max(1.0);
        let mut scores: HashMap<&str, f32> = HashMap::new();

        for token in query_tokens {
            let Some(row) = self.postings.get(token) else {
                continue;
            };
            let df = row.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (chunk_id, &tf) in row {
                let dl = *self.doc_len.get(chunk_id).unwrap_or(&0) as f32;
                let tf = tf as f32;
                let term_score =
                    idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(chunk_id.as_str()).or_insert(0.0) += term_score;
            }
        }

        scores
            .into_iter()
            .map(|(id, s)| (id.to_string(), s))
            .collect()
    }
}
