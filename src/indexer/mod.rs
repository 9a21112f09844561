/// Code indexing: chunking, file discovery, and the in-memory search index
pub mod chunker;
pub mod file_walker;
pub mod lexical;
pub mod semantic;

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::StorageLayout;
use lexical::LexicalIndex;

/// A contiguous slice of a source file, the unit of retrieval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Stable id derived from path, ordinal, and content
    pub id: String,
    /// Repo-relative path with forward slashes
    pub path: String,
    /// Position of this chunk within its file
    pub ordinal: usize,
    /// 1-based inclusive line range
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    /// Chunking strategy that produced this chunk
    pub strategy: String,
    /// Content hash, used to validate cached embeddings
    pub signature: String,
    pub content: String,
}

/// Derive the stable chunk id from its identity triple
pub fn compute_chunk_id(path: &str, ordinal: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex_string(&digest)[..16].to_string()
}

/// Full content hash of a piece of text
pub fn content_signature(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_string(&hasher.finalize())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Serializable per-file bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub signature: String,
    /// Modification time in unix epoch seconds, for the recency boost
    pub mtime: i64,
}

/// Everything searchable, held in memory and persisted as a snapshot
#[derive(Debug, Default)]
pub struct SearchIndex {
    pub chunks: HashMap<String, Chunk>,
    /// rel_path -> chunk ids in ordinal order
    pub by_file: HashMap<String, Vec<String>>,
    pub files: HashMap<String, FileMeta>,
    pub lexical: LexicalIndex,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    root: Option<String>,
    files: HashMap<String, FileMeta>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all chunks for a file with a fresh set
    ///
    /// Returns (created, removed) chunk counts.
    pub fn replace_file(
        &mut self,
        rel_path: &str,
        meta: FileMeta,
        chunks: Vec<Chunk>,
    ) -> (usize, usize) {
        let removed = self.remove_file(rel_path);
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            self.lexical.add_chunk(&chunk.id, &chunk.content);
            ids.push(chunk.id.clone());
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        let created = ids.len();
        self.by_file.insert(rel_path.to_string(), ids);
        self.files.insert(rel_path.to_string(), meta);
        (created, removed)
    }

    /// Remove a file and all of its chunks; returns removed chunk count
    pub fn remove_file(&mut self, rel_path: &str) -> usize {
        let Some(ids) = self.by_file.remove(rel_path) else {
            self.files.remove(rel_path);
            return 0;
        };
        for id in &ids {
            self.chunks.remove(id);
            self.lexical.remove_chunk(id);
        }
        self.files.remove(rel_path);
        ids.len()
    }

    pub fn file_signature(&self, rel_path: &str) -> Option<&str> {
        self.files.get(rel_path).map(|m| m.signature.as_str())
    }

    pub fn file_mtime(&self, chunk: &Chunk) -> Option<i64> {
        self.files.get(&chunk.path).map(|m| m.mtime)
    }

    pub fn file_count(&self) -> usize {
        self.by_file.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Persist the index as a snapshot in the data directory
    pub fn save(&self, layout: &StorageLayout, root: Option<&str>) -> Result<()> {
        let mut chunks: Vec<&Chunk> = self.chunks.values().collect();
        chunks.sort_by(|a, b| a.path.cmp(&b.path).then(a.ordinal.cmp(&b.ordinal)));
        layout.write_jsonl(&layout.chunks_path(), &chunks)?;
        layout.write_json(&layout.postings_path(), &self.lexical)?;
        layout.write_json(&layout.meta_path(), &IndexMeta {
            root: root.map(|s| s.to_string()),
            files: self.files.clone(),
        })?;
        Ok(())
    }

    /// Load a snapshot; returns the recorded root, or None when no snapshot exists
    pub fn load(&mut self, layout: &StorageLayout) -> Result<Option<String>> {
        let Some(meta) = layout.read_json::<IndexMeta>(&layout.meta_path())? else {
            return Ok(None);
        };
        let chunks: Vec<Chunk> = layout.read_jsonl(&layout.chunks_path())?;
        let lexical: Option<LexicalIndex> = layout.read_json(&layout.postings_path())?;

        self.chunks.clear();
        self.by_file.clear();
        for chunk in chunks {
            self.by_file
                .entry(chunk.path.clone())
                .or_default()
                .push(chunk.id.clone());
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        self.files = meta.files;
        self.lexical = match lexical {
            Some(l) => l,
            None => {
                // Postings snapshot missing; rebuild from the chunk store
                let mut rebuilt = LexicalIndex::default();
                for chunk in self.chunks.values() {
                    rebuilt.add_chunk(&chunk.id, &chunk.content);
                }
                rebuilt
            }
        };
        Ok(meta.root)
    }
}
