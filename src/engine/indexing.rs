/// Bulk and incremental index updates
///
/// Bulk indexing walks the root, chunks changed files in parallel, applies
/// the results under one write lock, and then embeds new chunks off the
/// async runtime. Incremental updates reuse the same per-file path for the
/// batches the watcher delivers.
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::NS_METADATA;
use crate::error::{EngineError, IndexingError};
use crate::glob_utils::PatternFilter;
use crate::indexer::chunker::chunk_file;
use crate::indexer::file_walker::{self, WalkedFile};
use crate::indexer::semantic::EmbedItem;
use crate::indexer::{content_signature, Chunk, FileMeta};
use crate::types::IndexReport;
use crate::watcher::FileEvent;

use super::EngineState;

/// Result of chunking one file off the lock
#[derive(Debug)]
struct FileUpdate {
    rel_path: String,
    meta: FileMeta,
    chunks: Vec<Chunk>,
}

enum FileOutcome {
    Updated(FileUpdate),
    Unchanged,
    Skipped,
}

/// Walk `root` and bring the index up to date with the tree
pub async fn run_index(
    state: &EngineState,
    root: &Path,
    force: bool,
    recursive: bool,
) -> Result<IndexReport, EngineError> {
    let started = Instant::now();
    let config = state.config.clone();
    let filter = PatternFilter::new(
        &config.indexing.include_patterns,
        &config.indexing.exclude_patterns,
    )?;

    let walk_root = root.to_path_buf();
    let walk_config = config.indexing.clone();
    let walk_filter = filter.clone();
    let files = tokio::task::spawn_blocking(move || {
        file_walker::walk_root(&walk_root, &walk_config, &walk_filter, recursive)
    })
    .await
    .map_err(|e| EngineError::other(e.to_string()))??;
    info!("Walked {} candidate files under {}", files.len(), root.display());

    if state.cancel.is_cancelled() {
        return Err(IndexingError::Cancelled.into());
    }

    // Snapshot known signatures so chunking can run without the lock
    let known: std::collections::HashMap<String, String> = {
        let index = state.index.read().await;
        index
            .files
            .iter()
            .map(|(path, meta)| (path.clone(), meta.signature.clone()))
            .collect()
    };

    let chunk_config = config.indexing.clone();
    let outcomes = tokio::task::spawn_blocking(move || {
        files
            .into_par_iter()
            .map(|file| process_file(&file, &known, &chunk_config, force))
            .collect::<Vec<(String, FileOutcome)>>()
    })
    .await
    .map_err(|e| EngineError::other(e.to_string()))?;

    if state.cancel.is_cancelled() {
        return Err(IndexingError::Cancelled.into());
    }

    let mut report = IndexReport {
        root: root.display().to_string(),
        files_indexed: 0,
        files_skipped: 0,
        files_removed: 0,
        chunks_created: 0,
        chunks_removed: 0,
        duration_ms: 0,
        watcher_started: false,
    };

    let mut embed_items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    {
        let mut index = state.index.write().await;
        for (rel_path, outcome) in outcomes {
            seen.insert(rel_path.clone());
            match outcome {
                FileOutcome::Updated(update) => {
                    for chunk in &update.chunks {
                        embed_items.push(EmbedItem {
                            chunk_id: chunk.id.clone(),
                            signature: chunk.signature.clone(),
                            content: chunk.content.clone(),
                        });
                    }
                    state
                        .caches
                        .put(NS_METADATA, &rel_path, &update.meta.signature);
                    let (created, removed) =
                        index.replace_file(&update.rel_path, update.meta, update.chunks);
                    report.files_indexed += 1;
                    report.chunks_created += created;
                    report.chunks_removed += removed;
                }
                FileOutcome::Unchanged | FileOutcome::Skipped => {
                    report.files_skipped += 1;
                }
            }
        }

        // Files that vanished since the last index
        let gone: Vec<String> = index
            .files
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in gone {
            let ids = index.by_file.get(&path).cloned().unwrap_or_default();
            report.chunks_removed += index.remove_file(&path);
            report.files_removed += 1;
            state.semantic.remove_chunks(&ids);
        }
    }

    embed_and_persist(state, root, embed_items).await?;
    state.caches.invalidate_results();

    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "Indexed {} files ({} skipped, {} removed), {} chunks in {}ms",
        report.files_indexed,
        report.files_skipped,
        report.files_removed,
        report.chunks_created,
        report.duration_ms
    );
    Ok(report)
}

fn process_file(
    file: &WalkedFile,
    known: &std::collections::HashMap<String, String>,
    config: &crate::config::IndexingConfig,
    force: bool,
) -> (String, FileOutcome) {
    let rel_path = file.rel_path.clone();
    let content = match file_walker::read_source_file(&file.abs_path) {
        Ok(Some(content)) => content,
        Ok(None) => {
            debug!("Skipping binary file {}", rel_path);
            return (rel_path, FileOutcome::Skipped);
        }
        Err(e) => {
            warn!("Cannot read {}: {:#}", rel_path, e);
            return (rel_path, FileOutcome::Skipped);
        }
    };
    let signature = content_signature(&content);
    if !force && known.get(&rel_path) == Some(&signature) {
        return (rel_path, FileOutcome::Unchanged);
    }
    let chunks = chunk_file(&rel_path, &content, config);
    let meta = FileMeta {
        signature,
        mtime: file.mtime,
    };
    (
        rel_path.clone(),
        FileOutcome::Updated(FileUpdate {
            rel_path,
            meta,
            chunks,
        }),
    )
}

/// Apply one debounced watcher batch
pub async fn apply_events(
    state: &EngineState,
    root: &Path,
    events: Vec<FileEvent>,
) -> Result<(usize, usize), EngineError> {
    let config = state.config.indexing.clone();
    let mut created = 0;
    let mut removed = 0;

    for event in events {
        match event {
            FileEvent::Changed(abs_path) => {
                let rel_path = file_walker::relative_path(root, &abs_path);
                // For files the index already tracks, the cached signature
                // short-circuits spurious events (touch without a content
                // change). Untracked files always take the full path.
                let known_signature = {
                    let tracked = state.index.read().await.files.contains_key(&rel_path);
                    if tracked {
                        state.caches.get::<String>(NS_METADATA, &rel_path)
                    } else {
                        None
                    }
                };
                match load_update(&abs_path, &rel_path, &config, known_signature).await {
                    Ok(Some(update)) => {
                        let mut embed_items = Vec::with_capacity(update.chunks.len());
                        for chunk in &update.chunks {
                            embed_items.push(EmbedItem {
                                chunk_id: chunk.id.clone(),
                                signature: chunk.signature.clone(),
                                content: chunk.content.clone(),
                            });
                        }
                        state
                            .caches
                            .put(NS_METADATA, &rel_path, &update.meta.signature);
                        {
                            let mut index = state.index.write().await;
                            let (c, r) =
                                index.replace_file(&update.rel_path, update.meta, update.chunks);
                            created += c;
                            removed += r;
                        }
                        let semantic = state.semantic.clone();
                        tokio::task::spawn_blocking(move || semantic.embed_chunks(embed_items))
                            .await
                            .map_err(|e| EngineError::other(e.to_string()))?;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping update for {}: {}", rel_path, e),
                }
            }
            FileEvent::Removed(abs_path) => {
                let rel_path = file_walker::relative_path(root, &abs_path);
                let mut index = state.index.write().await;
                let ids = index.by_file.get(&rel_path).cloned().unwrap_or_default();
                removed += index.remove_file(&rel_path);
                state.semantic.remove_chunks(&ids);
            }
        }
    }

    state.caches.invalidate_results();
    persist_snapshot(state, root).await?;
    Ok((created, removed))
}

async fn load_update(
    abs_path: &Path,
    rel_path: &str,
    config: &crate::config::IndexingConfig,
    known_signature: Option<String>,
) -> Result<Option<FileUpdate>, EngineError> {
    let metadata = match std::fs::metadata(abs_path) {
        Ok(m) => m,
        // Deleted between event and processing
        Err(_) => return Ok(None),
    };
    if metadata.len() as usize > config.max_file_size {
        return Err(IndexingError::FileTooLarge {
            size: metadata.len() as usize,
            max: config.max_file_size,
        }
        .into());
    }
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let abs = abs_path.to_path_buf();
    let rel = rel_path.to_string();
    let chunk_config = config.clone();
    let update = tokio::task::spawn_blocking(move || -> Result<Option<FileUpdate>, EngineError> {
        let Some(content) = file_walker::read_source_file(&abs)? else {
            return Ok(None);
        };
        let signature = content_signature(&content);
        if known_signature.as_deref() == Some(signature.as_str()) {
            debug!("Signature unchanged for {}, skipping re-chunk", rel);
            return Ok(None);
        }
        let chunks = chunk_file(&rel, &content, &chunk_config);
        Ok(Some(FileUpdate {
            rel_path: rel,
            meta: FileMeta { signature, mtime },
            chunks,
        }))
    })
    .await
    .map_err(|e| EngineError::other(e.to_string()))??;
    Ok(update)
}

async fn embed_and_persist(
    state: &EngineState,
    root: &Path,
    embed_items: Vec<EmbedItem>,
) -> Result<(), EngineError> {
    if !embed_items.is_empty() {
        let semantic = state.semantic.clone();
        let embedded = tokio::task::spawn_blocking(move || semantic.embed_chunks(embed_items))
            .await
            .map_err(|e| EngineError::other(e.to_string()))?;
        debug!("Embedded {} new chunks", embedded);
    }
    // Drop vectors for chunks the update removed
    {
        let index = state.index.read().await;
        let valid: HashSet<String> = index.chunks.keys().cloned().collect();
        state.semantic.retain_chunks(&|id| valid.contains(id));
    }
    persist_snapshot(state, root).await
}

/// Write the index and embedding snapshots to the data directory
pub async fn persist_snapshot(state: &EngineState, root: &Path) -> Result<(), EngineError> {
    let Some(layout) = state.layout() else {
        return Ok(());
    };
    let root_string = root.display().to_string();
    {
        let index = state.index.read().await;
        index.save(&layout, Some(&root_string))?;
    }
    state.semantic.save(&layout)?;
    Ok(())
}
