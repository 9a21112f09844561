/// The retrieval engine: one handle over index, caches, watcher, and memory
pub mod indexing;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheManager, NS_CONTEXT, NS_SEARCH};
use crate::config::{Config, SearchConfig};
use crate::error::{EngineError, ValidationError, WatcherError};
use crate::glob_utils::PatternFilter;
use crate::indexer::semantic::SemanticIndex;
use crate::indexer::{Chunk, SearchIndex};
use crate::memory::{self, SessionMemory};
use crate::packer::{self, PackCandidate};
use crate::ranker::{self, Candidate, Ranked};
use crate::storage::StorageLayout;
use crate::text::tokenize;
use crate::types::*;
use crate::watcher::{self, FileEvent, WatchHandle};

static TODO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(TODO|FIXME)\b[:\s]*(.*)").unwrap());

/// Shared state, visible to the indexing module
pub struct EngineState {
    pub config: Arc<Config>,
    pub index: tokio::sync::RwLock<SearchIndex>,
    pub semantic: Arc<SemanticIndex>,
    pub caches: Arc<CacheManager>,
    pub cancel: CancellationToken,
    root: std::sync::RwLock<Option<PathBuf>>,
    layout: std::sync::RwLock<Option<StorageLayout>>,
    memory: std::sync::RwLock<Option<Arc<SessionMemory>>>,
}

impl EngineState {
    pub fn root(&self) -> Option<PathBuf> {
        self.root
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn layout(&self) -> Option<StorageLayout> {
        self.layout
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn memory(&self) -> Option<Arc<SessionMemory>> {
        self.memory
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

pub struct Engine {
    state: Arc<EngineState>,
    watch: tokio::sync::Mutex<Option<WatchHandle>>,
    started_at: Instant,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let caches = Arc::new(CacheManager::new(&config.cache));
        let semantic = Arc::new(SemanticIndex::new(config.semantic.clone(), caches.clone()));
        let state = Arc::new(EngineState {
            config: Arc::new(config),
            index: tokio::sync::RwLock::new(SearchIndex::new()),
            semantic,
            caches,
            cancel: CancellationToken::new(),
            root: std::sync::RwLock::new(None),
            layout: std::sync::RwLock::new(None),
            memory: std::sync::RwLock::new(None),
        });
        Self {
            state,
            watch: tokio::sync::Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.state.config.clone()
    }

    /// Index a directory tree, replacing or updating the current root
    pub async fn index_path(&self, req: IndexPathRequest) -> Result<IndexReport, EngineError> {
        if req.path.trim().is_empty() {
            return Err(ValidationError::Empty("path".to_string()).into());
        }
        let root = PathBuf::from(&req.path);
        let root = root
            .canonicalize()
            .map_err(|_| ValidationError::PathNotFound(req.path.clone()))?;
        if !root.is_dir() {
            return Err(ValidationError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            ))
            .into());
        }

        if let Some(enabled) = req.enable_semantic {
            self.state.semantic.set_enabled(enabled);
        }

        self.attach_root(root.clone()).await?;
        let mut report =
            indexing::run_index(&self.state, &root, req.force, req.recursive).await?;

        if req.watch || self.state.config.watcher.auto_start {
            match self.start_watch().await {
                Ok(()) => report.watcher_started = true,
                Err(EngineError::Watcher(WatcherError::AlreadyRunning)) => {
                    report.watcher_started = true;
                }
                Err(e) => warn!("Watcher did not start: {}", e),
            }
        }
        Ok(report)
    }

    /// Bind storage, caches, memory, and any previous snapshot to `root`
    async fn attach_root(&self, root: PathBuf) -> Result<(), EngineError> {
        let previous = self.state.root();
        if previous.as_ref() == Some(&root) {
            return Ok(());
        }
        if previous.is_some() {
            // Switching roots abandons the old in-memory state
            self.stop_watch().await.ok();
            let mut index = self.state.index.write().await;
            *index = SearchIndex::new();
            self.state.semantic.retain_chunks(&|_| false);
        }

        let layout = StorageLayout::new(self.state.config.data_dir_for(&root))?;
        self.state.caches.load(&layout.cache_dir());

        match SessionMemory::open(&layout.sessions_path()) {
            Ok(memory) => {
                *self.state.memory.write().unwrap_or_else(|p| p.into_inner()) =
                    Some(Arc::new(memory));
            }
            Err(e) => warn!("Session memory unavailable: {}", e),
        }

        // Reuse the previous snapshot when it belongs to this root
        {
            let mut index = self.state.index.write().await;
            match index.load(&layout) {
                Ok(Some(recorded)) if recorded == root.display().to_string() => {
                    info!("Loaded snapshot with {} chunks", index.chunk_count());
                    if let Err(e) = self.state.semantic.load(&layout) {
                        warn!("Embedding snapshot unreadable: {:#}", e);
                    }
                }
                Ok(Some(_)) | Ok(None) => {
                    *index = SearchIndex::new();
                }
                Err(e) => {
                    warn!("Index snapshot unreadable, rebuilding: {:#}", e);
                    *index = SearchIndex::new();
                }
            }
        }

        *self.state.layout.write().unwrap_or_else(|p| p.into_inner()) = Some(layout);
        *self.state.root.write().unwrap_or_else(|p| p.into_inner()) = Some(root);
        Ok(())
    }

    /// Re-index the current root, or start/stop/query the watcher
    pub async fn auto_index(&self, req: AutoIndexRequest) -> Result<AutoIndexResponse, EngineError> {
        match req.action.as_deref() {
            None | Some("run") => {
                let Some(root) = self.state.root() else {
                    return Ok(AutoIndexResponse {
                        triggered: false,
                        report: None,
                        message: Some("No indexed root yet; call index_path first".to_string()),
                        watcher: None,
                    });
                };
                let report = indexing::run_index(&self.state, &root, req.force, true).await?;
                Ok(AutoIndexResponse {
                    triggered: true,
                    report: Some(report),
                    message: None,
                    watcher: None,
                })
            }
            Some("start") => {
                let message = match self.start_watch().await {
                    Ok(()) => None,
                    Err(EngineError::Watcher(WatcherError::AlreadyRunning)) => {
                        Some("Watcher is already running".to_string())
                    }
                    Err(e) => return Err(e),
                };
                Ok(self.watcher_response(message).await)
            }
            Some("stop") => {
                let message = match self.stop_watch().await {
                    Ok(()) => None,
                    Err(EngineError::Watcher(WatcherError::NotRunning)) => {
                        Some("Watcher is not running".to_string())
                    }
                    Err(e) => return Err(e),
                };
                Ok(self.watcher_response(message).await)
            }
            Some("status") => Ok(self.watcher_response(None).await),
            Some(other) => Err(ValidationError::ConstraintViolation {
                field: "action".to_string(),
                constraint: "one of run, start, stop, status".to_string(),
                actual: other.to_string(),
            }
            .into()),
        }
    }

    async fn watcher_response(&self, message: Option<String>) -> AutoIndexResponse {
        AutoIndexResponse {
            triggered: false,
            report: None,
            message,
            watcher: Some(self.watcher_status().await),
        }
    }

    async fn watcher_status(&self) -> WatcherStatusInfo {
        let guard = self.watch.lock().await;
        match guard.as_ref() {
            Some(handle) => handle.status().info(),
            None => WatcherStatusInfo {
                running: false,
                backend: None,
                events_seen: 0,
                batches_applied: 0,
            },
        }
    }

    /// Hybrid search over the index
    pub async fn search(&self, req: SearchCodeRequest) -> Result<SearchResponse, EngineError> {
        let query = req.query.trim().to_string();
        if query.is_empty() {
            return Err(ValidationError::Empty("query".to_string()).into());
        }
        let limit = if req.limit == 0 {
            self.state.config.search.default_limit
        } else {
            req.limit
        };
        let semantic_requested = req
            .semantic
            .unwrap_or_else(|| self.state.semantic.is_enabled());
        let mut search_config = self.state.config.search.clone();
        if let Some(weight) = req.semantic_weight {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ValidationError::ConstraintViolation {
                    field: "semantic_weight".to_string(),
                    constraint: "between 0.0 and 1.0".to_string(),
                    actual: weight.to_string(),
                }
                .into());
            }
            search_config.semantic_weight = weight;
        }

        let cache_key = format!(
            "search|{}|{}|{}|{}|{}",
            query,
            limit,
            semantic_requested,
            search_config.semantic_weight,
            req.paths.join(",")
        );
        if let Some(mut cached) = self
            .state
            .caches
            .get::<SearchResponse>(NS_SEARCH, &cache_key)
        {
            cached.cached = true;
            return Ok(cached);
        }

        let started = Instant::now();
        let (ranked, total_candidates, semantic_used) = self
            .retrieve(&query, limit, semantic_requested, &req.paths, &search_config)
            .await?;

        let results: Vec<SearchHit> = ranked
            .into_iter()
            .map(|(r, chunk)| SearchHit {
                summary: packer::summarize(
                    &chunk.path,
                    chunk.start_line,
                    chunk.end_line,
                    &chunk.content,
                    &query,
                ),
                chunk_id: r.chunk_id,
                path: chunk.path,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                language: chunk.language,
                score: r.score,
                lexical_score: r.lexical_norm,
                semantic_score: r.semantic,
            })
            .collect();

        let response = SearchResponse {
            query,
            results,
            total_candidates,
            semantic_used,
            cached: false,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.state.caches.put(NS_SEARCH, &cache_key, &response);
        Ok(response)
    }

    /// Build a token-budgeted context pack for a query
    pub async fn context_pack(
        &self,
        req: ContextPackRequest,
    ) -> Result<ContextPackResponse, EngineError> {
        let query = req.query.trim().to_string();
        if query.is_empty() {
            return Err(ValidationError::Empty("query".to_string()).into());
        }
        if req.token_budget == 0 {
            return Err(ValidationError::ConstraintViolation {
                field: "token_budget".to_string(),
                constraint: "greater than zero".to_string(),
                actual: "0".to_string(),
            }
            .into());
        }
        let limit = if req.limit == 0 {
            self.state.config.search.default_limit
        } else {
            req.limit
        };

        let cache_key = format!("pack|{}|{}|{}", query, req.token_budget, limit);
        if let Some(mut cached) = self
            .state
            .caches
            .get::<ContextPackResponse>(NS_CONTEXT, &cache_key)
        {
            cached.cached = true;
            return Ok(cached);
        }

        let semantic_requested = self.state.semantic.is_enabled();
        let (ranked, _, _) = self
            .retrieve(&query, limit, semantic_requested, &[], &self.state.config.search)
            .await?;
        let candidates: Vec<PackCandidate> = ranked
            .into_iter()
            .map(|(_, chunk)| PackCandidate {
                chunk_id: chunk.id,
                path: chunk.path,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                content: chunk.content,
            })
            .collect();

        let response = packer::pack(&query, candidates, req.token_budget);
        self.state.caches.put(NS_CONTEXT, &cache_key, &response);
        Ok(response)
    }

    /// Shared retrieval pipeline: lexical candidates, semantic fusion, MMR
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        semantic_requested: bool,
        paths: &[String],
        search_config: &SearchConfig,
    ) -> Result<(Vec<(Ranked, Chunk)>, usize, bool), EngineError> {
        let query_tokens = tokenize(query);
        let path_filter = if paths.is_empty() {
            None
        } else {
            Some(PatternFilter::new(paths, &[])?)
        };

        // Over-fetch so diversity filtering still has material to work with
        let fetch = limit.saturating_mul(search_config.candidate_multiplier).max(limit);

        let (candidates, chunks_by_id, total_candidates) = {
            let index = self.state.index.read().await;
            let mut scored = index.lexical.score(&query_tokens);
            scored.retain(|(id, _)| match (&path_filter, index.chunks.get(id)) {
                (Some(filter), Some(chunk)) => filter.matches(&chunk.path),
                (None, Some(_)) => true,
                (_, None) => false,
            });
            let total = scored.len();
            scored.sort_by(|(ida, sa), (idb, sb)| {
                sb.partial_cmp(sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ida.cmp(idb))
            });
            scored.truncate(fetch);

            let mut candidates = Vec::with_capacity(scored.len());
            let mut chunks_by_id = HashMap::with_capacity(scored.len());
            for (id, lexical) in scored {
                if let Some(chunk) = index.chunks.get(&id) {
                    candidates.push(Candidate::from_chunk(
                        chunk,
                        lexical,
                        None,
                        index.file_mtime(chunk),
                    ));
                    chunks_by_id.insert(id, chunk.clone());
                }
            }
            (candidates, chunks_by_id, total)
        };

        let mut candidates = candidates;
        let mut semantic_used = false;
        if semantic_requested && !candidates.is_empty() {
            let pairs: Vec<(String, String)> = candidates
                .iter()
                .filter_map(|c| {
                    chunks_by_id
                        .get(&c.chunk_id)
                        .map(|chunk| (chunk.id.clone(), chunk.signature.clone()))
                })
                .collect();
            let semantic = self.state.semantic.clone();
            let query_owned = query.to_string();
            let scores = tokio::task::spawn_blocking(move || {
                semantic.query_scores(&query_owned, &pairs)
            })
            .await
            .map_err(|e| EngineError::other(e.to_string()))?;
            if !scores.is_empty() {
                semantic_used = true;
                for candidate in &mut candidates {
                    candidate.semantic = scores.get(&candidate.chunk_id).copied();
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        let ranked = ranker::rank(candidates, search_config, now, limit);
        let paired = ranked
            .into_iter()
            .filter_map(|r| chunks_by_id.get(&r.chunk_id).cloned().map(|c| (r, c)))
            .collect();
        Ok((paired, total_candidates, semantic_used))
    }

    pub fn cache_stats(&self, req: CacheStatsRequest) -> Result<CacheStatsResponse, EngineError> {
        let namespaces = self.state.caches.stats(req.namespace.as_deref())?;
        Ok(CacheStatsResponse { namespaces })
    }

    pub fn cache_clear(&self, req: CacheClearRequest) -> Result<CacheClearResponse, EngineError> {
        let (cleared_namespaces, entries_removed, prior_stats) =
            self.state.caches.clear(req.namespace.as_deref())?;
        Ok(CacheClearResponse {
            cleared_namespaces,
            entries_removed,
            prior_stats,
        })
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let (files, chunks, distinct_terms) = {
            let index = self.state.index.read().await;
            (
                index.file_count(),
                index.chunk_count(),
                index.lexical.distinct_terms(),
            )
        };
        let watcher = self.watcher_status().await;
        Ok(EngineStats {
            root: self.state.root().map(|r| r.display().to_string()),
            files,
            chunks,
            distinct_terms,
            embedded_chunks: self.state.semantic.embedded_count(),
            embedding_provider: self.state.semantic.provider_name(),
            watcher,
            cache: self.state.caches.stats(None)?,
            uptime_secs: self.started_at.elapsed().as_secs(),
        })
    }

    /// Record a session summary for later resume
    pub fn record_session(
        &self,
        req: RecordSessionRequest,
    ) -> Result<SessionSummaryRecord, EngineError> {
        if req.title.trim().is_empty() {
            return Err(ValidationError::Empty("title".to_string()).into());
        }
        let scope = match req.scope {
            Some(s) if !s.trim().is_empty() => s,
            _ => self
                .state
                .root()
                .map(|r| r.display().to_string())
                .ok_or_else(|| {
                    EngineError::other("No indexed root and no scope given; index a path first")
                })?,
        };
        let memory = self
            .state
            .memory()
            .ok_or_else(|| EngineError::other("Session memory is not available"))?;
        let id = memory.record(
            &scope,
            req.title.trim(),
            &req.details,
            req.next_action.as_deref(),
        )?;
        Ok(SessionSummaryRecord {
            id,
            scope,
            title: req.title.trim().to_string(),
            details: req.details,
            next_action: req.next_action,
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Combine the last summary, open TODO markers, and recent commits
    pub async fn resume(&self, req: ResumeRequest) -> Result<ResumeResponse, EngineError> {
        let root = self.state.root();
        let scope = req
            .scope
            .filter(|s| !s.trim().is_empty())
            .or_else(|| root.as_ref().map(|r| r.display().to_string()));

        let summary = match (&scope, self.state.memory()) {
            (Some(scope), Some(memory)) => memory.latest(scope)?,
            _ => None,
        };

        let todos = self.scan_todos(20).await;
        let recent_commits = match root {
            Some(root) => {
                tokio::task::spawn_blocking(move || memory::recent_commits(&root, 5))
                    .await
                    .map_err(|e| EngineError::other(e.to_string()))?
            }
            None => Vec::new(),
        };

        let available = summary.is_some() || !todos.is_empty() || !recent_commits.is_empty();
        Ok(ResumeResponse {
            available,
            summary,
            todos,
            recent_commits,
        })
    }

    /// Find TODO/FIXME markers in indexed chunks, deduplicated by location
    async fn scan_todos(&self, cap: usize) -> Vec<TodoItem> {
        let index = self.state.index.read().await;
        let mut seen: HashSet<(String, usize)> = HashSet::new();
        let mut todos = Vec::new();
        for chunk in index.chunks.values() {
            for (offset, line) in chunk.content.lines().enumerate() {
                if let Some(caps) = TODO_RE.captures(line) {
                    let line_no = chunk.start_line + offset;
                    if seen.insert((chunk.path.clone(), line_no)) {
                        let marker = caps.get(1).map(|m| m.as_str()).unwrap_or("TODO");
                        let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                        todos.push(TodoItem {
                            path: chunk.path.clone(),
                            line: line_no,
                            text: format!("{} {}", marker.to_uppercase(), rest),
                        });
                    }
                }
            }
        }
        todos.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        todos.truncate(cap);
        todos
    }

    /// Start watching the bound root
    pub async fn start_watch(&self) -> Result<(), EngineError> {
        let Some(root) = self.state.root() else {
            return Err(ValidationError::PathNotFound("no indexed root".to_string()).into());
        };
        let mut guard = self.watch.lock().await;
        if guard.is_some() {
            return Err(WatcherError::AlreadyRunning.into());
        }

        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<FileEvent>>(16);
        let data_dir = self
            .state
            .layout()
            .map(|l| l.data_dir().to_path_buf())
            .unwrap_or_else(|| root.join(".code_slice"));
        let handle = watcher::start(
            root.clone(),
            &self.state.config.watcher,
            &self.state.config.indexing,
            data_dir,
            batch_tx,
            &self.state.cancel,
        )?;
        *guard = Some(handle);

        // Single applier task keeps index updates serialized
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                let count = batch.len();
                match indexing::apply_events(&state, &root, batch).await {
                    Ok((created, removed)) => info!(
                        "Applied {} file events: +{} / -{} chunks",
                        count, created, removed
                    ),
                    Err(e) => warn!("Failed to apply watcher batch: {}", e),
                }
            }
        });
        Ok(())
    }

    pub async fn stop_watch(&self) -> Result<(), EngineError> {
        let mut guard = self.watch.lock().await;
        match guard.take() {
            Some(handle) => {
                handle.stop();
                Ok(())
            }
            None => Err(WatcherError::NotRunning.into()),
        }
    }

    /// Persist everything and cancel background tasks
    pub async fn shutdown(&self) {
        self.stop_watch().await.ok();
        self.state.cancel.cancel();
        if let Some(root) = self.state.root()
            && let Err(e) = indexing::persist_snapshot(&self.state, &root).await
        {
            warn!("Snapshot not persisted on shutdown: {}", e);
        }
        if let Some(layout) = self.state.layout() {
            self.state.caches.save(&layout.cache_dir());
        }
        info!("Engine shut down");
    }
}
