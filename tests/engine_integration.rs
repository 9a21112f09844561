//! End-to-end tests driving the engine the way the MCP tools do
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use code_slice::config::Config;
use code_slice::engine::Engine;
use code_slice::types::*;
use tempfile::TempDir;

/// Deterministic test configuration: one line per chunk, no recency boost,
/// term-vector embeddings instead of the real model
fn line_config() -> Config {
    let mut config = Config::default();
    config.indexing.chunk_lines = 1;
    config.indexing.overlap_lines = 0;
    config.indexing.boundary_aware = false;
    config.search.recency_weight = 0.0;
    config.semantic.model_name = "term-vector".to_string();
    config
}

fn write_corpus(root: &Path) {
    fs::write(root.join("one.txt"), "alpha beta").unwrap();
    fs::write(root.join("two.txt"), "beta gamma").unwrap();
    fs::write(root.join("three.txt"), "gamma delta").unwrap();
}

async fn indexed_engine(config: Config, root: &Path) -> Engine {
    let engine = Engine::new(config);
    let report = engine
        .index_path(IndexPathRequest {
            path: root.display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: false,
        })
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 3);
    engine
}

fn search_req(query: &str, limit: usize) -> SearchCodeRequest {
    SearchCodeRequest {
        query: query.to_string(),
        limit,
        semantic: None,
        semantic_weight: None,
        paths: Vec::new(),
    }
}

#[tokio::test]
async fn test_index_and_search_ranking() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    // "alpha beta" matches both terms of the first chunk, one of the second
    let response = engine.search(search_req("alpha beta", 2)).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].path, "one.txt");
    assert_eq!(response.results[1].path, "two.txt");
    assert!(response.results[0].score > response.results[1].score);
    assert!(!response.cached);
}

#[tokio::test]
async fn test_search_results_are_reproducible() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let first = engine.search(search_req("beta gamma", 3)).await.unwrap();
    engine
        .cache_clear(CacheClearRequest { namespace: None })
        .unwrap();
    let second = engine.search(search_req("beta gamma", 3)).await.unwrap();

    let ids = |r: &SearchResponse| {
        r.results
            .iter()
            .map(|h| h.chunk_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    for (a, b) in first.results.iter().zip(second.results.iter()) {
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_second_search_is_cached() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let first = engine.search(search_req("beta", 5)).await.unwrap();
    assert!(!first.cached);
    let second = engine.search(search_req("beta", 5)).await.unwrap();
    assert!(second.cached);
    // Normalized key: spacing and case do not matter
    let third = engine.search(search_req("  BETA ", 5)).await.unwrap();
    assert!(third.cached);

    let stats = engine
        .cache_stats(CacheStatsRequest {
            namespace: Some("search".to_string()),
        })
        .unwrap();
    assert!(stats.namespaces[0].hits >= 2);
}

#[tokio::test]
async fn test_cache_clear_returns_prior_counters() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    engine.search(search_req("beta", 5)).await.unwrap();
    engine.search(search_req("beta", 5)).await.unwrap();

    let cleared = engine
        .cache_clear(CacheClearRequest { namespace: None })
        .unwrap();
    let search_prior = cleared
        .prior_stats
        .iter()
        .find(|s| s.namespace == "search")
        .unwrap();
    assert_eq!(search_prior.hits, 1);
    assert_eq!(search_prior.misses, 1);

    let stats = engine
        .cache_stats(CacheStatsRequest {
            namespace: Some("search".to_string()),
        })
        .unwrap();
    assert_eq!(stats.namespaces[0].hits, 0);
    assert_eq!(stats.namespaces[0].entries, 0);
}

#[tokio::test]
async fn test_reindex_skips_unchanged_files() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let again = engine
        .auto_index(AutoIndexRequest { force: false, action: None })
        .await
        .unwrap();
    let report = again.report.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.files_skipped, 3);
    assert_eq!(report.chunks_created, 0);
}

#[tokio::test]
async fn test_deleted_file_leaves_no_results() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    assert!(!engine
        .search(search_req("delta", 5))
        .await
        .unwrap()
        .results
        .is_empty());

    fs::remove_file(dir.path().join("three.txt")).unwrap();
    let report = engine
        .auto_index(AutoIndexRequest { force: false, action: None })
        .await
        .unwrap()
        .report
        .unwrap();
    assert_eq!(report.files_removed, 1);

    let response = engine.search(search_req("delta", 5)).await.unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_modified_file_is_rechunked() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    fs::write(dir.path().join("one.txt"), "epsilon zeta").unwrap();
    engine
        .auto_index(AutoIndexRequest { force: false, action: None })
        .await
        .unwrap();

    assert!(engine
        .search(search_req("alpha", 5))
        .await
        .unwrap()
        .results
        .is_empty());
    let response = engine.search(search_req("epsilon", 5)).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].path, "one.txt");
}

#[tokio::test]
async fn test_semantic_toggle_per_request() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let with = engine
        .search(SearchCodeRequest {
            semantic: Some(true),
            ..search_req("beta gamma", 3)
        })
        .await
        .unwrap();
    assert!(with.semantic_used);
    assert!(with.results[0].semantic_score.is_some());

    let without = engine
        .search(SearchCodeRequest {
            semantic: Some(false),
            ..search_req("beta gamma", 3)
        })
        .await
        .unwrap();
    assert!(!without.semantic_used);
    assert!(without.results[0].semantic_score.is_none());
    // Lexical-only still returns the same chunks
    assert_eq!(with.results.len(), without.results.len());
}

#[tokio::test]
async fn test_semantic_weight_override() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    // With the weight forced to zero, the semantic channel cannot move scores
    let zero = engine
        .search(SearchCodeRequest {
            semantic_weight: Some(0.0),
            ..search_req("beta gamma", 3)
        })
        .await
        .unwrap();
    let plain = engine
        .search(SearchCodeRequest {
            semantic: Some(false),
            ..search_req("beta gamma", 3)
        })
        .await
        .unwrap();
    for (a, b) in zero.results.iter().zip(plain.results.iter()) {
        assert_eq!(a.chunk_id, b.chunk_id);
        assert!((a.score - b.score).abs() < 1e-6);
    }

    // Out-of-range weights are an input error
    assert!(engine
        .search(SearchCodeRequest {
            semantic_weight: Some(1.5),
            ..search_req("beta", 3)
        })
        .await
        .is_err());
}

#[tokio::test]
async fn test_path_filter_restricts_results() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let response = engine
        .search(SearchCodeRequest {
            paths: vec!["two.*".to_string()],
            ..search_req("beta", 5)
        })
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].path, "two.txt");
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    assert!(engine.search(search_req("   ", 5)).await.is_err());
    assert!(engine
        .context_pack(ContextPackRequest {
            query: "".to_string(),
            token_budget: 100,
            limit: 5,
        })
        .await
        .is_err());
}

#[tokio::test]
async fn test_context_pack_respects_budget() {
    let dir = TempDir::new().unwrap();
    let body = (0..40)
        .map(|i| format!("pack_target line number {}", i))
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(dir.path().join("big.txt"), &body).unwrap();

    let mut config = Config::default();
    config.search.recency_weight = 0.0;
    config.semantic.model_name = "term-vector".to_string();
    let engine = Engine::new(config);
    engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: false,
        })
        .await
        .unwrap();

    // The single chunk is far over 50 tokens; packing must trim it
    let response = engine
        .context_pack(ContextPackRequest {
            query: "pack_target".to_string(),
            token_budget: 50,
            limit: 5,
        })
        .await
        .unwrap();
    assert_eq!(response.sections.len(), 1);
    assert!(response.sections[0].truncated);
    assert!(response.tokens_used <= 50);
    assert_eq!(response.budget_remaining, 50 - response.tokens_used);

    // A larger budget packs at least as much
    let larger = engine
        .context_pack(ContextPackRequest {
            query: "pack_target".to_string(),
            token_budget: 400,
            limit: 5,
        })
        .await
        .unwrap();
    assert!(larger.tokens_used >= response.tokens_used);
    assert!(!larger.sections[0].truncated);
}

#[tokio::test]
async fn test_stats_reflect_index() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.files, 3);
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.distinct_terms, 4);
    assert_eq!(stats.embedded_chunks, 3);
    assert_eq!(stats.embedding_provider.as_deref(), Some("term-vector"));
    assert!(!stats.watcher.running);
    assert!(stats.root.is_some());
}

#[tokio::test]
async fn test_record_session_and_resume() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    fs::write(dir.path().join("todo.txt"), "TODO: wire up the frobnicator").unwrap();

    let mut config = line_config();
    config.indexing.chunk_lines = 10;
    let engine = Engine::new(config);
    engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: false,
        })
        .await
        .unwrap();

    let record = engine
        .record_session(RecordSessionRequest {
            scope: None,
            title: "Wired the parser".to_string(),
            details: "BM25 scoring in place".to_string(),
            next_action: Some("hook up the packer".to_string()),
        })
        .unwrap();
    assert!(record.id > 0);

    let resume = engine.resume(ResumeRequest { scope: None }).await.unwrap();
    assert!(resume.available);
    assert_eq!(resume.summary.unwrap().title, "Wired the parser");
    assert_eq!(resume.todos.len(), 1);
    assert!(resume.todos[0].text.contains("frobnicator"));
}

#[tokio::test]
async fn test_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    {
        let engine = indexed_engine(line_config(), dir.path()).await;
        engine.shutdown().await;
    }

    // A fresh engine on the same root loads the snapshot and skips re-chunking
    let engine = Engine::new(line_config());
    engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: false,
        })
        .await
        .unwrap();
    let response = engine.search(search_req("alpha", 5)).await.unwrap();
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn test_invalid_index_path() {
    let engine = Engine::new(line_config());
    let result = engine
        .index_path(IndexPathRequest {
            path: "/definitely/not/a/real/path".to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: false,
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_watch_applies_incremental_updates() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());

    let mut config = line_config();
    config.watcher.debounce_ms = 100;
    let engine = Arc::new(Engine::new(config));
    let report = engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: true,
        })
        .await
        .unwrap();
    assert!(report.watcher_started);

    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(dir.path().join("four.txt"), "omicron sigma").unwrap();

    // The applier invalidates the search cache once the batch lands
    let mut found = false;
    for _ in 0..100 {
        let response = engine.search(search_req("omicron", 5)).await.unwrap();
        if !response.results.is_empty() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(found, "watcher never surfaced the new file");
    engine.stop_watch().await.unwrap();
}

#[tokio::test]
async fn test_single_file_per_line_search() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("demo.txt"),
        "alpha beta\nbeta gamma\ngamma delta",
    )
    .unwrap();

    let engine = Engine::new(line_config());
    engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: None,
            watch: false,
        })
        .await
        .unwrap();

    // Both "beta" lines of the one file outrank everything else
    let response = engine
        .search(SearchCodeRequest {
            semantic: Some(false),
            ..search_req("beta", 2)
        })
        .await
        .unwrap();
    assert_eq!(response.results.len(), 2);
    let mut lines: Vec<usize> = response.results.iter().map(|h| h.start_line).collect();
    lines.sort_unstable();
    assert_eq!(lines, vec![1, 2]);
    for hit in &response.results {
        assert!(hit.summary.contains("beta"));
    }
}

#[tokio::test]
async fn test_non_recursive_index_stays_top_level() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested/deep.txt"), "omega psi").unwrap();

    let engine = Engine::new(line_config());
    let report = engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: false,
            enable_semantic: None,
            watch: false,
        })
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 3);

    let response = engine.search(search_req("omega", 5)).await.unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_enable_semantic_toggle_on_index() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());

    let engine = Engine::new(line_config());
    engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: false,
            recursive: true,
            enable_semantic: Some(false),
            watch: false,
        })
        .await
        .unwrap();
    let plain = engine.search(search_req("beta gamma", 3)).await.unwrap();
    assert!(!plain.semantic_used);

    // Re-enabling on a later index run restores the semantic channel
    engine
        .index_path(IndexPathRequest {
            path: dir.path().display().to_string(),
            force: true,
            recursive: true,
            enable_semantic: Some(true),
            watch: false,
        })
        .await
        .unwrap();
    let hybrid = engine.search(search_req("beta gamma", 3)).await.unwrap();
    assert!(hybrid.semantic_used);
    assert!(!hybrid.results.is_empty());
}

#[tokio::test]
async fn test_auto_index_watcher_control() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    let control = |action: &str| AutoIndexRequest {
        force: false,
        action: Some(action.to_string()),
    };

    let status = engine.auto_index(control("status")).await.unwrap();
    assert!(!status.watcher.unwrap().running);

    let started = engine.auto_index(control("start")).await.unwrap();
    let watcher = started.watcher.unwrap();
    assert!(watcher.running);
    assert!(watcher.backend.is_some());

    // Starting twice is tolerated, not an error
    let again = engine.auto_index(control("start")).await.unwrap();
    assert!(again.message.is_some());

    let stopped = engine.auto_index(control("stop")).await.unwrap();
    assert!(!stopped.watcher.unwrap().running);
    let idle = engine.auto_index(control("stop")).await.unwrap();
    assert!(idle.message.is_some());

    assert!(engine.auto_index(control("bounce")).await.is_err());
}

#[tokio::test]
async fn test_cache_clear_unknown_namespace_preserves_state() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    engine.search(search_req("beta", 5)).await.unwrap();
    engine.search(search_req("beta", 5)).await.unwrap();

    assert!(engine
        .cache_clear(CacheClearRequest {
            namespace: Some("bogus".to_string()),
        })
        .is_err());

    // The failed clear must not have touched any counters
    let stats = engine
        .cache_stats(CacheStatsRequest {
            namespace: Some("search".to_string()),
        })
        .unwrap();
    assert_eq!(stats.namespaces[0].hits, 1);
    assert_eq!(stats.namespaces[0].misses, 1);
}

#[tokio::test]
async fn test_cache_clear_is_scoped_to_the_namespace() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let engine = indexed_engine(line_config(), dir.path()).await;

    engine.search(search_req("beta", 5)).await.unwrap();
    let before = engine
        .cache_stats(CacheStatsRequest {
            namespace: Some("embeddings".to_string()),
        })
        .unwrap();

    let cleared = engine
        .cache_clear(CacheClearRequest {
            namespace: Some("search".to_string()),
        })
        .unwrap();
    assert_eq!(cleared.cleared_namespaces, vec!["search".to_string()]);
    assert_eq!(cleared.prior_stats.len(), 1);

    // Embedding counters and entries survive a search-only clear
    let after = engine
        .cache_stats(CacheStatsRequest {
            namespace: Some("embeddings".to_string()),
        })
        .unwrap();
    assert_eq!(after.namespaces[0].entries, before.namespaces[0].entries);
    assert_eq!(after.namespaces[0].misses, before.namespaces[0].misses);
    assert!(after.namespaces[0].entries > 0);
}
