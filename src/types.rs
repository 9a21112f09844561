/// Request and response types for the MCP tool surface
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_limit() -> usize {
    10
}

fn default_token_budget() -> usize {
    4000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IndexPathRequest {
    /// Directory to index (absolute, or relative to the server working directory)
    pub path: String,
    /// Re-chunk every file even when its content signature is unchanged
    #[serde(default)]
    pub force: bool,
    /// Descend into subdirectories; false indexes only the top level
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Turn the semantic channel on or off before indexing
    #[serde(default)]
    pub enable_semantic: Option<bool>,
    /// Start the incremental watcher after indexing completes
    #[serde(default)]
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexReport {
    pub root: String,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_created: usize,
    pub chunks_removed: usize,
    pub duration_ms: u64,
    pub watcher_started: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchCodeRequest {
    /// Search query (identifiers, phrases, or natural language)
    pub query: String,
    /// Maximum number of results to return
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Override the configured semantic toggle for this request
    #[serde(default)]
    pub semantic: Option<bool>,
    /// Override the configured semantic weight (0.0 - 1.0) for this request
    #[serde(default)]
    pub semantic_weight: Option<f32>,
    /// Restrict results to paths matching these globs
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchHit {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    /// Combined score after recency boost and diversity filtering
    pub score: f32,
    pub lexical_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
    /// Header line plus the most query-relevant lines of the chunk
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    /// Candidates scored before diversity filtering cut the list down
    pub total_candidates: usize,
    pub semantic_used: bool,
    pub cached: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ContextPackRequest {
    /// Query describing the task the context should support
    pub query: String,
    /// Token budget for the packed context
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Maximum number of candidate chunks to consider
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PackedSection {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub tokens: usize,
    /// True when trailing lines were dropped to fit the budget
    pub truncated: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContextPackResponse {
    pub query: String,
    pub sections: Vec<PackedSection>,
    pub budget_requested: usize,
    pub tokens_used: usize,
    pub budget_remaining: usize,
    /// tokens_used / budget_requested
    pub utilization: f32,
    pub cached: bool,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct StatsRequest {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CacheStatsRequest {
    /// Limit the report to a single namespace
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheNamespaceStats {
    pub namespace: String,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsResponse {
    pub namespaces: Vec<CacheNamespaceStats>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CacheClearRequest {
    /// Namespace to clear; omit to clear all namespaces
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearResponse {
    pub cleared_namespaces: Vec<String>,
    pub entries_removed: usize,
    /// Counter values at the moment of the clear, before the reset
    pub prior_stats: Vec<CacheNamespaceStats>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AutoIndexRequest {
    /// Re-chunk files even when content signatures are unchanged
    #[serde(default)]
    pub force: bool,
    /// "run" (default) re-indexes the bound root; "start", "stop", and
    /// "status" control the incremental watcher instead
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AutoIndexResponse {
    /// True when a reindex actually ran
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IndexReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Watcher state after a start/stop/status action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher: Option<WatcherStatusInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WatcherStatusInfo {
    pub running: bool,
    /// "notify" or "polling"
    pub backend: Option<String>,
    pub events_seen: u64,
    pub batches_applied: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EngineStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub files: usize,
    pub chunks: usize,
    pub distinct_terms: usize,
    pub embedded_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    pub watcher: WatcherStatusInfo,
    pub cache: Vec<CacheNamespaceStats>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RecordSessionRequest {
    /// Scope key, usually the indexed root path
    #[serde(default)]
    pub scope: Option<String>,
    pub title: String,
    pub details: String,
    /// Concrete next action to pick up on resume
    #[serde(default)]
    pub next_action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionSummaryRecord {
    pub id: i64,
    pub scope: String,
    pub title: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    /// Unix epoch seconds
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResumeRequest {
    /// Scope key; defaults to the currently indexed root
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TodoItem {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResumeResponse {
    /// False when there is nothing recorded and no repository signals
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummaryRecord>,
    pub todos: Vec<TodoItem>,
    pub recent_commits: Vec<CommitInfo>,
}
