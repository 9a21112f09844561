/// Configuration for the code-slice retrieval engine
///
/// Configuration is loaded from a TOML file, falls back to defaults when the
/// file is absent, and accepts `CODE_SLICE_*` environment overrides on top.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EngineError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Lines per chunk window
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    /// Lines of overlap between consecutive chunks
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    /// Snap chunk ends to blank lines or definition starts
    #[serde(default = "default_true")]
    pub boundary_aware: bool,
    /// How far (in lines) to look for a better boundary
    #[serde(default = "default_boundary_search_lines")]
    pub boundary_search_lines: usize,
    /// Skip files larger than this many bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Glob patterns to include (empty means all files)
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Glob patterns to exclude
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results when the caller does not ask for a limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Weight of the semantic score in the combined score (0.0 - 1.0)
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    /// Candidates fetched per requested result before diversity filtering
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Maximal-marginal-relevance tradeoff between relevance and diversity
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// Jaccard similarity above which a candidate is considered a near-duplicate
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f32,
    /// Weight of the recency boost in the final score (0.0 disables it)
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    /// Half-life in days for the recency decay
    #[serde(default = "default_recency_half_life_days")]
    pub recency_half_life_days: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Whether the semantic channel participates in scoring
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Embedding model name
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Chunks per embedding batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Truncate chunk text to this many characters before embedding
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,
    /// Fall back to deterministic term vectors when the model cannot load
    #[serde(default = "default_true")]
    pub term_vector_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Start watching automatically after an index operation
    #[serde(default)]
    pub auto_start: bool,
    /// Quiet period before a batch of file events is applied
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Polling interval when the native notification backend is unavailable
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for search results, in seconds
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,
    /// TTL for embeddings, in seconds
    #[serde(default = "default_embeddings_ttl")]
    pub embeddings_ttl_secs: u64,
    /// TTL for file metadata, in seconds
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_secs: u64,
    /// TTL for packed contexts, in seconds
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,
    /// Maximum entries per namespace before LRU eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Persist cache namespaces to disk on shutdown
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Data directory; defaults to `.code_slice` under the indexed root
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_chunk_lines() -> usize {
    80
}
fn default_overlap_lines() -> usize {
    12
}
fn default_boundary_search_lines() -> usize {
    10
}
fn default_max_file_size() -> usize {
    1_048_576
}
fn default_exclude_patterns() -> Vec<String> {
    [
        "**/.git/**",
        "**/target/**",
        "**/node_modules/**",
        "**/__pycache__/**",
        "**/.venv/**",
        "**/dist/**",
        "**/build/**",
        "**/*.min.js",
        "**/*.lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_limit() -> usize {
    10
}
fn default_semantic_weight() -> f32 {
    0.3
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_mmr_lambda() -> f32 {
    0.7
}
fn default_diversity_threshold() -> f32 {
    0.85
}
fn default_recency_weight() -> f32 {
    0.15
}
fn default_recency_half_life_days() -> f32 {
    30.0
}
fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_embed_chars() -> usize {
    2000
}
fn default_debounce_ms() -> u64 {
    2000
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_search_ttl() -> u64 {
    120
}
fn default_embeddings_ttl() -> u64 {
    14 * 24 * 3600
}
fn default_metadata_ttl() -> u64 {
    30 * 24 * 3600
}
fn default_context_ttl() -> u64 {
    7 * 24 * 3600
}
fn default_max_entries() -> usize {
    1000
}
fn default_true() -> bool {
    true
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_lines: default_chunk_lines(),
            overlap_lines: default_overlap_lines(),
            boundary_aware: true,
            boundary_search_lines: default_boundary_search_lines(),
            max_file_size: default_max_file_size(),
            include_patterns: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            semantic_weight: default_semantic_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            mmr_lambda: default_mmr_lambda(),
            diversity_threshold: default_diversity_threshold(),
            recency_weight: default_recency_weight(),
            recency_half_life_days: default_recency_half_life_days(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: default_model_name(),
            batch_size: default_batch_size(),
            max_embed_chars: default_max_embed_chars(),
            term_vector_fallback: true,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            debounce_ms: default_debounce_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: default_search_ttl(),
            embeddings_ttl_secs: default_embeddings_ttl(),
            metadata_ttl_secs: default_metadata_ttl(),
            context_ttl_secs: default_context_ttl(),
            max_entries: default_max_entries(),
            persist: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from file if present, otherwise use defaults with env overrides
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, EngineError> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            Some(p) => Err(ConfigError::LoadFailed(format!(
                "configuration file not found: {}",
                p.display()
            ))
            .into()),
            None => {
                let mut config = Config::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Save the effective configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Apply `CODE_SLICE_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODE_SLICE_CHUNK_LINES")
            && let Ok(n) = v.parse()
        {
            self.indexing.chunk_lines = n;
        }
        if let Ok(v) = std::env::var("CODE_SLICE_OVERLAP_LINES")
            && let Ok(n) = v.parse()
        {
            self.indexing.overlap_lines = n;
        }
        if let Ok(v) = std::env::var("CODE_SLICE_SEMANTIC_WEIGHT")
            && let Ok(w) = v.parse()
        {
            self.search.semantic_weight = w;
        }
        if let Ok(v) = std::env::var("CODE_SLICE_SEMANTIC_ENABLED") {
            self.semantic.enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CODE_SLICE_DEBOUNCE_MS")
            && let Ok(ms) = v.parse()
        {
            self.watcher.debounce_ms = ms;
        }
        if let Ok(v) = std::env::var("CODE_SLICE_CACHE_MAX_ENTRIES")
            && let Ok(n) = v.parse()
        {
            self.cache.max_entries = n;
        }
        if let Ok(v) = std::env::var("CODE_SLICE_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(v));
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.indexing.chunk_lines == 0 {
            return Err(ConfigError::InvalidValue {
                key: "indexing.chunk_lines".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.indexing.overlap_lines >= self.indexing.chunk_lines {
            return Err(ConfigError::InvalidValue {
                key: "indexing.overlap_lines".to_string(),
                reason: format!(
                    "must be smaller than chunk_lines ({})",
                    self.indexing.chunk_lines
                ),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.search.semantic_weight) {
            return Err(ConfigError::InvalidValue {
                key: "search.semantic_weight".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.search.mmr_lambda) {
            return Err(ConfigError::InvalidValue {
                key: "search.mmr_lambda".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.search.recency_weight) {
            return Err(ConfigError::InvalidValue {
                key: "search.recency_weight".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            }
            .into());
        }
        if self.search.candidate_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                key: "search.candidate_multiplier".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.max_entries".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Resolve the data directory for a given indexed root
    pub fn data_dir_for(&self, root: &Path) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| root.join(".code_slice"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.indexing.chunk_lines, 80);
        assert_eq!(config.search.default_limit, 10);
        assert!((config.search.semantic_weight - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_semantic_weight() {
        let mut config = Config::default();
        config.search.semantic_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let mut config = Config::default();
        config.indexing.chunk_lines = 10;
        config.indexing.overlap_lines = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.indexing.chunk_lines = 40;
        config.search.semantic_weight = 0.5;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.indexing.chunk_lines, 40);
        assert!((loaded.search.semantic_weight - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[indexing]\nchunk_lines = 20\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.indexing.chunk_lines, 20);
        assert_eq!(config.indexing.overlap_lines, 12);
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    fn test_data_dir_default() {
        let config = Config::default();
        let root = Path::new("/repo");
        assert_eq!(config.data_dir_for(root), PathBuf::from("/repo/.code_slice"));
    }
}
