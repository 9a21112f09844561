/// Centralized error types for code-slice using thiserror
///
/// The taxonomy follows the engine's degradation policy: input and validation
/// errors are reported to the caller, capability errors degrade to a fallback,
/// resource errors are logged and the engine continues in-memory.
use thiserror::Error;

/// Main error type for the retrieval engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Session memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to file indexing
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("File size exceeds maximum: {size} > {max}")]
    FileTooLarge { size: usize, max: usize },

    #[error("Indexing was cancelled")]
    Cancelled,
}

/// Errors related to embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    InitializationFailed(String),

    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors related to the deterministic cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),
}

/// Errors related to the incremental watcher
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to start watcher backend: {0}")]
    StartFailed(String),

    #[error("Watcher is not running")]
    NotRunning,

    #[error("Watcher is already running")]
    AlreadyRunning,
}

/// Errors related to session memory
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Failed to open session store at '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Failed to record session summary: {0}")]
    RecordFailed(String),

    #[error("Failed to read session summaries: {0}")]
    ReadFailed(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Errors related to input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Path does not exist: {0}")]
    PathNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Empty {0}")]
    Empty(String),

    #[error("{field} must be {constraint}, got {actual}")]
    ConstraintViolation {
        field: String,
        constraint: String,
        actual: String,
    },
}

// Conversion from anyhow::Error to EngineError
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Other(format!("{:#}", err))
    }
}

impl EngineError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        EngineError::Other(msg.into())
    }

    /// Check if this is a caller error (bad input) vs an engine-side error
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::Config(ConfigError::InvalidValue { .. })
        )
    }
}
