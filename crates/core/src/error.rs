use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("embedding dimension mismatch: store expects {expected}, record has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("unsupported store operation: {0}")]
    Unsupported(&'static str),

    #[error("corrupt store state: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("embedding dimension missing or zero for a non-empty chunk set")]
    MissingDimension,

    #[error("document parse error: {0}")]
    Parse(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
