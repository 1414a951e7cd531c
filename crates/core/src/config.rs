use std::path::PathBuf;
use std::time::Duration;

/// Engine-wide configuration, enumerated once at startup and passed by
/// reference into the engine constructor. Replaces ad-hoc environment reads.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the ingest directory tree.
    pub docs_dir: PathBuf,
    /// Lower-case extensions eligible for ingestion.
    pub allowed_extensions: Vec<String>,
    /// Path segments that exclude a file wherever they appear.
    pub excluded_segments: Vec<String>,
    /// Files larger than this are skipped silently.
    pub max_file_bytes: u64,
    /// Token-window size for chunking.
    pub chunk_tokens: usize,
    /// Token overlap between consecutive windows; clamped so the window
    /// step never drops below one token.
    pub chunk_overlap: usize,
    /// Chunk texts per embeddings request.
    pub embed_batch_size: usize,
    /// Requested result count; clamped to `[1, 50]` at query time.
    pub top_k: usize,
    /// Rebuild even when the ingest signature is unchanged.
    pub force_reindex: bool,
    /// Best-match excerpt length before the ellipsis marker.
    pub max_answer_chars: usize,
    /// Snippet excerpt length before the ellipsis marker.
    pub max_snippet_chars: usize,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embeddings endpoint; the client POSTs to
    /// `{base_url}/embeddings`.
    pub base_url: String,
    pub model: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("docs"),
            allowed_extensions: ["md", "markdown", "txt", "text"]
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
            excluded_segments: ["node_modules", ".git", "target"]
                .iter()
                .map(|segment| (*segment).to_string())
                .collect(),
            max_file_bytes: 1024 * 1024,
            chunk_tokens: 400,
            chunk_overlap: 40,
            embed_batch_size: 10,
            top_k: 4,
            force_reindex: false,
            max_answer_chars: 700,
            max_snippet_chars: 200,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}
