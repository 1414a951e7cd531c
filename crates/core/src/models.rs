use serde::{Deserialize, Serialize};

/// One eligible file from the ingest directory, before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    pub source_path: Option<String>,
}

/// A token-bounded slice of a document, the unit of embedding and retrieval.
///
/// `id` is a stable hash of `(source_path-or-title, ordinal)`, so the same
/// logical chunk keeps its identifier across rebuilds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub title: String,
    pub url: Option<String>,
}

/// The persisted form of a chunk: identifier, embedding, and retrievable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RawScoreKind {
    Distance,
    Similarity,
}

/// A single KNN result. `score` is the unified relevance value in `(0, 1]`,
/// monotonically decreasing in distance; `raw_score` is the backend's native
/// value before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub score: f64,
    pub raw_score: f64,
    pub raw_score_kind: RawScoreKind,
    pub text: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub score: f64,
    pub distance: f64,
}

/// Response shape consumed by the calling orchestration layer.
///
/// `score`/`distance` are `None` only for the "unknown" sentinel; the engine
/// never enforces a relevance threshold itself, callers decide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub score: Option<f64>,
    pub distance: Option<f64>,
    pub snippets: Vec<Snippet>,
}

impl RetrievalResponse {
    pub fn unknown() -> Self {
        Self {
            text: "unknown".to_string(),
            sources: Vec::new(),
            score: None,
            distance: None,
            snippets: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.score.is_none()
    }
}

/// Outcome of an `ensure_indexed` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexReport {
    pub reindexed: bool,
    pub documents: usize,
    pub chunks: usize,
}
