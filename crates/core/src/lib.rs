pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod parser;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_id, Chunker};
pub use config::{EmbeddingConfig, EngineConfig};
pub use embeddings::{Embedder, HttpEmbedder};
pub use engine::RetrievalEngine;
pub use error::{EngineError, StoreError};
pub use index::{compute_signature, scan_files};
pub use models::{
    Chunk, Document, IndexReport, Match, RawScoreKind, RecordMetadata, RetrievalResponse,
    Snippet, SourceRef, VectorRecord,
};
pub use parser::{DocumentParser, TextFileParser};
pub use stores::{score_from_distance, EmbeddedStore, RelationalStore};
pub use traits::{ManagedVectorStore, VectorStore};
