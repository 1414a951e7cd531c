use crate::error::StoreError;
use crate::models::{Match, VectorRecord};
use async_trait::async_trait;

/// Minimal contract every backend implements.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent; creates metadata and document structures if absent.
    async fn init(&self) -> Result<(), StoreError>;

    /// Writes every record or nothing. `dimension` is mandatory: when it
    /// differs from the stored `embedding_dim`, the backend drops and
    /// recreates its vector structure before inserting, then persists the
    /// new dimension. A record whose embedding length differs from
    /// `dimension` fails the whole call.
    async fn upsert(&self, records: &[VectorRecord], dimension: usize) -> Result<(), StoreError>;

    /// Up to `top_k` nearest records, ordered by increasing distance.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Match>, StoreError>;

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Extended contract the index manager requires: metadata access plus the
/// full-rebuild `clear`. Capability is a compile-time bound, not a runtime
/// probe.
#[async_trait]
pub trait ManagedVectorStore: VectorStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes all document and vector rows; metadata survives.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Metadata keys shared by all backends.
pub const META_INGEST_SIGNATURE: &str = "ingest_signature";
pub const META_EMBEDDING_DIM: &str = "embedding_dim";
pub const META_CHUNK_COUNT: &str = "chunk_count";
pub const META_INDEXED_AT: &str = "indexed_at";
