use crate::chunking::{chunk_id, Chunker};
use crate::config::EngineConfig;
use crate::embeddings::Embedder;
use crate::error::{EngineError, Result};
use crate::index::{compute_signature, scan_files};
use crate::models::{
    Chunk, IndexReport, RecordMetadata, RetrievalResponse, Snippet, SourceRef, VectorRecord,
};
use crate::parser::{DocumentParser, TextFileParser};
use crate::traits::{
    ManagedVectorStore, META_CHUNK_COUNT, META_INDEXED_AT, META_INGEST_SIGNATURE,
};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Service object owning the store handle, the embedder, and the build
/// guard. Constructed once at process start and passed by reference; callers
/// never touch a half-built index because `ensure_indexed` runs before every
/// query.
pub struct RetrievalEngine<S, E>
where
    S: ManagedVectorStore,
    E: Embedder,
{
    store: S,
    embedder: E,
    parser: Box<dyn DocumentParser>,
    chunker: Chunker,
    config: EngineConfig,
    // single-flight rebuild guard: late callers await the in-progress build,
    // then re-check the signature and no-op
    build_lock: Mutex<()>,
}

impl<S, E> RetrievalEngine<S, E>
where
    S: ManagedVectorStore,
    E: Embedder,
{
    pub fn new(store: S, embedder: E, config: EngineConfig) -> Result<Self> {
        let chunker = Chunker::new(config.chunk_tokens, config.chunk_overlap)?;
        Ok(Self {
            store,
            embedder,
            parser: Box::new(TextFileParser),
            chunker,
            config,
            build_lock: Mutex::new(()),
        })
    }

    pub fn with_parser(mut self, parser: Box<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Idempotent: rebuilds only when the ingest signature changed (or a
    /// force flag is set), otherwise returns without touching the store's
    /// document rows.
    pub async fn ensure_indexed(&self) -> Result<IndexReport> {
        let _guard = self.build_lock.lock().await;

        self.store.init().await?;

        let files = scan_files(&self.config);
        let signature = compute_signature(&files)?;
        let current = self.store.get_meta(META_INGEST_SIGNATURE).await?;

        if !self.config.force_reindex && current.as_deref() == Some(signature.as_str()) {
            let chunks = self
                .store
                .get_meta(META_CHUNK_COUNT)
                .await?
                .and_then(|value| value.parse().ok())
                .unwrap_or(0);
            return Ok(IndexReport {
                reindexed: false,
                documents: files.len(),
                chunks,
            });
        }

        let mut documents = Vec::new();
        for path in &files {
            match self.parser.parse(path) {
                Ok(document) => documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unparsable document");
                }
            }
        }

        let mut chunks = Vec::new();
        for document in &documents {
            let source = document
                .source_path
                .clone()
                .unwrap_or_else(|| document.title.clone());
            for (ordinal, content) in self.chunker.chunk(&document.content).into_iter().enumerate()
            {
                chunks.push(Chunk {
                    id: chunk_id(&source, ordinal),
                    title: document.title.clone(),
                    content,
                    source_path: document.source_path.clone(),
                });
            }
        }

        if chunks.is_empty() {
            // a rebuild destroys and rewrites wholesale, even when the new
            // ingest set is empty; persisting the signature keeps later
            // calls from rescanning an unchanged empty directory
            self.store.clear().await?;
            self.store.set_meta(META_CHUNK_COUNT, "0").await?;
            self.store
                .set_meta(META_INDEXED_AT, &Utc::now().to_rfc3339())
                .await?;
            self.store
                .set_meta(META_INGEST_SIGNATURE, &signature)
                .await?;
            info!(documents = documents.len(), "indexed empty document set");
            return Ok(IndexReport {
                reindexed: true,
                documents: documents.len(),
                chunks: 0,
            });
        }

        // the full embedding set is computed before any store write, so a
        // reader never observes mixed dimensions
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
            embeddings.extend(self.embedder.embed(&texts).await?);
        }

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(EngineError::MissingDimension);
        }

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                id: chunk.id,
                embedding,
                text: chunk.content,
                metadata: RecordMetadata {
                    title: chunk.title,
                    url: chunk.source_path,
                },
            })
            .collect();

        self.store.clear().await?;
        self.store.upsert(&records, dimension).await?;
        self.store
            .set_meta(META_CHUNK_COUNT, &records.len().to_string())
            .await?;
        self.store
            .set_meta(META_INDEXED_AT, &Utc::now().to_rfc3339())
            .await?;
        // signature goes last: a failure above leaves the old signature in
        // place and the next call retries the full rebuild
        self.store
            .set_meta(META_INGEST_SIGNATURE, &signature)
            .await?;

        info!(
            documents = documents.len(),
            chunks = records.len(),
            dimension,
            "index rebuilt"
        );

        Ok(IndexReport {
            reindexed: true,
            documents: documents.len(),
            chunks: records.len(),
        })
    }

    /// Answers a similarity query with the best-matching excerpt plus ranked
    /// snippets. Relevance thresholds are the caller's concern: both the
    /// unified score and the raw distance are returned.
    pub async fn query(&self, input: &str) -> Result<RetrievalResponse> {
        if input.trim().is_empty() {
            return Ok(RetrievalResponse::unknown());
        }

        self.ensure_indexed().await?;

        let vectors = self.embedder.embed(&[input.to_string()]).await?;
        let embedding = vectors.into_iter().next().ok_or_else(|| {
            EngineError::Embedding("provider returned no vector for the query".to_string())
        })?;

        let top_k = self.config.top_k.clamp(1, 50);
        let matches = self.store.query(&embedding, top_k).await?;

        let Some(best) = matches.first() else {
            return Ok(RetrievalResponse::unknown());
        };

        let text = clip(&best.text, self.config.max_answer_chars);
        let score = Some(best.score);
        let distance = Some(best.raw_score);

        let sources = matches
            .iter()
            .map(|item| SourceRef {
                title: item.metadata.title.clone(),
                url: item.metadata.url.clone(),
            })
            .collect();
        let snippets = matches
            .iter()
            .map(|item| Snippet {
                title: item.metadata.title.clone(),
                url: item.metadata.url.clone(),
                content: clip(&item.text, self.config.max_snippet_chars),
                score: item.score,
                distance: item.raw_score,
            })
            .collect();

        Ok(RetrievalResponse {
            text,
            sources,
            score,
            distance,
            snippets,
        })
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        Ok(())
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(max_chars).collect();
        clipped.push_str("...");
        clipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{Match, RawScoreKind};
    use crate::stores::score_from_distance;
    use crate::traits::{ManagedVectorStore, VectorStore, META_EMBEDDING_DIM};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeStoreInner {
        records: StdMutex<Vec<VectorRecord>>,
        meta: StdMutex<HashMap<String, String>>,
        upsert_calls: AtomicUsize,
        clear_calls: AtomicUsize,
        last_top_k: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct FakeStore {
        inner: Arc<FakeStoreInner>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn init(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upsert(
            &self,
            records: &[VectorRecord],
            dimension: usize,
        ) -> Result<(), StoreError> {
            for record in records {
                if record.embedding.len() != dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: dimension,
                        got: record.embedding.len(),
                    });
                }
            }
            self.inner.upsert_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .meta
                .lock()
                .unwrap()
                .insert(META_EMBEDDING_DIM.to_string(), dimension.to_string());
            self.inner
                .records
                .lock()
                .unwrap()
                .extend(records.iter().cloned());
            Ok(())
        }

        async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Match>, StoreError> {
            self.inner.last_top_k.store(top_k, Ordering::SeqCst);
            let records = self.inner.records.lock().unwrap();
            let mut scored: Vec<(f64, &VectorRecord)> = records
                .iter()
                .map(|record| {
                    let distance = record
                        .embedding
                        .iter()
                        .zip(embedding.iter())
                        .map(|(a, b)| (a - b) as f64 * (a - b) as f64)
                        .sum::<f64>()
                        .sqrt();
                    (distance, record)
                })
                .collect();
            scored.sort_by(|left, right| left.0.total_cmp(&right.0));

            Ok(scored
                .into_iter()
                .take(top_k)
                .map(|(distance, record)| Match {
                    id: record.id.clone(),
                    score: score_from_distance(distance),
                    raw_score: distance,
                    raw_score_kind: RawScoreKind::Distance,
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                })
                .collect())
        }
    }

    #[async_trait]
    impl ManagedVectorStore for FakeStore {
        async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self.inner.meta.lock().unwrap().get(key).cloned())
        }

        async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner
                .meta
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.records.lock().unwrap().clear();
            Ok(())
        }
    }

    /// Deterministic character-trigram embedder; similar texts land near
    /// each other, which is all these tests need.
    #[derive(Clone, Default)]
    struct FakeEmbedder {
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    impl FakeEmbedder {
        fn embed_one(text: &str) -> Vec<f32> {
            let mut vector = vec![0f32; 16];
            let lowered = text.to_lowercase();
            let chars: Vec<char> = lowered.chars().collect();
            for window in chars.windows(3) {
                let token: String = window.iter().collect();
                let mut hash = 1469598103934665603u64;
                for byte in token.bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
                vector[(hash % 16) as usize] += 1.0;
            }
            let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if magnitude > 0.0 {
                for value in &mut vector {
                    *value /= magnitude;
                }
            }
            vector
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Embedding("provider down".to_string()));
            }
            Ok(texts.iter().map(|text| Self::embed_one(text)).collect())
        }
    }

    fn engine_for(
        docs_dir: &std::path::Path,
    ) -> (RetrievalEngine<FakeStore, FakeEmbedder>, FakeStore, FakeEmbedder) {
        let store = FakeStore::default();
        let embedder = FakeEmbedder::default();
        let config = EngineConfig {
            docs_dir: docs_dir.to_path_buf(),
            ..EngineConfig::default()
        };
        let engine =
            RetrievalEngine::new(store.clone(), embedder.clone(), config).unwrap();
        (engine, store, embedder)
    }

    #[tokio::test]
    async fn empty_query_short_circuits_without_embedding() {
        let dir = tempdir().unwrap();
        let (engine, store, embedder) = engine_for(dir.path());

        for input in ["", "   ", "\n\t"] {
            let response = engine.query(input).await.unwrap();
            assert_eq!(response.text, "unknown");
            assert!(response.sources.is_empty());
            assert!(response.score.is_none());
            assert!(response.distance.is_none());
        }

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.inner.upsert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ensure_indexed_is_idempotent() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\nHello world").unwrap();
        let (engine, store, _) = engine_for(dir.path());

        let first = engine.ensure_indexed().await.unwrap();
        let second = engine.ensure_indexed().await.unwrap();

        assert!(first.reindexed);
        assert!(!second.reindexed);
        assert_eq!(first.chunks, second.chunks);
        assert_eq!(store.inner.upsert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn file_change_triggers_exactly_one_reindex() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\nHello world").unwrap();
        let (engine, store, _) = engine_for(dir.path());

        engine.ensure_indexed().await.unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\nHello world, revised").unwrap();

        let report = engine.ensure_indexed().await.unwrap();
        assert!(report.reindexed);
        engine.ensure_indexed().await.unwrap();
        assert_eq!(store.inner.upsert_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hello_world_round_trip() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\nHello world").unwrap();
        let (engine, _, _) = engine_for(dir.path());

        engine.ensure_indexed().await.unwrap();
        let response = engine.query("hello").await.unwrap();

        assert_eq!(response.sources[0].title, "a.md");
        assert!(response.text.contains("Hello world"));
        assert!(response.score.is_some());
        assert!(response.distance.is_some());
        assert!(!response.snippets.is_empty());
    }

    #[tokio::test]
    async fn deleted_file_content_becomes_unreachable() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Alpha\nHello world").unwrap();
        let (engine, store, _) = engine_for(dir.path());
        engine.ensure_indexed().await.unwrap();

        std::fs::remove_file(dir.path().join("a.md")).unwrap();
        std::fs::write(dir.path().join("b.md"), "# Beta\nEntirely different topic").unwrap();
        let report = engine.ensure_indexed().await.unwrap();
        assert!(report.reindexed);

        // direct store check: only b.md chunks survive the rebuild
        let records = store.inner.records.lock().unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.metadata.title == "b.md"));
        assert!(records.iter().all(|r| !r.text.contains("Hello world")));
    }

    #[tokio::test]
    async fn top_k_is_clamped_to_valid_range() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "some indexed content here").unwrap();

        let store = FakeStore::default();
        let embedder = FakeEmbedder::default();
        let mut config = EngineConfig {
            docs_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        config.top_k = 1000;
        let engine = RetrievalEngine::new(store.clone(), embedder.clone(), config).unwrap();
        engine.query("content").await.unwrap();
        assert_eq!(store.inner.last_top_k.load(Ordering::SeqCst), 50);

        let store = FakeStore::default();
        let mut config = EngineConfig {
            docs_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        config.top_k = 0;
        let engine = RetrievalEngine::new(store.clone(), embedder, config).unwrap();
        engine.query("content").await.unwrap();
        assert_eq!(store.inner.last_top_k.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_ingest_set_persists_signature_and_zero_count() {
        let dir = tempdir().unwrap();
        let (engine, store, _) = engine_for(dir.path());

        let first = engine.ensure_indexed().await.unwrap();
        assert!(first.reindexed);
        assert_eq!(first.chunks, 0);

        let second = engine.ensure_indexed().await.unwrap();
        assert!(!second.reindexed);
        assert_eq!(
            store.inner.meta.lock().unwrap().get(META_CHUNK_COUNT).cloned(),
            Some("0".to_string())
        );
        assert_eq!(store.inner.clear_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embedding_failure_leaves_old_signature_so_rebuild_retries() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "hello world content").unwrap();
        let (engine, store, embedder) = engine_for(dir.path());

        embedder.fail.store(true, Ordering::SeqCst);
        assert!(engine.ensure_indexed().await.is_err());
        assert!(store
            .inner
            .meta
            .lock()
            .unwrap()
            .get(META_INGEST_SIGNATURE)
            .is_none());

        embedder.fail.store(false, Ordering::SeqCst);
        let report = engine.ensure_indexed().await.unwrap();
        assert!(report.reindexed);
        assert_eq!(store.inner.upsert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_indexed_records_share_one_dimension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "first document body").unwrap();
        std::fs::write(dir.path().join("b.md"), "second document body").unwrap();
        let (engine, store, _) = engine_for(dir.path());

        engine.ensure_indexed().await.unwrap();

        let records = store.inner.records.lock().unwrap();
        let stored_dim = store
            .inner
            .meta
            .lock()
            .unwrap()
            .get(META_EMBEDDING_DIM)
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.embedding.len() == stored_dim));
    }

    #[test]
    fn clip_appends_ellipsis_only_when_needed() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("hello world", 5), "hello...");
    }
}
