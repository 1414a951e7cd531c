use crate::error::StoreError;
use crate::models::{Match, RawScoreKind, RecordMetadata, VectorRecord};
use crate::stores::score_from_distance;
use crate::traits::{ManagedVectorStore, VectorStore, META_EMBEDDING_DIM};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

/// Shared, concurrent-safe store on Postgres with the pgvector extension.
/// Vectors live in a dedicated table keyed by document id; KNN queries order
/// by the `<=>` distance operator.
pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn vectors_table_exists(&self) -> Result<bool, StoreError> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT to_regclass('retrieval_vectors')::text")
                .fetch_one(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl VectorStore for RelationalStore {
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS retrieval_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS retrieval_documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                url TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        // the vector table is sized to the embedding dimension, so it is
        // created on the first upsert once that dimension is known
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord], dimension: usize) -> Result<(), StoreError> {
        for record in records {
            if record.embedding.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    got: record.embedding.len(),
                });
            }
        }

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM retrieval_meta WHERE key = $1")
                .bind(META_EMBEDDING_DIM)
                .fetch_optional(&self.pool)
                .await?;
        let stored_dimension = stored.and_then(|value| value.parse::<usize>().ok());

        if stored_dimension != Some(dimension) {
            sqlx::query("DROP TABLE IF EXISTS retrieval_vectors")
                .execute(&self.pool)
                .await?;
        }
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS retrieval_vectors (
                document_id TEXT PRIMARY KEY REFERENCES retrieval_documents(id) ON DELETE CASCADE,
                embedding vector({dimension}) NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;

        // one transaction per upsert call; dropping the transaction on an
        // early return rolls everything back, so a crash mid-batch never
        // leaves an orphaned vector row
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO retrieval_documents (id, title, content, url)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE
                 SET title = EXCLUDED.title, content = EXCLUDED.content, url = EXCLUDED.url",
            )
            .bind(&record.id)
            .bind(&record.metadata.title)
            .bind(&record.text)
            .bind(&record.metadata.url)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO retrieval_vectors (document_id, embedding)
                 VALUES ($1, $2)
                 ON CONFLICT (document_id) DO UPDATE SET embedding = EXCLUDED.embedding",
            )
            .bind(&record.id)
            .bind(Vector::from(record.embedding.clone()))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "INSERT INTO retrieval_meta (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(META_EMBEDDING_DIM)
        .bind(dimension.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Match>, StoreError> {
        if !self.vectors_table_exists().await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT d.id, d.title, d.content, d.url, v.embedding <=> $1 AS distance
             FROM retrieval_vectors v
             JOIN retrieval_documents d ON d.id = v.document_id
             ORDER BY v.embedding <=> $1
             LIMIT $2",
        )
        .bind(Vector::from(embedding.to_vec()))
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let distance: f64 = row.try_get("distance")?;
            matches.push(Match {
                id: row.try_get("id")?,
                score: score_from_distance(distance),
                raw_score: distance,
                raw_score_kind: RawScoreKind::Distance,
                text: row.try_get("content")?,
                metadata: RecordMetadata {
                    title: row.try_get("title")?,
                    url: row.try_get("url")?,
                },
            });
        }

        Ok(matches)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl ManagedVectorStore for RelationalStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM retrieval_meta WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO retrieval_meta (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        if self.vectors_table_exists().await? {
            sqlx::query("DELETE FROM retrieval_vectors")
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM retrieval_documents")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
