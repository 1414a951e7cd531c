use crate::error::StoreError;
use crate::models::{Match, RawScoreKind, RecordMetadata, VectorRecord};
use crate::stores::score_from_distance;
use crate::traits::{ManagedVectorStore, VectorStore, META_EMBEDDING_DIM};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Once;
use tokio::sync::Mutex;

static VEC_EXTENSION: Once = Once::new();

/// Registers sqlite-vec for every connection opened afterwards.
fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Little-endian f32 bytes, the layout sqlite-vec reads from BLOB columns.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Single-process, file-backed store: a `vec0` virtual table for the KNN
/// index plus a row-aligned `documents` table. The vector rowid is forced to
/// equal the document rowid, so the join is identity equality.
pub struct EmbeddedStore {
    conn: Mutex<Connection>,
}

impl EmbeddedStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        register_vec_extension();
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        register_vec_extension();
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn vectors_table_exists(conn: &Connection) -> Result<bool, StoreError> {
        let found = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'vectors'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl VectorStore for EmbeddedStore {
    async fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                url TEXT
            )",
            [],
        )?;
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

        let conn = self.conn.lock().await;

        let stored = Self::read_meta(&conn, META_EMBEDDING_DIM)?
            .and_then(|value| value.parse::<usize>().ok());
        if stored != Some(dimension) {
            // heterogeneous dimensions in one vec0 table are invalid
            conn.execute("DROP TABLE IF EXISTS vectors", [])?;
        }
        conn.execute(
            &format!("CREATE VIRTUAL TABLE IF NOT EXISTS vectors USING vec0(embedding float[{dimension}])"),
            [],
        )?;

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| {
            for record in records {
                conn.execute(
                    "INSERT INTO documents (record_id, title, content, url) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        record.id,
                        record.metadata.title,
                        record.text,
                        record.metadata.url
                    ],
                )?;
                let rowid = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO vectors (rowid, embedding) VALUES (?1, ?2)",
                    params![rowid, embedding_to_bytes(&record.embedding)],
                )?;
            }
            Self::write_meta(&conn, META_EMBEDDING_DIM, &dimension.to_string())?;
            Ok(())
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Match>, StoreError> {
        let conn = self.conn.lock().await;

        if !Self::vectors_table_exists(&conn)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            "SELECT d.record_id, d.title, d.content, d.url, v.distance
             FROM (SELECT rowid, distance FROM vectors
                   WHERE embedding MATCH ?1 AND k = ?2
                   ORDER BY distance) v
             JOIN documents d ON d.id = v.rowid",
        )?;

        let matches = stmt
            .query_map(
                params![embedding_to_bytes(embedding), top_k as i64],
                |row| {
                    let distance: f64 = row.get(4)?;
                    Ok(Match {
                        id: row.get(0)?,
                        score: score_from_distance(distance),
                        raw_score: distance,
                        raw_score_kind: RawScoreKind::Distance,
                        text: row.get(2)?,
                        metadata: RecordMetadata {
                            title: row.get(1)?,
                            url: row.get(3)?,
                        },
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(matches)
    }
}

#[async_trait]
impl ManagedVectorStore for EmbeddedStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        Self::read_meta(&conn, key)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        Self::write_meta(&conn, key, value)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| {
            conn.execute("DELETE FROM documents", [])?;
            if Self::vectors_table_exists(&conn)? {
                conn.execute("DELETE FROM vectors", [])?;
            }
            Ok(())
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }
}
