//! Semantic nearest-neighbor store for complaint text
//!
//! Entries are keyed by complaint id; re-indexing replaces the stored
//! text, vector and metadata. Queries embed the query text, score every
//! entry by cosine distance (`1 - cos`, range `[0, 2]`) and return the
//! closest ones under a threshold, ascending.
//!
//! Vectors live in their own SQLite file next to the relational store so
//! the index can be rebuilt or swapped without touching complaint rows.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use civic_oracle::Embedder;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TriageError;

/// Attributes stored beside each vector and echoed back with matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityMetadata {
    pub location: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub complaint_id: i64,
    /// Cosine distance; lower is more similar
    pub distance: f32,
    pub metadata: SimilarityMetadata,
}

/// Embedding-backed similarity index
pub struct SimilarityIndex {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

impl SimilarityIndex {
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, TriageError> {
        info!("Opening similarity index at {:?}", path);
        let conn = Connection::open(path)
            .map_err(|e| TriageError::Database(format!("Failed to open similarity index: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| TriageError::Database(format!("Failed to set PRAGMA: {}", e)))?;
        Self::init(conn, embedder)
    }

    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, TriageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TriageError::Database(format!("Failed to open in-memory index: {}", e)))?;
        Self::init(conn, embedder)
    }

    fn init(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self, TriageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS similarity_entries (
                complaint_id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                embedder_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| TriageError::Database(format!("Similarity schema init failed: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, TriageError>
    where
        F: FnOnce(&Connection) -> Result<T, TriageError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TriageError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Upsert the entry for a complaint.
    pub async fn index(
        &self,
        complaint_id: i64,
        text: &str,
        metadata: &SimilarityMetadata,
    ) -> Result<(), TriageError> {
        let vector = self.embedder.embed(text).await?;
        let metadata_json = serde_json::to_string(metadata)?;

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO similarity_entries (complaint_id, text, embedding, metadata, embedder_id, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(complaint_id) DO UPDATE SET
                    text = excluded.text,
                    embedding = excluded.embedding,
                    metadata = excluded.metadata,
                    embedder_id = excluded.embedder_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    complaint_id,
                    text,
                    encode_vector(&vector),
                    metadata_json,
                    self.embedder.id(),
                    Utc::now().timestamp(),
                ],
            )
            .map_err(|e| TriageError::Database(format!("Index upsert failed: {}", e)))
        })?;

        debug!(complaint_id, dims = vector.len(), "Indexed complaint text");
        Ok(())
    }

    /// Nearest entries with `distance < threshold`, closest first, at most `limit`.
    pub async fn query(&self, text: &str, limit: usize, threshold: f32) -> Result<Vec<SimilarityMatch>, TriageError> {
        let query = self.embedder.embed(text).await?;

        let mut matches = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT complaint_id, embedding, metadata FROM similarity_entries WHERE embedder_id = ?")
                .map_err(|e| TriageError::Database(format!("Prepare similarity scan failed: {}", e)))?;
            let rows = stmt
                .query_map(params![self.embedder.id()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| TriageError::Database(format!("Similarity scan failed: {}", e)))?;

            let mut matches = Vec::new();
            for row in rows {
                let (complaint_id, blob, metadata_json) =
                    row.map_err(|e| TriageError::Database(format!("Similarity row parse failed: {}", e)))?;
                let Some(distance) = cosine_distance(&query, &decode_vector(&blob)) else {
                    continue;
                };
                if distance >= threshold {
                    continue;
                }
                let metadata = match serde_json::from_str(&metadata_json) {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(complaint_id, error = %e, "Skipping entry with unreadable metadata");
                        continue;
                    }
                };
                matches.push(SimilarityMatch {
                    complaint_id,
                    distance,
                    metadata,
                });
            }
            Ok(matches)
        })?;

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(limit);
        Ok(matches)
    }

    pub fn len(&self) -> Result<usize, TriageError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM similarity_entries", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| TriageError::Database(format!("Count failed: {}", e)))
        })
    }

    pub fn is_empty(&self) -> Result<bool, TriageError> {
        Ok(self.len()? == 0)
    }

    /// Stored text for a complaint, if indexed
    pub fn text_of(&self, complaint_id: i64) -> Result<Option<String>, TriageError> {
        use rusqlite::OptionalExtension;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT text FROM similarity_entries WHERE complaint_id = ?",
                params![complaint_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TriageError::Database(format!("Text lookup failed: {}", e)))
        })
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// `1 - cos(a, b)`. `None` when dimensions differ or either vector is zero.
fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        None
    } else {
        Some((1.0 - dot / denom).clamp(0.0, 2.0))
    }
}
