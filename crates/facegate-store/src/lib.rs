//! facegate-store — Enrolled reference embeddings in SQLite.
//!
//! One reference per subject. Embeddings are stored as a JSON array of
//! decimal strings and handed back in that raw form, so the verification
//! pipeline does the all-or-nothing parse.

use facegate_core::reference::{encode_reference, reference_strings};
use facegate_core::{Embedding, ReferenceSource};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS face_references (
    id            TEXT PRIMARY KEY,
    subject       TEXT NOT NULL UNIQUE,
    embedding     TEXT NOT NULL,
    dimension     INTEGER NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored embedding for {subject:?} is not a JSON array: {source}")]
    CorruptRow {
        subject: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode embedding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("refusing to enroll an empty embedding")]
    EmptyEmbedding,
    #[error("subject must not be empty")]
    EmptySubject,
}

/// Metadata for an enrolled reference (embedding values omitted).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceRecord {
    pub id: String,
    pub subject: String,
    pub dimension: usize,
    pub model_version: Option<String>,
    pub created_at: String,
}

/// SQLite-backed reference store.
#[derive(Clone)]
pub struct ReferenceStore {
    conn: Connection,
}

impl ReferenceStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "opened reference store");
        Self::init(conn).await
    }

    /// Private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Store `embedding` as the reference for `subject`, replacing any previous one.
    pub async fn enroll(
        &self,
        subject: &str,
        embedding: &Embedding,
    ) -> Result<ReferenceRecord, StoreError> {
        if subject.trim().is_empty() {
            return Err(StoreError::EmptySubject);
        }
        if embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }

        let record = ReferenceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject.to_string(),
            dimension: embedding.len(),
            model_version: embedding.model_version.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let encoded = serde_json::to_string(&encode_reference(embedding))?;

        let row = record.clone();
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO face_references
                         (id, subject, embedding, dimension, model_version, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(subject) DO UPDATE SET
                         id = excluded.id,
                         embedding = excluded.embedding,
                         dimension = excluded.dimension,
                         model_version = excluded.model_version,
                         created_at = excluded.created_at",
                    params![
                        row.id,
                        row.subject,
                        encoded,
                        row.dimension as i64,
                        row.model_version,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(
            subject,
            id = %record.id,
            dimension = record.dimension,
            "enrolled reference"
        );
        Ok(record)
    }

    /// Raw stored elements for `subject`.
    pub async fn fetch(&self, subject: &str) -> Result<Option<Vec<String>>, StoreError> {
        let key = subject.to_string();
        let text: Option<String> = self
            .conn
            .call(move |c| {
                let text = c
                    .query_row(
                        "SELECT embedding FROM face_references WHERE subject = ?1",
                        params![key],
                        |r| r.get(0),
                    )
                    .optional()?;
                Ok(text)
            })
            .await?;

        let Some(text) = text else {
            tracing::debug!(subject, "no reference enrolled");
            return Ok(None);
        };

        let values: Vec<serde_json::Value> =
            serde_json::from_str(&text).map_err(|source| StoreError::CorruptRow {
                subject: subject.to_string(),
                source,
            })?;
        Ok(Some(reference_strings(&values)))
    }

    /// All enrolled references, ordered by subject.
    pub async fn list(&self) -> Result<Vec<ReferenceRecord>, StoreError> {
        let records = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT id, subject, dimension, model_version, created_at
                     FROM face_references ORDER BY subject",
                )?;
                let rows = stmt
                    .query_map([], |r| {
                        Ok(ReferenceRecord {
                            id: r.get(0)?,
                            subject: r.get(1)?,
                            dimension: r.get::<_, i64>(2)? as usize,
                            model_version: r.get(3)?,
                            created_at: r.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(records)
    }

    /// Delete the reference for `subject`. Returns whether one existed.
    pub async fn remove(&self, subject: &str) -> Result<bool, StoreError> {
        let key = subject.to_string();
        let removed = self
            .conn
            .call(move |c| {
                let n = c.execute("DELETE FROM face_references WHERE subject = ?1", params![key])?;
                Ok(n > 0)
            })
            .await?;
        tracing::info!(subject, removed, "remove reference");
        Ok(removed)
    }
}

impl ReferenceSource for ReferenceStore {
    type Error = StoreError;

    async fn fetch_reference(&self, subject: &str) -> Result<Option<Vec<String>>, StoreError> {
        self.fetch(subject).await
    }
}
