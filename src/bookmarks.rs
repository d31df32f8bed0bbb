use anyhow::{anyhow, bail};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::{hash::Hash, sync::Arc};

use crate::db::Database;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(default)]
    pub id: u64,

    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

impl Hash for Bookmark {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Bookmark {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Bookmark {}

impl Bookmark {
    /// Unsaved bookmark carrying only content, e.g. for ad-hoc tag requests.
    pub fn draft(title: &str, url: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BookmarkCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub url: String,
}

pub trait BookmarkManager: Send + Sync {
    fn create(&self, bookmark: BookmarkCreate) -> anyhow::Result<Bookmark>;
    fn get(&self, id: u64) -> anyhow::Result<Option<Bookmark>>;
    fn list(&self) -> anyhow::Result<Vec<Bookmark>>;
    /// Bookmarks that currently have a stored embedding.
    fn list_embedded(&self) -> anyhow::Result<Vec<Bookmark>>;
    fn set_tags(&self, id: u64, tags: Vec<String>) -> anyhow::Result<Bookmark>;
    fn set_embedding(&self, id: u64, embedding: &[f64]) -> anyhow::Result<()>;
    fn delete(&self, id: u64) -> anyhow::Result<()>;
}

/// SQLite bookmark store.
///
/// Embeddings are kept as a BLOB of little-endian f64 values, exactly
/// `dimensions * 8` bytes. Conversion and validation happen only here.
#[derive(Clone)]
pub struct BackendSqlite {
    db: Arc<Database>,
    dimensions: usize,
}

const SELECT_BOOKMARK: &str = "SELECT b.id, b.title, b.url, b.description, b.tags, e.embedding
    FROM bookmarks b
    LEFT JOIN bookmark_embeddings e ON e.bookmark_id = b.id";

impl BackendSqlite {
    pub fn new(db: Arc<Database>, dimensions: usize) -> Self {
        Self { db, dimensions }
    }

    fn encode_embedding(embedding: &[f64]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn decode_embedding(&self, id: u64, data: &[u8]) -> Option<Vec<f64>> {
        if data.len() != self.dimensions * 8 {
            log::warn!(
                "ignoring embedding of bookmark {id}: {} bytes, expected {}",
                data.len(),
                self.dimensions * 8
            );
            return None;
        }

        Some(
            data.chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    f64::from_le_bytes(bytes)
                })
                .collect(),
        )
    }

    fn read_row(&self, row: &Row) -> rusqlite::Result<Bookmark> {
        let id = row.get::<_, i64>(0)? as u64;
        let tags: String = row.get(4)?;
        let embedding: Option<Vec<u8>> = row.get(5)?;

        Ok(Bookmark {
            id,
            title: row.get(1)?,
            url: row.get(2)?,
            description: row.get(3)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            embedding: embedding.and_then(|data| self.decode_embedding(id, &data)),
        })
    }

    fn query(&self, sql: &str) -> anyhow::Result<Vec<Bookmark>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| self.read_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl BookmarkManager for BackendSqlite {
    fn create(&self, bmark_create: BookmarkCreate) -> anyhow::Result<Bookmark> {
        if bmark_create.url.trim().is_empty() {
            bail!("bookmark url is required");
        }

        let tags = bmark_create.tags.unwrap_or_default();
        let id = {
            let conn = self.db.conn()?;
            conn.execute(
                "INSERT INTO bookmarks (title, url, description, tags, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    bmark_create.title.unwrap_or_default(),
                    bmark_create.url,
                    bmark_create.description.unwrap_or_default(),
                    serde_json::to_string(&tags)?,
                    chrono::Utc::now().timestamp(),
                ],
            )?;
            conn.last_insert_rowid() as u64
        };

        log::info!("created bookmark {id}");
        self.get(id)?
            .ok_or_else(|| anyhow!("bookmark {id} vanished after insert"))
    }

    fn get(&self, id: u64) -> anyhow::Result<Option<Bookmark>> {
        let conn = self.db.conn()?;
        let bookmark = conn
            .query_row(
                &format!("{SELECT_BOOKMARK} WHERE b.id = ?1"),
                params![id as i64],
                |row| self.read_row(row),
            )
            .optional()?;
        Ok(bookmark)
    }

    fn list(&self) -> anyhow::Result<Vec<Bookmark>> {
        self.query(&format!("{SELECT_BOOKMARK} ORDER BY b.id"))
    }

    fn list_embedded(&self) -> anyhow::Result<Vec<Bookmark>> {
        Ok(self
            .query(&format!(
                "{SELECT_BOOKMARK} WHERE e.embedding IS NOT NULL ORDER BY b.id"
            ))?
            .into_iter()
            .filter(|b| b.embedding.is_some())
            .collect())
    }

    fn set_tags(&self, id: u64, tags: Vec<String>) -> anyhow::Result<Bookmark> {
        let updated = self.db.conn()?.execute(
            "UPDATE bookmarks SET tags = ?1 WHERE id = ?2",
            params![serde_json::to_string(&tags)?, id as i64],
        )?;
        if updated == 0 {
            bail!("bookmark {id} not found");
        }

        self.get(id)?.ok_or_else(|| anyhow!("bookmark {id} not found"))
    }

    fn set_embedding(&self, id: u64, embedding: &[f64]) -> anyhow::Result<()> {
        if embedding.len() != self.dimensions {
            bail!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            );
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            bail!("embedding contains non-finite values");
        }

        self.db.conn()?.execute(
            "INSERT INTO bookmark_embeddings (bookmark_id, embedding, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(bookmark_id) DO UPDATE SET embedding = excluded.embedding, updated_at = excluded.updated_at",
            params![
                id as i64,
                Self::encode_embedding(embedding),
                chrono::Utc::now().timestamp()
            ],
        )?;

        Ok(())
    }

    fn delete(&self, id: u64) -> anyhow::Result<()> {
        let deleted = self
            .db
            .conn()?
            .execute("DELETE FROM bookmarks WHERE id = ?1", params![id as i64])?;
        if deleted == 0 {
            bail!("bookmark {id} not found");
        }
        Ok(())
    }
}
