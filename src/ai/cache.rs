//! Tag response cache keyed by content hash.
//!
//! The cache only saves generation cost. Every store failure is logged and
//! absorbed: lookups degrade to a miss, writes and cleanup become no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::ai::hasher::content_hash;
use crate::bookmarks::Bookmark;
use crate::db::Database;

/// Default retention window for cache entries.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub content_hash: String,
    pub tags: Vec<String>,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub used_count: u64,
}

pub trait CacheStore: Send + Sync {
    /// Atomically bump `used_count` and return the entry, if present.
    fn touch(&self, content_hash: &str) -> anyhow::Result<Option<CacheEntry>>;

    /// Read without counting a use.
    fn peek(&self, content_hash: &str) -> anyhow::Result<Option<CacheEntry>>;

    /// Insert, or overwrite tags/model_version and bump `used_count` on conflict.
    fn upsert(&self, entry: &CacheEntry) -> anyhow::Result<()>;

    /// Delete entries created strictly before `cutoff`.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize>;

    fn count(&self) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached tags for the bookmark's content. Counts a use on hit.
    pub fn get(&self, bookmark: &Bookmark) -> Option<Vec<String>> {
        let hash = content_hash(bookmark);

        match self.store.touch(&hash) {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("tag cache hit for {hash} (used {} times)", entry.used_count);
                Some(entry.tags)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                log::warn!("tag cache lookup failed, treating as miss: {err:?}");
                None
            }
        }
    }

    pub fn set(&self, bookmark: &Bookmark, tags: &[String], model_version: &str) {
        let entry = CacheEntry {
            content_hash: content_hash(bookmark),
            tags: tags.to_vec(),
            model_version: model_version.to_string(),
            created_at: Utc::now(),
            used_count: 1,
        };

        if let Err(err) = self.store.upsert(&entry) {
            log::warn!("failed to write tag cache entry {}: {err:?}", entry.content_hash);
        }
    }

    /// Remove entries older than `days_to_keep` days. Returns 0 on failure.
    pub fn cleanup(&self, days_to_keep: u32) -> usize {
        // a cutoff before the earliest representable date matches nothing
        let Some(cutoff) = Utc::now().checked_sub_signed(Duration::days(days_to_keep as i64))
        else {
            log::debug!("tag cache cleanup: {days_to_keep} days reaches past any entry");
            return 0;
        };

        match self.store.delete_older_than(cutoff) {
            Ok(count) => {
                log::info!("tag cache cleanup removed {count} entries older than {days_to_keep} days");
                count
            }
            Err(err) => {
                log::error!("tag cache cleanup failed: {err:?}");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.store.count().unwrap_or_else(|err| {
                log::warn!("failed to count tag cache entries: {err:?}");
                0
            }),
        }
    }
}

/// `ai_tag_cache` table store.
pub struct SqliteCacheStore {
    db: Arc<Database>,
}

impl SqliteCacheStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn read_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
        let tags: String = row.get(1)?;
        let tags = serde_json::from_str(&tags).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(err))
        })?;
        let created_at: i64 = row.get(3)?;

        Ok(CacheEntry {
            content_hash: row.get(0)?,
            tags,
            model_version: row.get(2)?,
            created_at: Utc
                .timestamp_opt(created_at, 0)
                .single()
                .unwrap_or_default(),
            used_count: row.get::<_, i64>(4)? as u64,
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn touch(&self, content_hash: &str) -> anyhow::Result<Option<CacheEntry>> {
        let conn = self.db.conn()?;
        let entry = conn
            .query_row(
                "UPDATE ai_tag_cache SET used_count = used_count + 1 WHERE content_hash = ?1
                 RETURNING content_hash, tags, model_version, created_at, used_count",
                params![content_hash],
                Self::read_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn peek(&self, content_hash: &str) -> anyhow::Result<Option<CacheEntry>> {
        let conn = self.db.conn()?;
        let entry = conn
            .query_row(
                "SELECT content_hash, tags, model_version, created_at, used_count
                 FROM ai_tag_cache WHERE content_hash = ?1",
                params![content_hash],
                Self::read_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn upsert(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        self.db.conn()?.execute(
            "INSERT INTO ai_tag_cache (content_hash, tags, model_version, created_at, used_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(content_hash) DO UPDATE SET
                tags = excluded.tags,
                model_version = excluded.model_version,
                used_count = ai_tag_cache.used_count + 1",
            params![
                entry.content_hash,
                serde_json::to_string(&entry.tags)?,
                entry.model_version,
                entry.created_at.timestamp(),
                entry.used_count as i64,
            ],
        )?;
        Ok(())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let deleted = self.db.conn()?.execute(
            "DELETE FROM ai_tag_cache WHERE created_at < ?1",
            params![cutoff.timestamp()],
        )?;
        Ok(deleted)
    }

    fn count(&self) -> anyhow::Result<usize> {
        let count: i64 = self
            .db
            .conn()?
            .query_row("SELECT COUNT(*) FROM ai_tag_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
