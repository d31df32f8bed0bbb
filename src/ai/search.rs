//! Semantic search over stored bookmark embeddings.
//!
//! Ties the embedding gateway, the bookmark store and the similarity engine
//! together. Vectors are kept in the bookmark store, one per bookmark.

use std::sync::Arc;

use serde::Serialize;

use crate::ai::embeddings::{bookmark_text, EmbeddingGateway};
use crate::ai::errors::AiError;
use crate::ai::similarity::{self, SimilarityResult};
use crate::bookmarks::{Bookmark, BookmarkManager};
use crate::purge::CachePurger;

/// Outcome of a bulk (re)embedding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexResult {
    pub embedded: usize,
    /// Bookmarks without any embeddable text.
    pub skipped: usize,
}

pub struct SemanticSearchService {
    gateway: EmbeddingGateway,
    bookmarks: Arc<dyn BookmarkManager>,
    purger: Option<CachePurger>,
    default_threshold: f64,
}

fn store_error(err: anyhow::Error) -> AiError {
    log::error!("bookmark store error: {err:?}");
    AiError::Unknown(format!("{err:#}"))
}

impl SemanticSearchService {
    pub fn new(
        gateway: EmbeddingGateway,
        bookmarks: Arc<dyn BookmarkManager>,
        purger: Option<CachePurger>,
        default_threshold: f64,
    ) -> Self {
        Self {
            gateway,
            bookmarks,
            purger,
            default_threshold,
        }
    }

    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    /// Bookmarks semantically close to `query`, best first.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<SimilarityResult>, AiError> {
        let threshold = threshold.unwrap_or(self.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AiError::InvalidInput(format!(
                "threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }

        let query_vector = self.gateway.embed(query)?;
        let candidates = self.bookmarks.list_embedded().map_err(store_error)?;

        let results = similarity::rank(&query_vector, &candidates, limit, threshold);
        log::debug!(
            "search {query:?}: {} of {} candidates above {threshold}",
            results.len(),
            candidates.len()
        );
        Ok(results)
    }

    /// Bookmarks closest to bookmark `id`.
    pub fn similar(&self, id: u64, limit: usize) -> Result<Vec<SimilarityResult>, AiError> {
        if self.bookmarks.get(id).map_err(store_error)?.is_none() {
            return Err(AiError::NotFound(id));
        }

        let candidates = self.bookmarks.list_embedded().map_err(store_error)?;
        similarity::find_similar_to(id, &candidates, limit)
    }

    /// Embed a stored bookmark, persist the vector and purge downstream caches.
    pub fn embed_bookmark(&self, id: u64) -> Result<Vec<f64>, AiError> {
        let bookmark = self
            .bookmarks
            .get(id)
            .map_err(store_error)?
            .ok_or(AiError::NotFound(id))?;

        let embedding = self.gateway.embed_bookmark(&bookmark)?;
        self.bookmarks
            .set_embedding(id, &embedding)
            .map_err(store_error)?;
        log::info!("stored {}-d embedding for bookmark {id}", embedding.len());

        self.purge(&format!("embedding updated for bookmark {id}"));
        Ok(embedding)
    }

    /// Embed every bookmark, or only those without a vector when
    /// `missing_only`. Progress made before a failure is kept.
    pub fn reindex(&self, missing_only: bool) -> Result<ReindexResult, AiError> {
        let bookmarks = self.bookmarks.list().map_err(store_error)?;

        let mut result = ReindexResult::default();
        let mut pending: Vec<(u64, String)> = vec![];

        for bookmark in bookmarks
            .iter()
            .filter(|b| !missing_only || b.embedding.is_none())
        {
            match bookmark_text(bookmark) {
                Some(text) => pending.push((bookmark.id, text)),
                None => result.skipped += 1,
            }
        }

        log::info!(
            "embedding {} bookmarks via {}",
            pending.len(),
            self.gateway.backend_name()
        );

        let outcome = self.embed_pending(&pending, &mut result);

        if result.embedded > 0 {
            self.purge(&format!("{} embeddings updated", result.embedded));
        }

        outcome.map(|_| result)
    }

    fn embed_pending(
        &self,
        pending: &[(u64, String)],
        result: &mut ReindexResult,
    ) -> Result<(), AiError> {
        for chunk in pending.chunks(self.gateway.batch_size()) {
            let texts = chunk.iter().map(|(_, text)| text.clone()).collect::<Vec<_>>();
            let vectors = self.gateway.embed_batch(&texts)?;

            for ((id, _), vector) in chunk.iter().zip(vectors) {
                self.bookmarks
                    .set_embedding(*id, &vector)
                    .map_err(store_error)?;
                result.embedded += 1;
            }
        }

        Ok(())
    }

    fn purge(&self, reason: &str) {
        if let Some(purger) = &self.purger {
            purger.trigger(reason);
        }
    }
}

/// Store tags on a bookmark and purge downstream caches.
pub fn apply_tags(
    bookmarks: &dyn BookmarkManager,
    purger: Option<&CachePurger>,
    id: u64,
    tags: Vec<String>,
) -> Result<Bookmark, AiError> {
    if bookmarks.get(id).map_err(store_error)?.is_none() {
        return Err(AiError::NotFound(id));
    }

    let bookmark = bookmarks.set_tags(id, tags).map_err(store_error)?;
    if let Some(purger) = purger {
        purger.trigger(&format!("tags updated for bookmark {id}"));
    }

    Ok(bookmark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::embeddings::EmbeddingBackend;
    use crate::bookmarks::{BackendSqlite, BookmarkCreate};
    use crate::db::Database;

    const DIMS: usize = 3;

    /// Maps text to a fixed vector by keyword, so similarity is predictable.
    struct KeywordBackend;

    impl EmbeddingBackend for KeywordBackend {
        fn name(&self) -> &str {
            "keyword"
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("rust") { 1.0 } else { 0.0 },
                        if t.contains("cook") { 1.0 } else { 0.0 },
                        0.1,
                    ]
                })
                .collect())
        }
    }

    fn create_service() -> (SemanticSearchService, Arc<BackendSqlite>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(BackendSqlite::new(db, DIMS));
        let service = SemanticSearchService::new(
            EmbeddingGateway::new(Box::new(KeywordBackend), 2),
            store.clone(),
            None,
            0.5,
        );
        (service, store)
    }

    fn add(store: &BackendSqlite, title: &str, url: &str) -> u64 {
        store
            .create(BookmarkCreate {
                title: Some(title.to_string()),
                url: url.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_reindex_then_search() {
        let (service, store) = create_service();
        let rust = add(&store, "Rust book", "https://doc.rust-lang.org");
        let cooking = add(&store, "Cooking basics", "https://food.example.com");
        let _ = add(&store, "Rust by example", "https://doc.rust-lang.org/rust-by-example");

        let result = service.reindex(false).unwrap();
        assert_eq!(result.embedded, 3);
        assert_eq!(result.skipped, 0);

        let found = service.search("rust", 10, None).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, rust);
        assert!(found.iter().all(|r| r.id != cooking));
    }

    #[test]
    fn test_reindex_missing_only() {
        let (service, store) = create_service();
        let first = add(&store, "Rust", "https://rust-lang.org");
        service.embed_bookmark(first).unwrap();
        add(&store, "Cooking", "https://food.example.com");

        let result = service.reindex(true).unwrap();
        assert_eq!(result.embedded, 1);
    }

    #[test]
    fn test_similar() {
        let (service, store) = create_service();
        let a = add(&store, "Rust book", "https://a.example.com");
        let b = add(&store, "Cooking", "https://b.example.com");
        let c = add(&store, "Rust async", "https://c.example.com");
        service.reindex(false).unwrap();

        let results = service.similar(a, 10).unwrap();
        let ids = results.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![c, b]);

        assert!(matches!(service.similar(999, 10), Err(AiError::NotFound(999))));
    }

    #[test]
    fn test_similar_without_embedding() {
        let (service, store) = create_service();
        let id = add(&store, "Rust", "https://rust-lang.org");
        assert!(matches!(
            service.similar(id, 10),
            Err(AiError::NoEmbedding(_))
        ));
    }

    #[test]
    fn test_search_validates_threshold_and_query() {
        let (service, _) = create_service();
        assert!(matches!(
            service.search("rust", 10, Some(1.5)),
            Err(AiError::InvalidInput(_))
        ));
        assert!(matches!(
            service.search("   ", 10, None),
            Err(AiError::EmptyInput)
        ));
    }

    #[test]
    fn test_embed_missing_bookmark() {
        let (service, _) = create_service();
        assert!(matches!(
            service.embed_bookmark(7),
            Err(AiError::NotFound(7))
        ));
    }

    #[test]
    fn test_apply_tags() {
        let (_, store) = create_service();
        let id = add(&store, "Rust", "https://rust-lang.org");

        let updated = apply_tags(store.as_ref(), None, id, vec!["rust".into()]).unwrap();
        assert_eq!(updated.tags, vec!["rust"]);
        assert!(matches!(
            apply_tags(store.as_ref(), None, 99, vec![]),
            Err(AiError::NotFound(99))
        ));
    }
}
