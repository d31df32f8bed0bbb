use std::sync::Arc;

use serde::Serialize;

use crate::{
    ai::{
        backend::BackendStatus,
        cache::CacheStats,
        embeddings::{EmbeddingBackend, GatewayEmbeddings, UnavailableEmbeddings},
        gateway::Description,
        search::apply_tags,
        AiError, BackendRouter, EmbeddingGateway, ResponseCache, SemanticSearchService,
        SqliteCacheStore, TaggingService,
    },
    bookmarks::{BackendSqlite, Bookmark, BookmarkManager},
    config::{AiSettings, Config, EmbeddingProvider},
    db::Database,
    purge::CachePurger,
};

#[derive(Debug, Clone, Serialize)]
pub struct TagOutcome {
    pub id: u64,
    pub tags: Vec<String>,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend: BackendStatus,
    pub embeddings: String,
    pub cache: CacheStats,
    pub cache_enabled: bool,
    pub purge_configured: bool,
}

/// Composition root: every service is built once here and shared.
pub struct App {
    pub config: Config,
    pub bookmarks: Arc<dyn BookmarkManager>,
    pub router: Arc<BackendRouter>,
    pub cache: Arc<ResponseCache>,
    pub tagging: TaggingService,
    pub search: SemanticSearchService,
    pub purger: Option<CachePurger>,
}

fn embedding_backend(
    config: &Config,
    settings: &AiSettings,
) -> anyhow::Result<Box<dyn EmbeddingBackend>> {
    match config.embeddings.provider {
        EmbeddingProvider::Gateway => {
            let url = match (&settings.gateway_url, settings.use_local_ai) {
                (Some(url), _) => url.clone(),
                (None, true) => settings.local_gateway_url.clone(),
                (None, false) => {
                    log::warn!("no AI gateway configured, embeddings are disabled");
                    return Ok(Box::new(UnavailableEmbeddings));
                }
            };

            let timeout = std::time::Duration::from_secs(config.embeddings.timeout_secs);
            Ok(Box::new(GatewayEmbeddings::new(&url, timeout)?))
        }

        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => Ok(Box::new(crate::ai::embeddings::LocalEmbeddings::new(
            &config.embeddings.local_model,
            config.base_path().to_path_buf(),
        )?)),

        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => {
            anyhow::bail!("bbai was built without the 'local-embeddings' feature")
        }
    }
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let db = Arc::new(Database::open(&config.db_path())?);
        let embeddings = embedding_backend(&config, &config.ai_settings())?;
        Self::with_parts(config, db, embeddings)
    }

    /// Build the app over an existing database and embedding backend.
    pub fn with_parts(
        config: Config,
        db: Arc<Database>,
        embeddings: Box<dyn EmbeddingBackend>,
    ) -> anyhow::Result<Self> {
        let settings = config.ai_settings();

        let bookmarks: Arc<dyn BookmarkManager> =
            Arc::new(BackendSqlite::new(db.clone(), config.embeddings.dimensions));
        let cache = Arc::new(ResponseCache::new(Arc::new(SqliteCacheStore::new(db))));
        let router = Arc::new(BackendRouter::new(&settings));

        let purger = CachePurger::new(config.purge.clone())?;

        let tagging = TaggingService::new(
            router.clone(),
            cache.clone(),
            config.tagging.cache_enabled,
        );
        let search = SemanticSearchService::new(
            EmbeddingGateway::new(embeddings, config.embeddings.batch_size),
            bookmarks.clone(),
            purger.clone(),
            config.embeddings.default_threshold,
        );

        Ok(Self {
            config,
            bookmarks,
            router,
            cache,
            tagging,
            search,
            purger,
        })
    }

    /// Replace the completion backend used for tagging.
    #[cfg(test)]
    pub fn with_completion(mut self, backend: Arc<dyn crate::ai::backend::CompletionBackend>) -> Self {
        self.tagging = TaggingService::new(
            backend,
            self.cache.clone(),
            self.config.tagging.cache_enabled,
        );
        self
    }

    pub fn bookmark(&self, id: u64) -> Result<Bookmark, AiError> {
        self.bookmarks
            .get(id)
            .map_err(|err| AiError::Unknown(format!("{err:#}")))?
            .ok_or(AiError::NotFound(id))
    }

    pub fn tag_bookmark(&self, id: u64, apply: bool, use_cache: bool) -> Result<TagOutcome, AiError> {
        let bookmark = self.bookmark(id)?;
        let tags = self.tagging.generate_tags_with(&bookmark, use_cache)?;

        if apply {
            apply_tags(
                self.bookmarks.as_ref(),
                self.purger.as_ref(),
                id,
                tags.clone(),
            )?;
        }

        Ok(TagOutcome {
            id,
            tags,
            applied: apply,
        })
    }

    pub fn describe_bookmark(&self, id: u64) -> Result<Description, AiError> {
        let bookmark = self.bookmark(id)?;
        self.router
            .describe(&bookmark.title, &bookmark.url, &bookmark.description)
    }

    pub fn cache_cleanup(&self, days: Option<u32>) -> usize {
        self.cache
            .cleanup(days.unwrap_or(self.config.tagging.retention_days))
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            backend: self.router.status(),
            embeddings: self.search.gateway().backend_name().to_string(),
            cache: self.cache.stats(),
            cache_enabled: self.config.tagging.cache_enabled,
            purge_configured: self.purger.is_some(),
        }
    }
}
