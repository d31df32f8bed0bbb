use crate::{
    ai::{
        cache::CacheStats, gateway::Description, search::ReindexResult,
        similarity::SimilarityResult, AiError,
    },
    app::{App, StatusReport},
    bookmarks::Bookmark,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

const DEFAULT_LIMIT: usize = 10;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

type SharedState = Arc<App>;

pub fn router(app: SharedState) -> Router {
    Router::new()
        .route("/api/ai/tags", post(tags))
        .route("/api/ai/describe", post(describe))
        .route("/api/ai/embed", post(embed))
        .route("/api/ai/reindex", post(reindex))
        .route("/api/ai/search", post(search))
        .route("/api/ai/similar", post(similar))
        .route("/api/ai/cache/cleanup", post(cache_cleanup))
        .route("/api/ai/cache/stats", get(cache_stats))
        .route("/api/ai/status", get(status))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(app)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(app: SharedState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Runs until Ctrl+C. The caller keeps its own handle on `app`, so the
/// blocking HTTP clients inside are dropped outside the runtime.
pub fn start_daemon(app: SharedState, addr: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app, addr))
}

#[derive(Debug)]
struct HttpError(AiError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();
        if self.0.is_transient() {
            log::warn!("upstream: {}", self.0);
        } else if status.is_server_error() {
            log::error!("{:?}", self.0);
        } else {
            log::debug!("{:?}", self.0);
        }

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl From<AiError> for HttpError {
    fn from(err: AiError) -> Self {
        Self(err)
    }
}

/// Either a stored bookmark (`id`) or ad-hoc content.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagsRequest {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,

    /// Store the tags on the bookmark. Needs `id`.
    #[serde(default)]
    pub apply: bool,

    #[serde(default)]
    pub no_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsResponse {
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub applied: bool,
}

async fn tags(
    State(app): State<SharedState>,
    Json(payload): Json<TagsRequest>,
) -> Result<Json<TagsResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let use_cache = !payload.no_cache;

        if let Some(id) = payload.id {
            let outcome = app.tag_bookmark(id, payload.apply, use_cache)?;
            return Ok(Json(TagsResponse {
                tags: outcome.tags,
                id: Some(id),
                applied: outcome.applied,
            }));
        }

        if payload.apply {
            return Err(AiError::InvalidInput("apply requires a bookmark id".into()).into());
        }

        let bookmark = Bookmark::draft(
            payload.title.as_deref().unwrap_or_default(),
            payload.url.as_deref().unwrap_or_default(),
            payload.description.as_deref().unwrap_or_default(),
        );
        let tags = app.tagging.generate_tags_with(&bookmark, use_cache)?;

        Ok(Json(TagsResponse {
            tags,
            id: None,
            applied: false,
        }))
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub existing_description: Option<String>,
}

async fn describe(
    State(app): State<SharedState>,
    Json(payload): Json<DescribeRequest>,
) -> Result<Json<Description>, HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        let description = match payload.id {
            Some(id) => app.describe_bookmark(id)?,
            None => app.router.describe(
                payload.title.as_deref().unwrap_or_default(),
                payload.url.as_deref().unwrap_or_default(),
                payload.existing_description.as_deref().unwrap_or_default(),
            )?,
        };
        Ok(Json(description))
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedRequest {
    /// Embed and store this bookmark.
    pub id: Option<u64>,
    /// Embed free text without storing anything.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

async fn embed(
    State(app): State<SharedState>,
    Json(payload): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || match (payload.id, payload.text) {
        (Some(id), _) => {
            let embedding = app.search.embed_bookmark(id)?;
            Ok(Json(EmbedResponse {
                id: Some(id),
                dimensions: embedding.len(),
                embedding: None,
            }))
        }
        (None, Some(text)) => {
            let embedding = app.search.gateway().embed(&text)?;
            Ok(Json(EmbedResponse {
                id: None,
                dimensions: embedding.len(),
                embedding: Some(embedding),
            }))
        }
        (None, None) => Err(AiError::InvalidInput("either id or text is required".into()).into()),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReindexRequest {
    /// Re-embed every bookmark, not only those missing a vector.
    #[serde(default)]
    pub all: bool,
}

async fn reindex(
    State(app): State<SharedState>,
    Json(payload): Json<ReindexRequest>,
) -> Result<Json<ReindexResult>, HttpError> {
    tokio::task::block_in_place(move || Ok(Json(app.search.reindex(!payload.all)?)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub threshold: Option<f64>,
}

async fn search(
    State(app): State<SharedState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<SimilarityResult>>, HttpError> {
    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        Ok(Json(app.search.search(
            &payload.query,
            payload.limit,
            payload.threshold,
        )?))
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimilarRequest {
    pub id: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

async fn similar(
    State(app): State<SharedState>,
    Json(payload): Json<SimilarRequest>,
) -> Result<Json<Vec<SimilarityResult>>, HttpError> {
    tokio::task::block_in_place(move || Ok(Json(app.search.similar(payload.id, payload.limit)?)))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupRequest {
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

async fn cache_cleanup(
    State(app): State<SharedState>,
    Json(payload): Json<CleanupRequest>,
) -> Json<CleanupResponse> {
    tokio::task::block_in_place(move || {
        Json(CleanupResponse {
            removed: app.cache_cleanup(payload.days),
        })
    })
}

async fn cache_stats(State(app): State<SharedState>) -> Json<CacheStats> {
    tokio::task::block_in_place(move || Json(app.cache.stats()))
}

async fn status(State(app): State<SharedState>) -> Json<StatusReport> {
    tokio::task::block_in_place(move || Json(app.status()))
}
