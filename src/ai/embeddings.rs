//! Text to vector embeddings.
//!
//! `EmbeddingGateway` owns input policy (truncation, empty checks, batching,
//! bookmark text assembly) and delegates transport to an `EmbeddingBackend`:
//! - `GatewayEmbeddings`: `POST /api/ai/embed` on the AI gateway
//! - `LocalEmbeddings`: in-process fastembed model, behind the
//!   `local-embeddings` feature

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::ai::errors::AiError;
use crate::bookmarks::Bookmark;

/// Inputs longer than this many characters are cut before sending.
pub const MAX_INPUT_CHARS: usize = 8000;

/// Default number of texts per gateway request.
pub const DEFAULT_BATCH_SIZE: usize = 32;

pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// One vector per input, in input order.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError>;
}

pub struct EmbeddingGateway {
    backend: Box<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(backend: Box<dyn EmbeddingBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f64>, AiError> {
        let input = prepare_input(text)?;
        let mut vectors = self.backend.embed_texts(&[input])?;
        validate_vectors(&vectors, 1)?;
        Ok(vectors.remove(0))
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
        let inputs = texts
            .iter()
            .map(|text| prepare_input(text))
            .collect::<Result<Vec<_>, _>>()?;

        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            let batch = self.backend.embed_texts(chunk)?;
            validate_vectors(&batch, chunk.len())?;
            vectors.extend(batch);
        }

        log::debug!(
            "embedded {} texts in {} requests",
            vectors.len(),
            inputs.len().div_ceil(self.batch_size)
        );
        Ok(vectors)
    }

    pub fn embed_bookmark(&self, bookmark: &Bookmark) -> Result<Vec<f64>, AiError> {
        let text = bookmark_text(bookmark).ok_or(AiError::NoContent)?;
        self.embed(&text)
    }
}

/// Text used to embed a bookmark: title, bare hostname and description.
///
/// Returns `None` when nothing is left after trimming.
pub fn bookmark_text(bookmark: &Bookmark) -> Option<String> {
    let mut parts = Vec::with_capacity(3);

    if !bookmark.title.trim().is_empty() {
        parts.push(bookmark.title.trim().to_string());
    }

    if !bookmark.url.trim().is_empty() {
        match url::Url::parse(bookmark.url.trim()) {
            Ok(parsed) => {
                if let Some(host) = parsed.host_str() {
                    parts.push(host.strip_prefix("www.").unwrap_or(host).to_string());
                }
            }
            Err(err) => log::debug!("skipping unparseable url {:?}: {err}", bookmark.url),
        }
    }

    if !bookmark.description.trim().is_empty() {
        parts.push(bookmark.description.trim().to_string());
    }

    let text = parts.join(" ").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn prepare_input(text: &str) -> Result<String, AiError> {
    if text.trim().is_empty() {
        return Err(AiError::EmptyInput);
    }

    Ok(truncate_chars(text, MAX_INPUT_CHARS))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

fn validate_vectors(vectors: &[Vec<f64>], expected: usize) -> Result<(), AiError> {
    if vectors.len() != expected {
        return Err(AiError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }

    if vectors.iter().any(|v| v.is_empty()) {
        return Err(AiError::InvalidResponse("empty embedding".to_string()));
    }

    Ok(())
}

/// Stands in when no embedding provider is configured.
pub struct UnavailableEmbeddings;

impl EmbeddingBackend for UnavailableEmbeddings {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn embed_texts(&self, _: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
        Err(AiError::NotAvailable)
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    success: Option<bool>,
    embedding: Option<Vec<f64>>,
    embeddings: Option<Vec<Vec<f64>>>,
    error: Option<String>,
}

/// Embeddings served by the AI gateway.
pub struct GatewayEmbeddings {
    endpoint: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl GatewayEmbeddings {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AiError::NotInitialized(err.to_string()))?;

        Ok(Self {
            endpoint: format!("{}/api/ai/embed", base_url.trim_end_matches('/')),
            client,
            timeout,
        })
    }
}

impl EmbeddingBackend for GatewayEmbeddings {
    fn name(&self) -> &str {
        "gateway"
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
        let single = texts.len() == 1;
        let body = if single {
            json!({ "text": texts[0] })
        } else {
            json!({ "texts": texts })
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| AiError::from_transport(err, self.timeout))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|err| AiError::from_transport(err, self.timeout))?;

        if !status.is_success() {
            log::warn!("embedding gateway returned {status}: {text}");
            return Err(AiError::GatewayUnavailable {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        let parsed = serde_json::from_str::<EmbedResponse>(&text).map_err(|err| {
            log::error!("{err}. tried to parse: {text:?}");
            AiError::InvalidResponse(err.to_string())
        })?;

        if parsed.success == Some(false) {
            return Err(AiError::GatewayUnavailable {
                status: Some(status.as_u16()),
                body: parsed.error.unwrap_or_default(),
            });
        }

        let vectors = if single {
            parsed.embedding.map(|v| vec![v]).or(parsed.embeddings)
        } else {
            parsed.embeddings
        };

        vectors.ok_or_else(|| AiError::InvalidResponse("response has no embeddings".to_string()))
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddings;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use fastembed::{InitOptions, TextEmbedding};

    use super::EmbeddingBackend;
    use crate::ai::errors::AiError;

    /// fastembed model kept in process. `embed()` needs `&mut`, hence the Mutex.
    pub struct LocalEmbeddings {
        model: Mutex<TextEmbedding>,
        model_name: String,
    }

    impl LocalEmbeddings {
        /// Models are cached under `cache_dir/models` and downloaded on first use.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, AiError> {
            let model_enum = parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                AiError::NotInitialized(format!("failed to create models directory: {e}"))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);

            let model = TextEmbedding::try_new(options)
                .map_err(|e| AiError::NotInitialized(e.to_string()))?;

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
            })
        }
    }

    impl EmbeddingBackend for LocalEmbeddings {
        fn name(&self) -> &str {
            &self.model_name
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
            let mut model = self
                .model
                .lock()
                .map_err(|e| AiError::Unknown(format!("failed to acquire model lock: {e}")))?;

            let embeddings = model
                .embed(texts.to_vec(), None)
                .map_err(|e| AiError::Unknown(e.to_string()))?;

            Ok(embeddings
                .into_iter()
                .map(|v| v.into_iter().map(f64::from).collect())
                .collect())
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, AiError> {
        match name.to_lowercase().as_str() {
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            _ => Err(AiError::NotInitialized(format!(
                "unknown local embedding model: {name}"
            ))),
        }
    }

}
