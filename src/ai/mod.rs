//! AI-assisted tagging and semantic search.
//!
//! # Architecture
//!
//! - `hasher`: content hash used as the tag cache key
//! - `cache`: tag response cache with hit counting and retention cleanup
//! - `similarity`: cosine similarity and top-K ranking
//! - `embeddings`: text to vector gateway (remote gateway or local model)
//! - `backend`: backend selection and prompt completion routing
//! - `gateway` / `direct`: HTTP clients for the AI gateway and the provider API
//! - `tagging`: cache-aside tag generation
//! - `search`: semantic search over stored embeddings

pub mod backend;
pub mod cache;
pub mod direct;
pub mod embeddings;
pub mod errors;
pub mod gateway;
pub mod hasher;
pub mod search;
pub mod similarity;
pub mod tagging;

pub use backend::BackendRouter;
pub use cache::{ResponseCache, SqliteCacheStore};
pub use embeddings::EmbeddingGateway;
pub use errors::AiError;
pub use search::SemanticSearchService;
pub use tagging::TaggingService;
