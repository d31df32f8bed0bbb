use std::sync::Arc;

use crate::ai::backend::{CompletionBackend, PromptContext};
use crate::ai::cache::ResponseCache;
use crate::ai::errors::AiError;
use crate::bookmarks::Bookmark;

pub const MAX_TAGS: usize = 5;
pub const MAX_TAG_LEN: usize = 30;

const NO_DESCRIPTION: &str = "No description provided";

pub const TAGGING_PROMPT: &str = "Suggest up to 5 short tags for this bookmark.
Title: {title}
URL: {url}
Description: {description}

Tags should be lowercase, one or two words each, using only letters, digits, spaces and hyphens.
Respond with a comma separated list of tags and nothing else.";

fn is_tag_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' ' || c == '-'
}

/// Turn a raw comma separated completion into clean tags.
///
/// Candidates are trimmed and lowercased. Empty ones, ones longer than
/// [`MAX_TAG_LEN`] and ones with characters outside `[a-z0-9 -]` are dropped.
/// Whitespace runs become a single hyphen. First occurrence wins, at most
/// [`MAX_TAGS`] are kept.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    for candidate in raw.split(',') {
        let candidate = candidate.trim().to_lowercase();

        if candidate.is_empty()
            || candidate.chars().count() > MAX_TAG_LEN
            || !candidate.chars().all(is_tag_char)
        {
            continue;
        }

        let tag = candidate.split_whitespace().collect::<Vec<_>>().join("-");
        if !tags.contains(&tag) {
            tags.push(tag);
        }

        if tags.len() == MAX_TAGS {
            break;
        }
    }

    tags
}

/// Cache-aside tag generation.
pub struct TaggingService {
    backend: Arc<dyn CompletionBackend>,
    cache: Arc<ResponseCache>,
    cache_enabled: bool,
}

impl TaggingService {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        cache: Arc<ResponseCache>,
        cache_enabled: bool,
    ) -> Self {
        Self {
            backend,
            cache,
            cache_enabled,
        }
    }

    pub fn generate_tags(&self, bookmark: &Bookmark) -> Result<Vec<String>, AiError> {
        self.generate_tags_with(bookmark, self.cache_enabled)
    }

    /// Same as [`generate_tags`](Self::generate_tags) with caching chosen per
    /// call. `use_cache = false` skips both the lookup and the write. It can
    /// only narrow the service setting: a disabled cache stays disabled.
    pub fn generate_tags_with(
        &self,
        bookmark: &Bookmark,
        use_cache: bool,
    ) -> Result<Vec<String>, AiError> {
        if bookmark.title.trim().is_empty() {
            return Err(AiError::InvalidInput("bookmark title is required".into()));
        }
        if bookmark.url.trim().is_empty() {
            return Err(AiError::InvalidInput("bookmark url is required".into()));
        }

        let use_cache = use_cache && self.cache_enabled;

        if use_cache {
            if let Some(tags) = self.cache.get(bookmark) {
                return Ok(tags);
            }
        }

        let description = if bookmark.description.trim().is_empty() {
            NO_DESCRIPTION
        } else {
            bookmark.description.as_str()
        };
        let context = PromptContext::from([
            ("title".to_string(), bookmark.title.clone()),
            ("url".to_string(), bookmark.url.clone()),
            ("description".to_string(), description.to_string()),
        ]);

        let raw = self.backend.generate_completion(TAGGING_PROMPT, &context)?;
        let tags = parse_tags(&raw);
        log::debug!("generated tags for {}: {tags:?}", bookmark.url);

        if use_cache {
            self.cache.set(bookmark, &tags, &self.backend.model_version());
        }

        Ok(tags)
    }
}
