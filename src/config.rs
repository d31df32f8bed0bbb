use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::ai::cache::DEFAULT_RETENTION_DAYS;
use crate::ai::embeddings::DEFAULT_BATCH_SIZE;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LOCAL_GATEWAY_URL: &str = "http://127.0.0.1:8787";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
/// Generation requests are aborted after this many seconds
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 180;
const DEFAULT_MAX_TOKENS: u32 = 100;

/// bge-base and the gateway model both produce 768-d vectors
const DEFAULT_DIMENSIONS: usize = 768;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 60;
const DEFAULT_THRESHOLD: f64 = 0.3;
const DEFAULT_LOCAL_MODEL: &str = "bge-base-en-v1.5";

const DEFAULT_REDIS_KEY: &str = "bookmarks:all";
const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 10;

/// Backend selection and generation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiConfig {
    /// Externally reachable AI gateway. Takes priority over everything else.
    #[serde(default)]
    pub gateway_url: Option<String>,

    /// Use a gateway running on this machine
    #[serde(default)]
    pub use_local_ai: bool,

    #[serde(default = "default_local_gateway_url")]
    pub local_gateway_url: String,

    /// Direct provider key, used when no gateway is configured
    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            use_local_ai: false,
            local_gateway_url: default_local_gateway_url(),
            anthropic_api_key: None,
            provider_url: default_provider_url(),
            model: default_model(),
            generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaggingConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Cache entries older than this are removed by `cache cleanup`
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Gateway,
    /// In-process fastembed model, needs the `local-embeddings` feature
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Default similarity threshold [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    #[serde(default = "default_local_model")]
    pub local_model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Gateway,
            dimensions: DEFAULT_DIMENSIONS,
            timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            default_threshold: DEFAULT_THRESHOLD,
            local_model: default_local_model(),
        }
    }
}

/// Targets invalidated after tag or embedding changes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    #[serde(default)]
    pub deployment_urls: Vec<String>,

    #[serde(default)]
    pub purge_token: Option<String>,

    #[serde(default)]
    pub redis_rest_url: Option<String>,

    #[serde(default)]
    pub redis_rest_token: Option<String>,

    #[serde(default = "default_redis_key")]
    pub redis_key: String,

    #[serde(default = "default_purge_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            deployment_urls: vec![],
            purge_token: None,
            redis_rest_url: None,
            redis_rest_token: None,
            redis_key: default_redis_key(),
            timeout_secs: DEFAULT_PURGE_TIMEOUT_SECS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_local_gateway_url() -> String {
    DEFAULT_LOCAL_GATEWAY_URL.to_string()
}

fn default_provider_url() -> String {
    crate::ai::direct::DEFAULT_PROVIDER_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_generation_timeout_secs() -> u64 {
    DEFAULT_GENERATION_TIMEOUT_SECS
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_local_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_redis_key() -> String {
    DEFAULT_REDIS_KEY.to_string()
}

fn default_purge_timeout_secs() -> u64 {
    DEFAULT_PURGE_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub purge: PurgeConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

/// Snapshot of everything backend selection depends on.
#[derive(Clone, Debug)]
pub struct AiSettings {
    pub gateway_url: Option<String>,
    pub use_local_ai: bool,
    pub local_gateway_url: String,
    pub anthropic_api_key: Option<String>,
    pub provider_url: String,
    pub model: String,
    pub generation_timeout: Duration,
    pub max_tokens: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Config::default().ai_settings()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ai.generation_timeout_secs == 0 {
            bail!("ai.generation_timeout_secs must be greater than 0");
        }

        if self.ai.max_tokens == 0 {
            bail!("ai.max_tokens must be greater than 0");
        }

        let emb = &self.embeddings;
        if !(0.0..=1.0).contains(&emb.default_threshold) {
            bail!(
                "embeddings.default_threshold must be between 0.0 and 1.0, got {}",
                emb.default_threshold
            );
        }

        if emb.dimensions == 0 {
            bail!("embeddings.dimensions must be greater than 0");
        }

        if emb.timeout_secs == 0 {
            bail!("embeddings.timeout_secs must be greater than 0");
        }

        if emb.batch_size == 0 {
            bail!("embeddings.batch_size must be greater than 0");
        }

        if emb.provider == EmbeddingProvider::Local && !cfg!(feature = "local-embeddings") {
            bail!("embeddings.provider is 'local' but bbai was built without the 'local-embeddings' feature");
        }

        Ok(())
    }

    /// Overlay environment variables. `get` is `std::env::var` outside tests.
    pub fn apply_env_with<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = non_empty(get("AI_GATEWAY_URL")) {
            self.ai.gateway_url = Some(url);
        }
        if let Some(flag) = get("USE_LOCAL_AI") {
            self.ai.use_local_ai = is_truthy(&flag);
        }
        if let Some(url) = non_empty(get("LOCAL_AI_URL")) {
            self.ai.local_gateway_url = url;
        }
        if let Some(key) = non_empty(get("ANTHROPIC_API_KEY")) {
            self.ai.anthropic_api_key = Some(key);
        }
        if let Some(model) = non_empty(get("AI_MODEL")) {
            self.ai.model = model;
        }
        if let Some(urls) = non_empty(get("DEPLOYMENT_URLS")) {
            self.purge.deployment_urls = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Some(token) = non_empty(get("CACHE_PURGE_TOKEN")) {
            self.purge.purge_token = Some(token);
        }
        if let Some(url) = non_empty(get("REDIS_REST_URL")) {
            self.purge.redis_rest_url = Some(url);
        }
        if let Some(token) = non_empty(get("REDIS_REST_TOKEN")) {
            self.purge.redis_rest_token = Some(token);
        }
    }

    pub fn ai_settings(&self) -> AiSettings {
        AiSettings {
            gateway_url: non_empty(self.ai.gateway_url.clone()),
            use_local_ai: self.ai.use_local_ai,
            local_gateway_url: self.ai.local_gateway_url.clone(),
            anthropic_api_key: non_empty(self.ai.anthropic_api_key.clone()),
            provider_url: self.ai.provider_url.clone(),
            model: self.ai.model.clone(),
            generation_timeout: Duration::from_secs(self.ai.generation_timeout_secs),
            max_tokens: self.ai.max_tokens,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_path().join("bbai.db")
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if missing.
    ///
    /// Environment overrides are applied after the file is (re)saved, so
    /// secrets from the environment never end up on disk.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        Self::load_with_env(base_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(base_path: &Path, get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let path = base_path.join(CONFIG_FILE);
        if !path.exists() {
            log::info!("creating default config at {}", path.display());
            write_atomic(&path, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config at {} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.apply_env_with(get);
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, data)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// `BBAI_BASE_PATH`, or `~/.local/share/bbai`.
pub fn default_base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("BBAI_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .context("couldn't find home dir")?;
    Ok(home.join(".local/share/bbai"))
}
