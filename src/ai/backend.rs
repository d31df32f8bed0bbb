//! Backend selection and the uniform completion interface.
//!
//! The backend is resolved once, from an [`AiSettings`] snapshot, when the
//! router is constructed. Later changes to configuration or environment do not
//! affect a running router.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::ai::direct::DirectClient;
use crate::ai::errors::AiError;
use crate::ai::gateway::{Description, GatewayClient};
use crate::config::AiSettings;

pub type PromptContext = HashMap<String, String>;

const DESCRIBE_PROMPT: &str = "Write a concise one or two sentence description of this bookmark.
Title: {title}
URL: {url}
Current description: {existing}

Respond with the description only.";

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Substitute `{name}` placeholders from `context`. Unknown names become "".
pub fn fill_template(template: &str, context: &PromptContext) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            context.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendMode {
    Gateway,
    LocalGateway,
    Direct,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendMode::Gateway => "gateway",
            BackendMode::LocalGateway => "local-gateway",
            BackendMode::Direct => "direct",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    Gateway { url: String },
    LocalGateway { url: String },
    Direct { api_key: String, model: String },
}

impl BackendConfig {
    /// Pick a backend by priority: gateway, local gateway, direct provider.
    pub fn resolve(settings: &AiSettings) -> Option<Self> {
        if let Some(url) = &settings.gateway_url {
            return Some(BackendConfig::Gateway { url: url.clone() });
        }

        if settings.use_local_ai {
            return Some(BackendConfig::LocalGateway {
                url: settings.local_gateway_url.clone(),
            });
        }

        settings
            .anthropic_api_key
            .as_ref()
            .map(|api_key| BackendConfig::Direct {
                api_key: api_key.clone(),
                model: settings.model.clone(),
            })
    }

    pub fn mode(&self) -> BackendMode {
        match self {
            BackendConfig::Gateway { .. } => BackendMode::Gateway,
            BackendConfig::LocalGateway { .. } => BackendMode::LocalGateway,
            BackendConfig::Direct { .. } => BackendMode::Direct,
        }
    }
}

pub trait CompletionBackend: Send + Sync {
    fn is_available(&self) -> bool;

    /// Recorded alongside cached responses.
    fn model_version(&self) -> String;

    fn generate_completion(
        &self,
        template: &str,
        context: &PromptContext,
    ) -> Result<String, AiError>;
}

enum Client {
    Gateway(GatewayClient),
    Direct(DirectClient),
}

enum ClientState {
    Unavailable,
    Failed(String),
    Ready(Client),
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub available: bool,
    pub mode: Option<BackendMode>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct BackendRouter {
    config: Option<BackendConfig>,
    state: ClientState,
    model: String,
    max_tokens: u32,
}

impl BackendRouter {
    pub fn new(settings: &AiSettings) -> Self {
        let config = BackendConfig::resolve(settings);

        let state = match &config {
            None => {
                log::warn!("no AI backend configured, AI features are disabled");
                ClientState::Unavailable
            }
            Some(config) => match Self::build_client(config, settings) {
                Ok(client) => {
                    log::info!("AI backend: {}", config.mode());
                    ClientState::Ready(client)
                }
                Err(err) => {
                    log::error!("failed to initialize {} AI backend: {err}", config.mode());
                    ClientState::Failed(err.to_string())
                }
            },
        };

        Self {
            config,
            state,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    fn build_client(config: &BackendConfig, settings: &AiSettings) -> Result<Client, AiError> {
        let timeout = settings.generation_timeout;
        Ok(match config {
            BackendConfig::Gateway { url } | BackendConfig::LocalGateway { url } => {
                Client::Gateway(GatewayClient::new(url, timeout)?)
            }
            BackendConfig::Direct { api_key, model } => Client::Direct(DirectClient::new(
                api_key,
                model,
                &settings.provider_url,
                timeout,
            )?),
        })
    }

    pub fn mode(&self) -> Option<BackendMode> {
        self.config.as_ref().map(BackendConfig::mode)
    }

    fn client(&self) -> Result<&Client, AiError> {
        match &self.state {
            ClientState::Ready(client) => Ok(client),
            ClientState::Failed(msg) => Err(AiError::NotInitialized(msg.clone())),
            ClientState::Unavailable => Err(AiError::NotAvailable),
        }
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            available: self.is_available(),
            mode: self.mode(),
            model: self.model.clone(),
            error: match &self.state {
                ClientState::Failed(msg) => Some(msg.clone()),
                _ => None,
            },
        }
    }

    pub fn describe(
        &self,
        title: &str,
        url: &str,
        existing_description: &str,
    ) -> Result<Description, AiError> {
        if title.trim().is_empty() || url.trim().is_empty() {
            return Err(AiError::InvalidInput("title and url are required".into()));
        }

        match self.client()? {
            Client::Gateway(gateway) => gateway.describe(title, url, existing_description),
            Client::Direct(direct) => {
                let context = PromptContext::from([
                    ("title".to_string(), title.to_string()),
                    ("url".to_string(), url.to_string()),
                    ("existing".to_string(), existing_description.to_string()),
                ]);
                let prompt = fill_template(DESCRIBE_PROMPT, &context);
                let description = direct.complete(&prompt, self.max_tokens)?;

                Ok(Description {
                    description: description.trim().to_string(),
                    model: direct.model().to_string(),
                    backend: BackendMode::Direct.to_string(),
                })
            }
        }
    }
}

impl CompletionBackend for BackendRouter {
    fn is_available(&self) -> bool {
        matches!(self.state, ClientState::Ready(_))
    }

    fn model_version(&self) -> String {
        match self.mode() {
            Some(mode) => format!("{mode}/{}", self.model),
            None => self.model.clone(),
        }
    }

    fn generate_completion(
        &self,
        template: &str,
        context: &PromptContext,
    ) -> Result<String, AiError> {
        let client = self.client()?;

        match client {
            Client::Gateway(gateway) => match (context.get("title"), context.get("url")) {
                (Some(title), Some(url)) => {
                    let description = context
                        .get("description")
                        .map(String::as_str)
                        .unwrap_or_default();
                    Ok(gateway.tags(title, url, description)?.join(", "))
                }
                _ => gateway.generate(&fill_template(template, context), self.max_tokens),
            },
            Client::Direct(direct) => {
                direct.complete(&fill_template(template, context), self.max_tokens)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AiSettings {
        AiSettings {
            gateway_url: None,
            use_local_ai: false,
            anthropic_api_key: None,
            ..Default::default()
        }
    }

    fn context(pairs: &[(&str, &str)]) -> PromptContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_priority() {
        let mut s = settings();
        assert_eq!(BackendConfig::resolve(&s), None);

        s.anthropic_api_key = Some("sk-test".into());
        assert_eq!(
            BackendConfig::resolve(&s).map(|c| c.mode()),
            Some(BackendMode::Direct)
        );

        s.use_local_ai = true;
        assert_eq!(
            BackendConfig::resolve(&s),
            Some(BackendConfig::LocalGateway {
                url: s.local_gateway_url.clone()
            })
        );

        s.gateway_url = Some("https://ai.example.com".into());
        assert_eq!(
            BackendConfig::resolve(&s),
            Some(BackendConfig::Gateway {
                url: "https://ai.example.com".into()
            })
        );
    }

    #[test]
    fn test_mode_is_fixed_at_construction() {
        let mut s = settings();
        s.gateway_url = Some("http://127.0.0.1:9".into());
        let router = BackendRouter::new(&s);
        assert_eq!(router.mode(), Some(BackendMode::Gateway));

        // a direct credential showing up later changes nothing
        s.gateway_url = None;
        s.anthropic_api_key = Some("sk-late".into());
        assert_eq!(router.mode(), Some(BackendMode::Gateway));
        assert!(router.is_available());
        assert!(router.model_version().starts_with("gateway/"));
    }

    #[test]
    fn test_unavailable_router() {
        let router = BackendRouter::new(&settings());
        assert!(!router.is_available());
        assert_eq!(router.mode(), None);
        assert!(matches!(
            router.generate_completion("{title}", &context(&[("title", "x")])),
            Err(AiError::NotAvailable)
        ));
        assert!(matches!(
            router.describe("t", "https://example.com", ""),
            Err(AiError::NotAvailable)
        ));

        let status = router.status();
        assert!(!status.available);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_describe_requires_title_and_url() {
        let router = BackendRouter::new(&settings());
        assert!(matches!(
            router.describe("  ", "https://example.com", ""),
            Err(AiError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fill_template() {
        let ctx = context(&[("title", "Rust"), ("url", "https://rust-lang.org")]);
        assert_eq!(
            fill_template("{title} at {url}: {description}", &ctx),
            "Rust at https://rust-lang.org: "
        );
        assert_eq!(fill_template("no placeholders", &ctx), "no placeholders");
        assert_eq!(fill_template("{title}{title}", &ctx), "RustRust");
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(BackendMode::LocalGateway.to_string(), "local-gateway");
        assert_eq!(
            serde_json::to_value(BackendMode::LocalGateway).unwrap(),
            "local-gateway"
        );
    }
}
