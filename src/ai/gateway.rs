use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ai::errors::AiError;

/// Generated description as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub description: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub backend: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    tags: Vec<String>,
}

/// Client for the AI gateway HTTP API (remote or local deployment).
pub struct GatewayClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AiError::NotInitialized(err.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, AiError> {
        let url = format!("{}{path}", self.base_url);
        log::debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|err| AiError::from_transport(err, self.timeout))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|err| AiError::from_transport(err, self.timeout))?;

        if !status.is_success() {
            log::warn!("AI gateway {path} returned {status}: {text}");
            return Err(AiError::from_gateway_status(status, text));
        }

        serde_json::from_str::<T>(&text).map_err(|err| {
            log::error!("{err}. tried to parse: {text:?}");
            AiError::InvalidResponse(err.to_string())
        })
    }

    pub fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError> {
        let resp: GenerateResponse = self.post(
            "/api/ai/generate",
            json!({
                "prompt": prompt,
                "maxTokens": max_tokens,
            }),
        )?;
        Ok(resp.response)
    }

    pub fn tags(&self, title: &str, url: &str, description: &str) -> Result<Vec<String>, AiError> {
        let resp: TagsResponse = self.post(
            "/api/ai/tags",
            json!({
                "title": title,
                "url": url,
                "description": description,
            }),
        )?;
        Ok(resp.tags)
    }

    pub fn describe(
        &self,
        title: &str,
        url: &str,
        existing_description: &str,
    ) -> Result<Description, AiError> {
        self.post(
            "/api/ai/describe",
            json!({
                "title": title,
                "url": url,
                "existingDescription": existing_description,
            }),
        )
    }
}
