//! Direct provider completions over the Anthropic Messages API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::ai::errors::AiError;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct DirectClient {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl DirectClient {
    pub fn new(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AiError::NotInitialized(err.to_string()))?;

        Ok(Self {
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            client,
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| AiError::AuthFailed("API key is not a valid header value".into()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|err| AiError::from_transport(err, self.timeout))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|err| AiError::from_transport(err, self.timeout))?;

        if !status.is_success() {
            log::warn!("provider returned {status}: {text}");
            return Err(classify_provider_error(status, &text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|err| {
            log::error!("{err}. tried to parse: {text:?}");
            AiError::InvalidResponse(err.to_string())
        })?;

        Ok(parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Map a provider error response to the AI error taxonomy.
///
/// The structured `error.type` wins over the status code when present.
pub fn classify_provider_error(status: StatusCode, body: &str) -> AiError {
    let detail = serde_json::from_str::<ErrorResponse>(body).ok().map(|e| e.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    let kind = detail.as_ref().map(|d| d.kind.as_str()).unwrap_or_default();

    match (kind, status) {
        ("rate_limit_error", _) | (_, StatusCode::TOO_MANY_REQUESTS) => {
            AiError::RateLimited(message)
        }
        ("authentication_error" | "permission_error", _)
        | (_, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => AiError::AuthFailed(message),
        ("invalid_request_error", _) => AiError::InvalidInput(message),
        ("overloaded_error" | "api_error", _) => AiError::GatewayUnavailable {
            status: Some(status.as_u16()),
            body: message,
        },
        _ if status.is_server_error() => AiError::GatewayUnavailable {
            status: Some(status.as_u16()),
            body: message,
        },
        _ => AiError::Unknown(format!("provider returned {status}: {message}")),
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_structured_errors() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        match classify_provider_error(StatusCode::TOO_MANY_REQUESTS, body) {
            AiError::RateLimited(msg) => assert_eq!(msg, "slow down"),
            other => panic!("unexpected {other:?}"),
        }

        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert!(matches!(
            classify_provider_error(StatusCode::UNAUTHORIZED, body),
            AiError::AuthFailed(_)
        ));

        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(matches!(
            classify_provider_error(StatusCode::from_u16(529).unwrap(), body),
            AiError::GatewayUnavailable {
                status: Some(529),
                ..
            }
        ));
    }

    #[test]
    fn test_classify_by_status_when_body_is_opaque() {
        assert!(matches!(
            classify_provider_error(StatusCode::TOO_MANY_REQUESTS, "too many"),
            AiError::RateLimited(_)
        ));
        assert!(matches!(
            classify_provider_error(StatusCode::FORBIDDEN, ""),
            AiError::AuthFailed(_)
        ));
        match classify_provider_error(StatusCode::IM_A_TEAPOT, "short and stout") {
            AiError::Unknown(msg) => assert!(msg.contains("short and stout")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_content_blocks_ignore_non_text() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"thinking","thinking":"hm"},{"type":"text","text":"rust, web"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(parsed.content[1], ContentBlock::Text { .. }));
    }
}
