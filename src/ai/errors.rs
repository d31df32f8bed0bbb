use std::time::Duration;

use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("AI backend is not configured")]
    NotAvailable,

    #[error("AI client failed to initialize: {0}")]
    NotInitialized(String),

    #[error("AI provider rate limit reached: {0}")]
    RateLimited(String),

    #[error("AI provider rejected credentials: {0}")]
    AuthFailed(String),

    #[error("AI request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("AI gateway unavailable (status: {status:?}): {body}")]
    GatewayUnavailable { status: Option<u16>, body: String },

    #[error("invalid response from AI backend: {0}")]
    InvalidResponse(String),

    #[error("text to embed is empty")]
    EmptyInput,

    #[error("bookmark has no content to embed")]
    NoContent,

    #[error("bookmark {0} has no embedding")]
    NoEmbedding(u64),

    #[error("bookmark {0} not found")]
    NotFound(u64),

    #[error("unexpected AI error: {0}")]
    Unknown(String),
}

impl AiError {
    /// HTTP status the daemon answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AiError::InvalidInput(_) | AiError::EmptyInput | AiError::NoContent => {
                StatusCode::BAD_REQUEST
            }
            AiError::NotFound(_) => StatusCode::NOT_FOUND,
            AiError::NoEmbedding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AiError::AuthFailed(_) | AiError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            AiError::NotAvailable
            | AiError::NotInitialized(_)
            | AiError::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AiError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Transient upstream failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::RateLimited(_)
                | AiError::AuthFailed(_)
                | AiError::Timeout(_)
                | AiError::GatewayUnavailable { .. }
        )
    }

    /// Classify a transport level failure from reqwest.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return AiError::Timeout(timeout);
        }

        if err.is_connect() || err.is_request() {
            return AiError::GatewayUnavailable {
                status: err.status().map(|s| s.as_u16()),
                body: err.to_string(),
            };
        }

        if err.is_decode() {
            return AiError::InvalidResponse(err.to_string());
        }

        AiError::Unknown(err.to_string())
    }

    /// Classify a non-success response from a gateway endpoint.
    pub fn from_gateway_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => AiError::RateLimited(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AiError::AuthFailed(body),
            _ => AiError::GatewayUnavailable {
                status: Some(status.as_u16()),
                body,
            },
        }
    }
}
