//! The gateway's single top-level error type (`SPEC_FULL.md` A.2).
//!
//! Every handler on the request path returns `Result<_, GatewayError>`. The taxonomy
//! mirrors `spec.md` §7 exactly; the `IntoResponse` impl is the one place that decides
//! the HTTP status and `{"error":{...}}` body shape, so no handler hand-rolls either.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid API key")]
    Auth,

    #[error("rate limit exceeded")]
    RateLimit { retry_after_secs: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("MCP support is disabled")]
    McpDisabled,

    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Auth => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::McpDisabled => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::Auth => "invalid_request_error",
            GatewayError::RateLimit { .. } => "rate_limit_error",
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::McpDisabled => "service_unavailable",
            GatewayError::Transport(_) | GatewayError::Backend(_) | GatewayError::Timeout(_) | GatewayError::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Opaque, user-facing message. Never includes API keys, tokens or stack traces.
    fn public_message(&self) -> String {
        match self {
            GatewayError::Auth => "Invalid API key".to_string(),
            GatewayError::RateLimit { .. } => "Rate limit exceeded".to_string(),
            GatewayError::McpDisabled => "MCP support is disabled".to_string(),
            other => other.to_string(),
        }
    }

    /// Renders this error into a response, stamping the request ID for correlation
    /// (`spec.md` §7: "every error body includes the request ID").
    pub fn into_response_with_request_id(self, request_id: String) -> Response {
        let status = self.status();
        let retry_after = match &self {
            GatewayError::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.public_message(),
                kind: self.kind(),
                details: None,
                request_id: Some(request_id),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.into_response_with_request_id(uuid::Uuid::new_v4().to_string())
    }
}
