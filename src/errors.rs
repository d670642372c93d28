use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Upstream bodies echoed back to callers are capped at this many bytes.
const MAX_DETAIL_BYTES: usize = 2048;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no active token for provider '{provider}'")]
    NoActiveToken { provider: String },

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("upstream request failed with status {status}: {body}")]
    UpstreamRequestFailed { status: u16, body: String },

    #[error("upstream unreachable: {0}")]
    Upstream(String),

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(vec![msg.into()])
    }

    /// True for upstream 401/403 responses, the only failures worth one
    /// forced refresh before giving up.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamRequestFailed { status: 401 | 403, .. }
        )
    }

    /// Stable machine-readable kind, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NoActiveToken { .. } => "no_active_token",
            AppError::ExchangeFailed(_) => "exchange_failed",
            AppError::RefreshFailed(_) => "refresh_failed",
            AppError::UpstreamRequestFailed { .. } | AppError::Upstream(_) => "upstream_failed",
            AppError::Validation(_) => "validation_error",
            AppError::ProviderNotConfigured(_) => "configuration_error",
            AppError::Internal(_) => "internal_server_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error_type, msg) = match &self {
            AppError::NoActiveToken { provider } => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                format!(
                    "no active token for '{}'; run the authorization flow first",
                    provider
                ),
            ),
            AppError::ExchangeFailed(detail) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                format!("failed to complete authentication: {}", detail),
            ),
            AppError::RefreshFailed(detail) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                format!("failed to refresh token, re-authorization required: {}", detail),
            ),
            AppError::UpstreamRequestFailed { status, body } => {
                let status = StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                (status, "upstream_error", truncate(body, MAX_DETAIL_BYTES))
            }
            AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, "upstream_error", e.clone()),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "request validation failed".to_string(),
            ),
            AppError::ProviderNotConfigured(p) => {
                tracing::error!(provider = %p, "no OAuth implementation registered");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    format!("provider '{}' is not configured", p),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let mut error = json!({
            "message": msg,
            "type": error_type,
            "code": code,
        });
        match &self {
            AppError::Validation(details) => {
                error["details"] = json!(details);
            }
            AppError::UpstreamRequestFailed { status, .. } => {
                error["upstream_status"] = json!(status);
            }
            _ => {}
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
