use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::models::{Provider, ProviderMetadata, TokenStatus};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InitiateAuthParams {
    /// Region to send the user to for consent. Defaults to the configured one.
    pub location: Option<String>,
}

/// Query string Zoho appends to the redirect URI.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "accounts-server")]
    pub accounts_server: Option<String>,
}

pub async fn initiate_auth(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InitiateAuthParams>,
) -> AppResult<Redirect> {
    let metadata = ProviderMetadata {
        location: params.location,
        ..Default::default()
    };
    let url = state.tokens.authorization_url(Provider::Zoho, &metadata)?;
    tracing::info!(
        region = %state.config.regions.region_for(&metadata),
        "redirecting to consent screen"
    );
    Ok(Redirect::temporary(url.as_str()))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> AppResult<Json<serde_json::Value>> {
    if let Some(err) = params.error {
        let detail = params.error_description.unwrap_or(err);
        tracing::warn!(error = %detail, "authorization callback returned an error");
        return Err(AppError::ExchangeFailed(detail));
    }
    let code = params
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::validation("Authorization code is missing"))?;

    tracing::info!(
        location = params.location.as_deref().unwrap_or("-"),
        "exchanging authorization code"
    );
    let metadata = ProviderMetadata {
        location: params.location,
        accounts_server: params.accounts_server,
        ..Default::default()
    };
    let record = state.tokens.authorize(Provider::Zoho, &code, metadata).await?;

    Ok(Json(json!({
        "message": "Authentication successful",
        "provider": record.provider,
        "scope": record.scope,
        "expires_at": record.expires_at,
        "region": state.config.regions.region_for(&record.metadata),
    })))
}

pub async fn token_status(State(state): State<Arc<AppState>>) -> AppResult<Json<TokenStatus>> {
    Ok(Json(state.tokens.status(Provider::Zoho).await?))
}

pub async fn refresh_token(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let record = state.tokens.force_refresh(Provider::Zoho).await?;
    tracing::info!(token_id = %record.id, expires_at = %record.expires_at, "token refreshed on request");
    Ok(Json(json!({
        "message": "Token refreshed successfully",
        "expires_at": record.expires_at,
    })))
}

/// Current valid access token, refreshed first if stale.
pub async fn get_token(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let record = state.tokens.get_valid_record(Provider::Zoho).await?;
    Ok(Json(json!({
        "access_token": record.access_token,
        "token_type": record.token_type,
        "expires_at": record.expires_at,
    })))
}

pub async fn deactivate_token(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    state.tokens.deactivate(Provider::Zoho).await?;
    Ok(Json(json!({ "message": "Token deactivated" })).into_response())
}
