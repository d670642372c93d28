use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{OAuthProvider, RegionTable, Service};
use crate::config::ZohoConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{Provider, ProviderMetadata, TokenPayload};

const AUTH_PATH: &str = "/oauth/v2/auth";
const TOKEN_PATH: &str = "/oauth/v2/token";
const DEFAULT_LIFETIME_SECS: i64 = 3600;
/// Zoho access tokens live one hour; anything past a day is a bad response.
const MAX_LIFETIME_SECS: i64 = 86_400;

/// Zoho token endpoint response. Zoho reports some failures as HTTP 200
/// with an `error` field, so every field is optional.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    expires_in: Option<i64>,
    /// Older accounts servers send the lifetime under this name.
    expires_in_sec: Option<i64>,
    api_domain: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

impl TokenResponse {
    fn failure_detail(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
    }
}

pub struct ZohoProvider {
    config: ZohoConfig,
    regions: RegionTable,
    http: reqwest::Client,
}

impl ZohoProvider {
    pub fn new(config: ZohoConfig, regions: RegionTable, http: reqwest::Client) -> Self {
        Self {
            config,
            regions,
            http,
        }
    }

    fn token_url(&self, metadata: &ProviderMetadata) -> String {
        format!("{}{}", self.regions.resolve(Service::Accounts, metadata), TOKEN_PATH)
    }

    /// POSTs a form to the token endpoint. Transport failures, non-2xx
    /// statuses and 200-with-`error` bodies all come back as `Err(detail)`.
    async fn post_token_form(
        &self,
        metadata: &ProviderMetadata,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, String> {
        let url = self.token_url(metadata);
        let resp = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token endpoint unreachable: {}", e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("failed to read token response: {}", e))?;
        let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let detail = parsed
                .as_ref()
                .and_then(TokenResponse::failure_detail)
                .unwrap_or_else(|| {
                    if body.trim().is_empty() {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        body.clone()
                    }
                });
            return Err(detail);
        }

        let parsed = parsed.ok_or_else(|| "token endpoint returned a non-JSON body".to_string())?;
        if parsed.error.is_some() || parsed.access_token.is_none() {
            return Err(parsed
                .failure_detail()
                .unwrap_or_else(|| "token response carried no access_token".to_string()));
        }
        Ok(parsed)
    }

    fn payload(
        &self,
        resp: TokenResponse,
        metadata: Option<ProviderMetadata>,
    ) -> Result<TokenPayload, String> {
        let expires_in = resp
            .expires_in
            .or(resp.expires_in_sec)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_LIFETIME_SECS);
        if expires_in > MAX_LIFETIME_SECS {
            return Err(format!("token endpoint reported an implausible lifetime of {}s", expires_in));
        }
        Ok(TokenPayload {
            access_token: resp.access_token.unwrap_or_default(),
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
            token_type: resp.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: resp
                .scope
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| self.config.scope.clone()),
            expires_in,
            metadata,
        })
    }
}

#[async_trait]
impl OAuthProvider for ZohoProvider {
    fn provider(&self) -> Provider {
        Provider::Zoho
    }

    fn authorization_url(&self, metadata: &ProviderMetadata) -> AppResult<Url> {
        let base = self.regions.resolve(Service::Accounts, metadata);
        let url = Url::parse_with_params(
            &format!("{}{}", base, AUTH_PATH),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scope.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| anyhow::anyhow!("invalid authorization endpoint {}: {}", base, e))?;
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, mut metadata: ProviderMetadata) -> AppResult<TokenPayload> {
        if code.trim().is_empty() {
            return Err(AppError::validation("authorization code is required"));
        }
        // Pin the region now so every later call agrees with the issuer.
        if metadata.location.is_none() {
            metadata.location = metadata
                .accounts_server
                .as_deref()
                .and_then(|s| self.regions.region_of_accounts_server(s));
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let payload = match self.post_token_form(&metadata, &form).await {
            Ok(resp) => {
                if let Some(domain) = resp.api_domain.clone() {
                    metadata.api_domain = Some(domain);
                }
                self.payload(resp, Some(metadata.clone()))
            }
            Err(detail) => Err(detail),
        }
        .map_err(|detail| {
            tracing::warn!(
                provider = "zoho",
                region = %self.regions.region_for(&metadata),
                error = %detail,
                "authorization code exchange rejected"
            );
            AppError::ExchangeFailed(detail)
        })?;

        tracing::info!(
            provider = "zoho",
            region = %self.regions.region_for(&metadata),
            "authorization code exchanged"
        );
        Ok(payload)
    }

    async fn refresh(&self, refresh_token: &str, metadata: &ProviderMetadata) -> AppResult<TokenPayload> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let payload = self
            .post_token_form(metadata, &form)
            .await
            .and_then(|resp| {
                // Metadata is replaced only when Zoho reports a different api_domain.
                let replacement = match resp.api_domain.as_deref() {
                    Some(domain) if metadata.api_domain.as_deref() != Some(domain) => {
                        let mut updated = metadata.clone();
                        updated.api_domain = Some(domain.to_string());
                        Some(updated)
                    }
                    _ => None,
                };
                self.payload(resp, replacement)
            })
            .map_err(|detail| {
                tracing::warn!(
                    provider = "zoho",
                    region = %self.regions.region_for(metadata),
                    error = %detail,
                    "refresh grant rejected"
                );
                AppError::RefreshFailed(detail)
            })?;
        Ok(payload)
    }

    fn resource_base(&self, metadata: &ProviderMetadata) -> String {
        self.regions.resolve(Service::Projects, metadata)
    }
}
