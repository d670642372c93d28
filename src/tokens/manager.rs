use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

use crate::errors::{AppError, AppResult};
use crate::middleware::metrics::Metrics;
use crate::models::{Provider, ProviderMetadata, TokenRecord, TokenStatus};
use crate::oauth::OAuthProvider;
use crate::store::CredentialStore;

/// Hands out usable access tokens, refreshing them before they expire.
///
/// Everything that rotates the stored record for a provider (refresh, code
/// exchange, deactivation) runs inside that provider's lock, and the record
/// is re-read after the lock is taken. Concurrent callers that find a stale
/// token therefore wait for one refresh instead of each issuing their own.
pub struct TokenManager {
    store: CredentialStore,
    providers: HashMap<Provider, Arc<dyn OAuthProvider>>,
    buffer: Duration,
    refresh_locks: DashMap<Provider, Arc<Mutex<()>>>,
    metrics: Arc<Metrics>,
}

impl TokenManager {
    pub fn new(store: CredentialStore, buffer: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            providers: HashMap::new(),
            buffer,
            refresh_locks: DashMap::new(),
            metrics,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    pub fn oauth(&self, provider: Provider) -> AppResult<&Arc<dyn OAuthProvider>> {
        self.providers
            .get(&provider)
            .ok_or_else(|| AppError::ProviderNotConfigured(provider.to_string()))
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Takes the provider's rotation lock, counting callers that had to wait.
    async fn lock(&self, provider: Provider) -> OwnedMutexGuard<()> {
        let lock = self.refresh_locks.entry(provider).or_default().clone();
        match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.metrics.record_coalesced(provider.as_str());
                tracing::debug!(provider = %provider, "waiting on in-flight token rotation");
                lock.lock_owned().await
            }
        }
    }

    /// The active record, refreshed first if it is within the buffer of expiry.
    pub async fn get_valid_record(&self, provider: Provider) -> AppResult<TokenRecord> {
        let record = self.store.get_active(provider).await?;
        if !record.is_stale(self.store.now(), self.buffer) {
            return Ok(record);
        }

        let _guard = self.lock(provider).await;
        let record = self.store.get_active(provider).await?;
        if !record.is_stale(self.store.now(), self.buffer) {
            return Ok(record);
        }
        self.refresh_locked(&record).await
    }

    pub async fn get_valid_token(&self, provider: Provider) -> AppResult<String> {
        Ok(self.get_valid_record(provider).await?.access_token)
    }

    /// Refreshes regardless of staleness.
    pub async fn force_refresh(&self, provider: Provider) -> AppResult<TokenRecord> {
        let _guard = self.lock(provider).await;
        let record = self.store.get_active(provider).await?;
        self.refresh_locked(&record).await
    }

    /// Called after the resource server rejected `rejected_access_token`.
    ///
    /// Refreshes once, unless another caller already rotated the token while
    /// this one waited for the lock.
    pub async fn refresh_rejected(
        &self,
        provider: Provider,
        rejected_access_token: &str,
    ) -> AppResult<TokenRecord> {
        let _guard = self.lock(provider).await;
        let record = self.store.get_active(provider).await?;
        if record.access_token != rejected_access_token {
            return Ok(record);
        }
        self.refresh_locked(&record).await
    }

    pub fn authorization_url(&self, provider: Provider, metadata: &ProviderMetadata) -> AppResult<Url> {
        self.oauth(provider)?.authorization_url(metadata)
    }

    /// Exchanges an authorization code and makes the result the active record.
    pub async fn authorize(
        &self,
        provider: Provider,
        code: &str,
        metadata: ProviderMetadata,
    ) -> AppResult<TokenRecord> {
        let oauth = self.oauth(provider)?.clone();
        let _guard = self.lock(provider).await;
        let payload = oauth.exchange_code(code, metadata).await?;
        self.store.save(provider, &payload).await
    }

    pub async fn status(&self, provider: Provider) -> AppResult<TokenStatus> {
        let record = self.store.get_active(provider).await?;
        let now = self.store.now();
        Ok(TokenStatus {
            provider,
            active: record.is_active,
            expired: now >= record.expires_at,
            expires_at: record.expires_at,
            expires_in_secs: (record.expires_at - now).num_seconds().max(0),
            scope: record.scope,
            token_type: record.token_type,
            last_updated: record.updated_at,
            region: record.metadata.location,
        })
    }

    pub async fn deactivate(&self, provider: Provider) -> AppResult<()> {
        let _guard = self.lock(provider).await;
        self.store.deactivate(provider).await
    }

    /// Must be called with the provider's lock held. On failure the stored
    /// record is left exactly as it was.
    async fn refresh_locked(&self, record: &TokenRecord) -> AppResult<TokenRecord> {
        let provider = record.provider;
        let oauth = self.oauth(provider)?;

        tracing::info!(
            provider = %provider,
            token_id = %record.id,
            expires_at = %record.expires_at,
            "refreshing access token"
        );
        let payload = match oauth.refresh(&record.refresh_token, &record.metadata).await {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_refresh(provider.as_str(), "failure");
                tracing::error!(
                    provider = %provider,
                    token_id = %record.id,
                    error = %e,
                    "token refresh failed; re-authorization required"
                );
                return Err(e);
            }
        };

        let updated = self.store.update_access_token(provider, &payload).await?;
        self.metrics.record_refresh(provider.as_str(), "success");
        Ok(updated)
    }
}
