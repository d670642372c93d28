pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{Provider, ProviderMetadata, TokenPayload, TokenRecord};
use crate::vault::VaultCrypto;

pub use memory::MemoryTokenRepository;
pub use postgres::PgTokenRepository;

/// Stored form of a token. Secrets are sealed; nothing here is plaintext.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub provider: String,
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    pub token_type: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub provider_metadata: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTokenRow {
    pub provider: String,
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    pub token_type: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub provider_metadata: serde_json::Value,
    pub now: DateTime<Utc>,
}

/// In-place rotation of the active row. `None` fields keep the stored value.
#[derive(Debug, Clone)]
pub struct AccessTokenUpdate {
    pub provider: String,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub provider_metadata: Option<serde_json::Value>,
    pub now: DateTime<Utc>,
}

/// Persistence backend for token rows.
///
/// `replace_active` must deactivate and insert as one unit so no reader ever
/// sees zero or two active rows for a provider.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn replace_active(&self, row: &NewTokenRow) -> anyhow::Result<TokenRow>;

    async fn find_active(&self, provider: &str) -> anyhow::Result<Option<TokenRow>>;

    /// Returns `None` when the provider has no active row.
    async fn update_active(&self, update: &AccessTokenUpdate) -> anyhow::Result<Option<TokenRow>>;

    /// Soft revoke. Returns whether a row was deactivated.
    async fn deactivate(&self, provider: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;

    async fn count_active(&self, provider: &str) -> anyhow::Result<i64>;
}

/// Token persistence with transparent sealing of secrets.
///
/// Callers hand in and get back plaintext [`TokenRecord`]s; the repository
/// only ever sees ciphertext.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn TokenRepository>,
    crypto: Arc<VaultCrypto>,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        crypto: Arc<VaultCrypto>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            crypto,
            clock,
        }
    }

    /// Supersedes any active record for `provider` with a new one.
    pub async fn save(&self, provider: Provider, payload: &TokenPayload) -> AppResult<TokenRecord> {
        let refresh_token = payload.refresh_token.as_deref().ok_or_else(|| {
            AppError::ExchangeFailed(
                "token response carried no refresh_token; re-consent with offline access".into(),
            )
        })?;

        let now = self.clock.now();
        let row = NewTokenRow {
            provider: provider.as_str().to_string(),
            access_token_enc: self.crypto.seal(&payload.access_token)?,
            refresh_token_enc: self.crypto.seal(refresh_token)?,
            token_type: payload.token_type.clone(),
            scope: payload.scope.clone(),
            expires_at: payload.expires_at(now)?,
            provider_metadata: payload
                .metadata
                .as_ref()
                .map(ProviderMetadata::to_json)
                .unwrap_or_else(|| serde_json::json!({})),
            now,
        };

        let stored = self.repo.replace_active(&row).await?;
        tracing::info!(
            provider = %provider,
            token_id = %stored.id,
            expires_at = %stored.expires_at,
            "stored new active token"
        );
        self.decode(stored)
    }

    pub async fn get_active(&self, provider: Provider) -> AppResult<TokenRecord> {
        match self.repo.find_active(provider.as_str()).await? {
            Some(row) => self.decode(row),
            None => Err(AppError::NoActiveToken {
                provider: provider.to_string(),
            }),
        }
    }

    /// Rotates the access token of the active record in place.
    ///
    /// Expiry is derived from the store's clock and the payload lifetime.
    /// The refresh token and metadata are replaced only when the payload
    /// carries new ones.
    pub async fn update_access_token(
        &self,
        provider: Provider,
        payload: &TokenPayload,
    ) -> AppResult<TokenRecord> {
        let now = self.clock.now();
        let update = AccessTokenUpdate {
            provider: provider.as_str().to_string(),
            access_token_enc: self.crypto.seal(&payload.access_token)?,
            refresh_token_enc: payload
                .refresh_token
                .as_deref()
                .map(|rt| self.crypto.seal(rt))
                .transpose()?,
            token_type: Some(payload.token_type.clone()).filter(|t| !t.is_empty()),
            scope: Some(payload.scope.clone()).filter(|s| !s.is_empty()),
            expires_at: payload.expires_at(now)?,
            provider_metadata: payload.metadata.as_ref().map(ProviderMetadata::to_json),
            now,
        };

        match self.repo.update_active(&update).await? {
            Some(row) => {
                tracing::debug!(
                    provider = %provider,
                    token_id = %row.id,
                    expires_at = %row.expires_at,
                    rotated_refresh = update.refresh_token_enc.is_some(),
                    "rotated access token"
                );
                self.decode(row)
            }
            None => Err(AppError::NoActiveToken {
                provider: provider.to_string(),
            }),
        }
    }

    pub async fn deactivate(&self, provider: Provider) -> AppResult<()> {
        if self.repo.deactivate(provider.as_str(), self.clock.now()).await? {
            tracing::info!(provider = %provider, "deactivated active token");
            Ok(())
        } else {
            Err(AppError::NoActiveToken {
                provider: provider.to_string(),
            })
        }
    }

    pub async fn count_active(&self, provider: Provider) -> AppResult<i64> {
        Ok(self.repo.count_active(provider.as_str()).await?)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn decode(&self, row: TokenRow) -> AppResult<TokenRecord> {
        let provider = row.provider.parse::<Provider>()?;
        Ok(TokenRecord {
            id: row.id,
            provider,
            access_token: self.crypto.open(&row.access_token_enc)?,
            refresh_token: self.crypto.open(&row.refresh_token_enc)?,
            token_type: row.token_type,
            scope: row.scope,
            expires_at: row.expires_at,
            metadata: ProviderMetadata::from_json(&row.provider_metadata),
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn store() -> (CredentialStore, Arc<MemoryTokenRepository>, Arc<ManualClock>) {
        let repo = Arc::new(MemoryTokenRepository::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let crypto = Arc::new(VaultCrypto::new(KEY).unwrap());
        (
            CredentialStore::new(repo.clone(), crypto, clock.clone()),
            repo,
            clock,
        )
    }

    fn payload(access: &str, refresh: Option<&str>) -> TokenPayload {
        TokenPayload {
            access_token: access.into(),
            refresh_token: refresh.map(String::from),
            token_type: "Bearer".into(),
            scope: "ZohoProjects.portals.ALL".into(),
            expires_in: 3600,
            metadata: Some(ProviderMetadata::with_location("eu")),
        }
    }

    #[tokio::test]
    async fn test_save_then_read_back_plaintext() {
        let (store, repo, clock) = store();
        let saved = store
            .save(Provider::Zoho, &payload("1000.access.a", Some("1000.refresh.a")))
            .await
            .unwrap();
        assert_eq!(saved.expires_at, clock.now() + Duration::seconds(3600));

        let read = store.get_active(Provider::Zoho).await.unwrap();
        assert_eq!(read.access_token, "1000.access.a");
        assert_eq!(read.refresh_token, "1000.refresh.a");
        assert_eq!(read.metadata.location.as_deref(), Some("eu"));

        let raw = repo.find_active("zoho").await.unwrap().unwrap();
        assert!(!raw.access_token_enc.contains("1000.access.a"));
        assert!(!raw.refresh_token_enc.contains("1000.refresh.a"));
    }

    #[tokio::test]
    async fn test_save_supersedes_previous_active() {
        let (store, repo, _) = store();
        store.save(Provider::Zoho, &payload("a1", Some("r1"))).await.unwrap();
        store.save(Provider::Zoho, &payload("a2", Some("r2"))).await.unwrap();

        assert_eq!(store.count_active(Provider::Zoho).await.unwrap(), 1);
        assert_eq!(repo.len().await, 2);
        assert_eq!(store.get_active(Provider::Zoho).await.unwrap().access_token, "a2");
    }

    #[tokio::test]
    async fn test_save_without_refresh_token_is_rejected() {
        let (store, _, _) = store();
        let err = store.save(Provider::Zoho, &payload("a1", None)).await.unwrap_err();
        assert!(matches!(err, AppError::ExchangeFailed(_)));
        assert!(matches!(
            store.get_active(Provider::Zoho).await.unwrap_err(),
            AppError::NoActiveToken { .. }
        ));
    }

    #[tokio::test]
    async fn test_update_preserves_refresh_token_and_metadata() {
        let (store, _, clock) = store();
        store.save(Provider::Zoho, &payload("a1", Some("r1"))).await.unwrap();
        clock.advance(Duration::seconds(3500));

        let mut refreshed = payload("a2", None);
        refreshed.metadata = None;
        refreshed.scope = String::new();
        let rec = store.update_access_token(Provider::Zoho, &refreshed).await.unwrap();

        assert_eq!(rec.access_token, "a2");
        assert_eq!(rec.refresh_token, "r1");
        assert_eq!(rec.scope, "ZohoProjects.portals.ALL");
        assert_eq!(rec.metadata.location.as_deref(), Some("eu"));
        assert_eq!(rec.expires_at, clock.now() + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_update_rotates_refresh_token_when_returned() {
        let (store, _, _) = store();
        store.save(Provider::Zoho, &payload("a1", Some("r1"))).await.unwrap();
        let rec = store
            .update_access_token(Provider::Zoho, &payload("a2", Some("r2")))
            .await
            .unwrap();
        assert_eq!(rec.refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_update_and_deactivate_without_active_record() {
        let (store, _, _) = store();
        assert!(matches!(
            store.update_access_token(Provider::Zoho, &payload("a", None)).await,
            Err(AppError::NoActiveToken { .. })
        ));
        assert!(matches!(
            store.deactivate(Provider::Zoho).await,
            Err(AppError::NoActiveToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_deactivate_is_soft() {
        let (store, repo, _) = store();
        store.save(Provider::Zoho, &payload("a1", Some("r1"))).await.unwrap();
        store.deactivate(Provider::Zoho).await.unwrap();
        assert_eq!(store.count_active(Provider::Zoho).await.unwrap(), 0);
        assert_eq!(repo.len().await, 1);
    }
}
