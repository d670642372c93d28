use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccessTokenUpdate, NewTokenRow, TokenRepository, TokenRow};

/// Process-local repository. Every operation holds one lock over the whole
/// row set, so deactivate-then-insert is atomic for readers.
#[derive(Default)]
pub struct MemoryTokenRepository {
    rows: Mutex<Vec<TokenRow>>,
}

impl MemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows, active or not.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn replace_active(&self, row: &NewTokenRow) -> anyhow::Result<TokenRow> {
        let mut rows = self.rows.lock().await;
        for r in rows.iter_mut().filter(|r| r.provider == row.provider && r.is_active) {
            r.is_active = false;
            r.updated_at = row.now;
        }
        let stored = TokenRow {
            id: Uuid::new_v4(),
            provider: row.provider.clone(),
            access_token_enc: row.access_token_enc.clone(),
            refresh_token_enc: row.refresh_token_enc.clone(),
            token_type: row.token_type.clone(),
            scope: row.scope.clone(),
            expires_at: row.expires_at,
            provider_metadata: row.provider_metadata.clone(),
            is_active: true,
            created_at: row.now,
            updated_at: row.now,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn find_active(&self, provider: &str) -> anyhow::Result<Option<TokenRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|r| r.provider == provider && r.is_active)
            .cloned())
    }

    async fn update_active(&self, update: &AccessTokenUpdate) -> anyhow::Result<Option<TokenRow>> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.provider == update.provider && r.is_active)
        else {
            return Ok(None);
        };

        row.access_token_enc = update.access_token_enc.clone();
        if let Some(rt) = &update.refresh_token_enc {
            row.refresh_token_enc = rt.clone();
        }
        if let Some(tt) = &update.token_type {
            row.token_type = tt.clone();
        }
        if let Some(scope) = &update.scope {
            row.scope = scope.clone();
        }
        if let Some(meta) = &update.provider_metadata {
            row.provider_metadata = meta.clone();
        }
        row.expires_at = update.expires_at;
        row.updated_at = update.now;
        Ok(Some(row.clone()))
    }

    async fn deactivate(&self, provider: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().await;
        let mut changed = false;
        for r in rows.iter_mut().filter(|r| r.provider == provider && r.is_active) {
            r.is_active = false;
            r.updated_at = now;
            changed = true;
        }
        Ok(changed)
    }

    async fn count_active(&self, provider: &str) -> anyhow::Result<i64> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| r.provider == provider && r.is_active)
            .count() as i64)
    }
}
