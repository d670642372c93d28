use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{AccessTokenUpdate, NewTokenRow, TokenRepository, TokenRow};

const TOKEN_COLUMNS: &str = "id, provider, access_token_enc, refresh_token_enc, token_type, scope, \
     expires_at, provider_metadata, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn replace_active(&self, row: &NewTokenRow) -> anyhow::Result<TokenRow> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent writers for the same provider until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&row.provider)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE oauth_tokens SET is_active = false, updated_at = $2 \
             WHERE provider = $1 AND is_active",
        )
        .bind(&row.provider)
        .bind(row.now)
        .execute(&mut *tx)
        .await?;

        let stored = sqlx::query_as::<_, TokenRow>(&format!(
            r#"INSERT INTO oauth_tokens
                 (provider, access_token_enc, refresh_token_enc, token_type, scope,
                  expires_at, provider_metadata, is_active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8, $8)
               RETURNING {}"#,
            TOKEN_COLUMNS
        ))
        .bind(&row.provider)
        .bind(&row.access_token_enc)
        .bind(&row.refresh_token_enc)
        .bind(&row.token_type)
        .bind(&row.scope)
        .bind(row.expires_at)
        .bind(&row.provider_metadata)
        .bind(row.now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn find_active(&self, provider: &str) -> anyhow::Result<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {} FROM oauth_tokens WHERE provider = $1 AND is_active",
            TOKEN_COLUMNS
        ))
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_active(&self, update: &AccessTokenUpdate) -> anyhow::Result<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            r#"UPDATE oauth_tokens SET
                 access_token_enc  = $2,
                 refresh_token_enc = COALESCE($3, refresh_token_enc),
                 token_type        = COALESCE($4, token_type),
                 scope             = COALESCE($5, scope),
                 expires_at        = $6,
                 provider_metadata = COALESCE($7, provider_metadata),
                 updated_at        = $8
               WHERE provider = $1 AND is_active
               RETURNING {}"#,
            TOKEN_COLUMNS
        ))
        .bind(&update.provider)
        .bind(&update.access_token_enc)
        .bind(&update.refresh_token_enc)
        .bind(&update.token_type)
        .bind(&update.scope)
        .bind(update.expires_at)
        .bind(&update.provider_metadata)
        .bind(update.now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn deactivate(&self, provider: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE oauth_tokens SET is_active = false, updated_at = $2 \
             WHERE provider = $1 AND is_active",
        )
        .bind(provider)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_active(&self, provider: &str) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM oauth_tokens WHERE provider = $1 AND is_active",
        )
        .bind(provider)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}
