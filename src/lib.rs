//! OAuth2 token broker and thin REST proxy for the Zoho Projects API.
//!
//! The binary wires these modules into an HTTP server and an operator CLI;
//! integration tests in `tests/` build the same [`AppState`] directly.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod oauth;
pub mod proxy;
pub mod store;
pub mod tokens;
pub mod vault;

use std::sync::Arc;

use clock::{Clock, SystemClock};
use config::Config;
use middleware::metrics::Metrics;
use oauth::ZohoProvider;
use proxy::{ProjectsProxy, UpstreamClient};
use store::{CredentialStore, MemoryTokenRepository, PgTokenRepository, TokenRepository};
use tokens::TokenManager;
use vault::VaultCrypto;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub tokens: Arc<TokenManager>,
    pub projects: ProjectsProxy,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Connects the configured repository (running migrations for Postgres)
    /// and builds the state on the system clock.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let repo: Arc<dyn TokenRepository> = match config.database_url.as_deref() {
            Some(url) => {
                tracing::info!("Connecting to database...");
                let pg = PgTokenRepository::connect(url).await?;
                tracing::info!("Running migrations...");
                pg.migrate().await?;
                Arc::new(pg)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; tokens are kept in memory only");
                Arc::new(MemoryTokenRepository::new())
            }
        };
        Self::build(config, repo, Arc::new(SystemClock))
    }

    /// Wires every component around an existing repository and clock.
    pub fn build(
        config: Config,
        repo: Arc<dyn TokenRepository>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let crypto = Arc::new(VaultCrypto::new(&config.master_key)?);
        let http = proxy::http_client(config.http_timeout_secs)?;

        let zoho = ZohoProvider::new(config.zoho.clone(), config.regions.clone(), http.clone());
        let store = CredentialStore::new(repo, crypto, clock);
        let tokens = Arc::new(
            TokenManager::new(store, config.refresh_buffer(), metrics.clone())
                .with_provider(Arc::new(zoho)),
        );
        let projects = ProjectsProxy::new(tokens.clone(), UpstreamClient::new(http, metrics.clone()));

        Ok(Self {
            config,
            tokens,
            projects,
            metrics,
        })
    }
}
