//! Shared fixtures: an `AppState` wired to a wiremock server standing in for
//! both the accounts and projects services, an in-memory repository and a
//! manual clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use broker::clock::ManualClock;
use broker::config;
use broker::models::{Provider, ProviderMetadata, TokenPayload};
use broker::oauth::RegionTable;
use broker::store::MemoryTokenRepository;
use broker::AppState;
use chrono::Utc;
use wiremock::MockServer;

pub const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const ADMIN_KEY: &str = "test-admin-key-0123456789";

pub struct Harness {
    pub state: Arc<AppState>,
    pub server: MockServer,
    pub clock: Arc<ManualClock>,
    pub repo: Arc<MemoryTokenRepository>,
}

/// `com` (the default) is served at the mock root, `eu` under `/eu`.
pub fn region_yaml(uri: &str) -> String {
    format!(
        "default_region: com\n\
         accounts:\n  com: {uri}\n  eu: {uri}/eu\n\
         projects:\n  com: {uri}\n  eu: {uri}/eu\n",
        uri = uri
    )
}

pub async fn harness() -> Harness {
    let server = MockServer::start().await;

    let env: HashMap<&str, &str> = [
        ("BROKER_MASTER_KEY", MASTER_KEY),
        ("BROKER_ADMIN_KEY", ADMIN_KEY),
        ("ZOHO_CLIENT_ID", "1000.TESTCLIENT"),
        ("ZOHO_CLIENT_SECRET", "test-secret"),
        ("ZOHO_REDIRECT_URI", "http://localhost:3000/api/zoho/callback"),
        ("BROKER_HTTP_TIMEOUT_SECS", "5"),
    ]
    .into_iter()
    .collect();
    let mut cfg = config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
    cfg.regions = RegionTable::from_yaml("com", &region_yaml(&server.uri())).unwrap();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let repo = Arc::new(MemoryTokenRepository::new());
    let state = AppState::build(cfg, repo.clone(), clock.clone()).unwrap();

    Harness {
        state: Arc::new(state),
        server,
        clock,
        repo,
    }
}

pub fn payload(access: &str, refresh: &str, metadata: ProviderMetadata) -> TokenPayload {
    TokenPayload {
        access_token: access.to_string(),
        refresh_token: Some(refresh.to_string()),
        token_type: "Bearer".to_string(),
        scope: "ZohoProjects.portals.ALL,ZohoProjects.projects.ALL".to_string(),
        expires_in: 3600,
        metadata: Some(metadata),
    }
}

impl Harness {
    /// Stores an active token issued "now" with a one hour lifetime.
    pub async fn seed(&self, access: &str, refresh: &str, metadata: ProviderMetadata) {
        self.state
            .tokens
            .store()
            .save(Provider::Zoho, &payload(access, refresh, metadata))
            .await
            .unwrap();
    }

    pub async fn active_access_token(&self) -> String {
        self.state
            .tokens
            .store()
            .get_active(Provider::Zoho)
            .await
            .unwrap()
            .access_token
    }
}
