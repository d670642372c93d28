use std::path::PathBuf;

use anyhow::Context;

use crate::oauth::RegionTable;
use crate::vault::VaultCrypto;

pub const DEFAULT_SCOPE: &str =
    "ZohoProjects.portals.ALL,ZohoProjects.projects.ALL,ZohoProjects.activities.ALL";

/// OAuth client registration for Zoho.
#[derive(Debug, Clone)]
pub struct ZohoConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres URL. Without one the broker keeps tokens in memory.
    pub database_url: Option<String>,
    pub master_key: String,
    pub admin_key: Option<String>,
    pub zoho: ZohoConfig,
    pub regions: RegionTable,
    /// Seconds before expiry at which a token counts as stale.
    /// Set via BROKER_REFRESH_BUFFER_SECS. Default: 300.
    pub refresh_buffer_secs: i64,
    /// Total timeout for outbound calls. Set via BROKER_HTTP_TIMEOUT_SECS.
    pub http_timeout_secs: u64,
    pub production: bool,
}

impl Config {
    /// Returns the admin key for API authentication.
    /// Falls back to master_key if BROKER_ADMIN_KEY is not set.
    pub fn admin_key(&self) -> &str {
        self.admin_key.as_deref().unwrap_or(&self.master_key)
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds the config from any key lookup; `load` passes the environment.
pub fn from_lookup<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

    let production = get("BROKER_ENV")
        .or_else(|| get("RUST_ENV"))
        .map(|v| v == "production")
        .unwrap_or(false);

    let master_key = match get("BROKER_MASTER_KEY") {
        Some(key) => key,
        None if production => anyhow::bail!(
            "BROKER_MASTER_KEY is not set. \
             Set a 64-char hex key before running in production."
        ),
        None => {
            tracing::warn!(
                "BROKER_MASTER_KEY is not set; using an ephemeral key. \
                 Stored tokens will be unreadable after restart."
            );
            VaultCrypto::generate_key_hex()
        }
    };

    let default_region = get("ZOHO_DEFAULT_REGION").unwrap_or_else(|| "com".into());
    let regions = match get("BROKER_REGIONS_FILE") {
        Some(path) => RegionTable::from_yaml_file(&default_region, &PathBuf::from(path))?,
        None => {
            let table = RegionTable::zoho(&default_region);
            table.validate().context("ZOHO_DEFAULT_REGION")?;
            table
        }
    };

    let zoho = ZohoConfig {
        client_id: get("ZOHO_CLIENT_ID").unwrap_or_default(),
        client_secret: get("ZOHO_CLIENT_SECRET")
            .or_else(|| get("ZOHO_SECRET_ID"))
            .unwrap_or_default(),
        redirect_uri: get("ZOHO_REDIRECT_URI")
            .unwrap_or_else(|| "http://localhost:3000/api/zoho/callback".into()),
        scope: get("ZOHO_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.into()),
    };
    if zoho.client_id.is_empty() || zoho.client_secret.is_empty() {
        if production {
            anyhow::bail!("ZOHO_CLIENT_ID and ZOHO_CLIENT_SECRET are required in production");
        }
        tracing::warn!("ZOHO_CLIENT_ID / ZOHO_CLIENT_SECRET not set; authorization will fail");
    }

    Ok(Config {
        port: get("BROKER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000),
        database_url: get("DATABASE_URL"),
        master_key,
        admin_key: get("BROKER_ADMIN_KEY"),
        zoho,
        regions,
        refresh_buffer_secs: get("BROKER_REFRESH_BUFFER_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
        http_timeout_secs: get("BROKER_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        production,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 3000);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.refresh_buffer_secs, 300);
        assert_eq!(cfg.http_timeout_secs, 30);
        assert_eq!(cfg.zoho.scope, DEFAULT_SCOPE);
        assert_eq!(cfg.regions.default_region(), "com");
        assert_eq!(cfg.master_key.len(), 64);
        assert_eq!(cfg.admin_key(), cfg.master_key);
    }

    #[test]
    fn test_overrides() {
        let cfg = from_lookup(lookup(&[
            ("BROKER_PORT", "8080"),
            ("BROKER_ADMIN_KEY", "admin-secret"),
            ("BROKER_REFRESH_BUFFER_SECS", "60"),
            ("ZOHO_DEFAULT_REGION", "eu"),
            ("ZOHO_SECRET_ID", "legacy-secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.admin_key(), "admin-secret");
        assert_eq!(cfg.refresh_buffer(), chrono::Duration::seconds(60));
        assert_eq!(cfg.regions.default_region(), "eu");
        assert_eq!(cfg.zoho.client_secret, "legacy-secret");
    }

    #[test]
    fn test_production_requires_master_key() {
        assert!(from_lookup(lookup(&[("BROKER_ENV", "production")])).is_err());
    }

    #[test]
    fn test_unknown_default_region_rejected() {
        assert!(from_lookup(lookup(&[("ZOHO_DEFAULT_REGION", "mars")])).is_err());
    }
}
