use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::ProviderMetadata;

/// The two endpoint families a token is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Authorization server: consent screen and token endpoint.
    Accounts,
    /// Resource server: portals and projects.
    Projects,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Accounts => "accounts",
            Service::Projects => "projects",
        }
    }
}

const ZOHO_ACCOUNTS: &[(&str, &str)] = &[
    ("com", "https://accounts.zoho.com"),
    ("eu", "https://accounts.zoho.eu"),
    ("au", "https://accounts.zoho.com.au"),
    ("in", "https://accounts.zoho.in"),
    ("jp", "https://accounts.zoho.jp"),
    ("uk", "https://accounts.zoho.uk"),
    ("ca", "https://accounts.zohocloud.ca"),
    ("sa", "https://accounts.zoho.sa"),
];

const ZOHO_PROJECTS: &[(&str, &str)] = &[
    ("com", "https://projectsapi.zoho.com"),
    ("eu", "https://projectsapi.zoho.eu"),
    ("au", "https://projectsapi.zoho.com.au"),
    ("in", "https://projectsapi.zoho.in"),
    ("jp", "https://projectsapi.zoho.jp"),
    ("uk", "https://projectsapi.zoho.uk"),
    ("ca", "https://projectsapi.zohocloud.ca"),
    ("sa", "https://projectsapi.zoho.sa"),
];

/// Optional YAML overlay for the built-in table.
///
/// ```yaml
/// default_region: eu
/// accounts:
///   eu: https://accounts.zoho.eu
/// projects:
///   eu: https://projectsapi.zoho.eu
/// ```
#[derive(Debug, Default, Deserialize)]
struct RegionFile {
    default_region: Option<String>,
    #[serde(default)]
    accounts: BTreeMap<String, String>,
    #[serde(default)]
    projects: BTreeMap<String, String>,
}

/// Per-region endpoint maps plus the process-wide default region.
///
/// Resolution order for a token: explicit server override, then
/// `metadata.location`, then the default region. Exchange, refresh and
/// resource calls all go through [`RegionTable::resolve`].
#[derive(Debug, Clone)]
pub struct RegionTable {
    default_region: String,
    accounts: BTreeMap<String, String>,
    projects: BTreeMap<String, String>,
}

impl RegionTable {
    pub fn zoho(default_region: &str) -> Self {
        let collect = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            default_region: normalize_region(default_region),
            accounts: collect(ZOHO_ACCOUNTS),
            projects: collect(ZOHO_PROJECTS),
        }
    }

    /// Built-in table overlaid with a YAML document.
    pub fn from_yaml(default_region: &str, yaml: &str) -> anyhow::Result<Self> {
        let file: RegionFile = serde_yaml::from_str(yaml).context("invalid region table YAML")?;
        let mut table = Self::zoho(file.default_region.as_deref().unwrap_or(default_region));
        for (region, url) in file.accounts {
            table.accounts.insert(normalize_region(&region), trim_base(&url));
        }
        for (region, url) in file.projects {
            table.projects.insert(normalize_region(&region), trim_base(&url));
        }
        table.validate()?;
        Ok(table)
    }

    pub fn from_yaml_file(default_region: &str, path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read region table {}", path.display()))?;
        Self::from_yaml(default_region, &raw)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (service, map) in [("accounts", &self.accounts), ("projects", &self.projects)] {
            if !map.contains_key(&self.default_region) {
                anyhow::bail!(
                    "default region '{}' has no {} endpoint",
                    self.default_region,
                    service
                );
            }
            for (region, url) in map {
                url::Url::parse(url)
                    .with_context(|| format!("{} endpoint for '{}' is not a URL", service, region))?;
            }
        }
        Ok(())
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    fn map(&self, service: Service) -> &BTreeMap<String, String> {
        match service {
            Service::Accounts => &self.accounts,
            Service::Projects => &self.projects,
        }
    }

    /// Base URL (no trailing slash) for `service` under the given metadata.
    pub fn resolve(&self, service: Service, metadata: &ProviderMetadata) -> String {
        let override_url = match service {
            Service::Accounts => metadata.accounts_server.as_deref(),
            Service::Projects => metadata.api_domain.as_deref(),
        };
        if let Some(candidate) = override_url {
            let candidate = trim_base(candidate);
            // Only hosts already in the table are honoured; the override is
            // caller-supplied and must not steer credentials elsewhere.
            if self.map(service).values().any(|known| known.eq_ignore_ascii_case(&candidate)) {
                return candidate;
            }
            tracing::debug!(
                service = service.as_str(),
                host = %candidate,
                "server override is not a known endpoint; using region lookup"
            );
        }

        let region = self.region_for(metadata);
        self.map(service)
            .get(&region)
            .or_else(|| self.map(service).get(&self.default_region))
            .cloned()
            .unwrap_or_default()
    }

    /// Effective region key: `location` if known, else the default.
    pub fn region_for(&self, metadata: &ProviderMetadata) -> String {
        match metadata.location.as_deref().map(normalize_region) {
            Some(loc) if self.accounts.contains_key(&loc) && self.projects.contains_key(&loc) => loc,
            Some(loc) => {
                tracing::warn!(
                    location = %loc,
                    default = %self.default_region,
                    "unknown region; falling back to default"
                );
                self.default_region.clone()
            }
            None => self.default_region.clone(),
        }
    }

    /// Reverse lookup of a region key from an accounts server URL.
    pub fn region_of_accounts_server(&self, server: &str) -> Option<String> {
        let server = trim_base(server);
        self.accounts
            .iter()
            .find(|(_, url)| url.eq_ignore_ascii_case(&server))
            .map(|(region, _)| region.clone())
    }
}

fn normalize_region(region: &str) -> String {
    match region.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
        "us" => "com".to_string(),
        other => other.to_string(),
    }
}

fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_selects_region_for_both_services() {
        let table = RegionTable::zoho("com");
        let meta = ProviderMetadata::with_location("eu");
        assert_eq!(table.resolve(Service::Accounts, &meta), "https://accounts.zoho.eu");
        assert_eq!(table.resolve(Service::Projects, &meta), "https://projectsapi.zoho.eu");
    }

    #[test]
    fn test_missing_or_unknown_location_uses_default() {
        let table = RegionTable::zoho("in");
        let none = ProviderMetadata::default();
        assert_eq!(table.resolve(Service::Accounts, &none), "https://accounts.zoho.in");
        let bogus = ProviderMetadata::with_location("mars");
        assert_eq!(table.resolve(Service::Projects, &bogus), "https://projectsapi.zoho.in");
    }

    #[test]
    fn test_us_is_an_alias_for_com() {
        let table = RegionTable::zoho("eu");
        let meta = ProviderMetadata::with_location("US");
        assert_eq!(table.resolve(Service::Accounts, &meta), "https://accounts.zoho.com");
    }

    #[test]
    fn test_known_override_beats_location() {
        let table = RegionTable::zoho("com");
        let meta = ProviderMetadata {
            location: Some("eu".into()),
            accounts_server: Some("https://accounts.zoho.jp/".into()),
            ..Default::default()
        };
        assert_eq!(table.resolve(Service::Accounts, &meta), "https://accounts.zoho.jp");
        // The accounts override does not leak into the projects service.
        assert_eq!(table.resolve(Service::Projects, &meta), "https://projectsapi.zoho.eu");
    }

    #[test]
    fn test_unknown_override_is_ignored() {
        let table = RegionTable::zoho("com");
        let meta = ProviderMetadata {
            location: Some("au".into()),
            accounts_server: Some("https://attacker.example".into()),
            ..Default::default()
        };
        assert_eq!(table.resolve(Service::Accounts, &meta), "https://accounts.zoho.com.au");
    }

    #[test]
    fn test_yaml_overlay() {
        let yaml = r#"
default_region: eu
accounts:
  eu: http://127.0.0.1:9000/
projects:
  eu: http://127.0.0.1:9001
"#;
        let table = RegionTable::from_yaml("com", yaml).unwrap();
        assert_eq!(table.default_region(), "eu");
        let none = ProviderMetadata::default();
        assert_eq!(table.resolve(Service::Accounts, &none), "http://127.0.0.1:9000");
        assert_eq!(table.resolve(Service::Projects, &none), "http://127.0.0.1:9001");
        // Untouched regions keep their built-in endpoints.
        let jp = ProviderMetadata::with_location("jp");
        assert_eq!(table.resolve(Service::Accounts, &jp), "https://accounts.zoho.jp");
    }

    #[test]
    fn test_default_region_must_exist() {
        assert!(RegionTable::from_yaml("com", "default_region: xx").is_err());
    }

    #[test]
    fn test_reverse_lookup() {
        let table = RegionTable::zoho("com");
        assert_eq!(
            table.region_of_accounts_server("https://accounts.zoho.eu"),
            Some("eu".to_string())
        );
        assert_eq!(table.region_of_accounts_server("https://example.com"), None);
    }
}
