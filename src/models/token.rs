use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vault::mask_secret;

/// External OAuth2-issuing service a token record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Zoho,
    Google,
    Microsoft,
    Slack,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Zoho => "zoho",
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Slack => "slack",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zoho" => Ok(Provider::Zoho),
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            "slack" => Ok(Provider::Slack),
            other => anyhow::bail!("unknown provider: {}", other),
        }
    }
}

/// Provider-specific routing hints attached to a token.
///
/// `location` selects a regional endpoint set; `accounts_server` and
/// `api_domain` are explicit host overrides for the authorization and
/// resource services. Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_domain: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProviderMetadata {
    pub fn with_location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Rows written before metadata existed decode as empty metadata.
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Result of a code exchange or refresh grant, as reported by the provider.
#[derive(Clone)]
pub struct TokenPayload {
    pub access_token: String,
    /// Always present after a code exchange; a refresh may omit it, in which
    /// case the stored refresh token is kept.
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: String,
    /// Server-reported lifetime in seconds.
    pub expires_in: i64,
    /// Replacement metadata. `None` on refresh means "keep what is stored".
    pub metadata: Option<ProviderMetadata>,
}

impl TokenPayload {
    /// Absolute expiry for a token issued at `issued_at`. Fails instead of
    /// overflowing when the lifetime is out of range.
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| anyhow::anyhow!("token lifetime out of range: {}s", self.expires_in))
    }
}

impl fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_secret))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Decrypted view of the active token for a provider.
#[derive(Clone)]
pub struct TokenRecord {
    pub id: Uuid,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub metadata: ProviderMetadata,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// A token is stale once `now` enters the buffer before its expiry.
    pub fn is_stale(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now >= self.expires_at - buffer
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Secret-free summary served by the status endpoint and CLI.
#[derive(Debug, Serialize)]
pub struct TokenStatus {
    pub provider: Provider,
    pub active: bool,
    pub expired: bool,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
    pub scope: String,
    pub token_type: String,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}
