pub mod region;
pub mod zoho;

use async_trait::async_trait;
use url::Url;

use crate::errors::AppResult;
use crate::models::{Provider, ProviderMetadata, TokenPayload};

pub use region::{RegionTable, Service};
pub use zoho::ZohoProvider;

/// Authorization-code and refresh grants for one external provider.
///
/// Every method that talks to the provider resolves its endpoint from the
/// token's metadata, so a token always goes back to the region that issued it.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Consent URL requesting offline access and explicit consent.
    fn authorization_url(&self, metadata: &ProviderMetadata) -> AppResult<Url>;

    /// Trades an authorization code for the first token pair. The returned
    /// payload's metadata is what later refreshes and resource calls use.
    async fn exchange_code(&self, code: &str, metadata: ProviderMetadata) -> AppResult<TokenPayload>;

    /// Refresh grant. Fails with `RefreshFailed` on any rejection.
    async fn refresh(&self, refresh_token: &str, metadata: &ProviderMetadata) -> AppResult<TokenPayload>;

    /// Base URL of the resource service for a token with this metadata.
    fn resource_base(&self, metadata: &ProviderMetadata) -> String;
}
