//! Token lifecycle against a mocked Zoho accounts server: staleness,
//! single-flight refresh, failure handling, region pinning and the
//! single-active-record invariant.

use broker::clock::Clock;
use broker::errors::AppError;
use broker::models::{Provider, ProviderMetadata};
use chrono::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

mod common;

fn refreshed(access: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

#[tokio::test]
async fn fresh_token_is_returned_without_refresh() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(refreshed("1000.unexpected"))
        .expect(0)
        .mount(&h.server)
        .await;

    h.seed("1000.original", "1000.refresh", ProviderMetadata::default()).await;
    h.clock.advance(Duration::seconds(100));

    let tokens = &h.state.tokens;
    assert_eq!(tokens.get_valid_token(Provider::Zoho).await.unwrap(), "1000.original");
    assert_eq!(tokens.get_valid_token(Provider::Zoho).await.unwrap(), "1000.original");
}

#[tokio::test]
async fn token_inside_buffer_is_refreshed_exactly_once() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1000.refresh"))
        .respond_with(refreshed("1000.rotated"))
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.original", "1000.refresh", ProviderMetadata::default()).await;
    h.clock.advance(Duration::seconds(3560));

    let tokens = &h.state.tokens;
    assert_eq!(tokens.get_valid_token(Provider::Zoho).await.unwrap(), "1000.rotated");
    // Now fresh again: no second refresh.
    assert_eq!(tokens.get_valid_token(Provider::Zoho).await.unwrap(), "1000.rotated");

    let record = tokens.store().get_active(Provider::Zoho).await.unwrap();
    assert_eq!(record.refresh_token, "1000.refresh");
    assert_eq!(record.expires_at, h.clock.now() + Duration::seconds(3600));
}

#[tokio::test]
async fn rejected_refresh_surfaces_message_and_keeps_record() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"message": "invalid_grant"})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.original", "1000.revoked", ProviderMetadata::default()).await;
    h.clock.advance(Duration::seconds(3600));

    let err = h.state.tokens.get_valid_token(Provider::Zoho).await.unwrap_err();
    match err {
        AppError::RefreshFailed(detail) => assert!(detail.contains("invalid_grant")),
        other => panic!("expected RefreshFailed, got {:?}", other),
    }
    assert_eq!(h.active_access_token().await, "1000.original");
    assert_eq!(h.state.metrics.refresh_count("zoho", "failure"), 1);
}

#[tokio::test]
async fn out_of_range_lifetime_fails_refresh_without_panicking() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "1000.x",
            "expires_in": i64::MAX
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.original", "1000.refresh", ProviderMetadata::default()).await;
    h.clock.advance(Duration::seconds(3600));

    let state = h.state.clone();
    let joined = tokio::spawn(async move { state.tokens.get_valid_token(Provider::Zoho).await }).await;
    let result = joined.expect("refresh task must not panic");
    assert!(matches!(result, Err(AppError::RefreshFailed(_))));
    assert_eq!(h.active_access_token().await, "1000.original");
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(refreshed("1000.shared").set_delay(std::time::Duration::from_millis(150)))
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.original", "1000.refresh", ProviderMetadata::default()).await;
    h.clock.advance(Duration::seconds(3560));

    let calls = (0..10).map(|_| {
        let state = h.state.clone();
        tokio::spawn(async move { state.tokens.get_valid_token(Provider::Zoho).await })
    });
    let results = futures::future::join_all(calls).await;

    for r in results {
        assert_eq!(r.unwrap().unwrap(), "1000.shared");
    }
    assert_eq!(h.state.metrics.refresh_count("zoho", "success"), 1);
    assert!(h.state.metrics.coalesced_count("zoho") >= 1);
}

#[tokio::test]
async fn eu_token_uses_eu_endpoints_for_refresh_and_resources() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/eu/oauth/v2/token"))
        .respond_with(refreshed("1000.eu.rotated"))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/eu/restapi/portals/"))
        .and(header("authorization", "Zoho-oauthtoken 1000.eu.rotated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"portals": []})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.eu", "1000.eu.refresh", ProviderMetadata::with_location("eu")).await;
    h.clock.advance(Duration::hours(1));

    let portals = h.state.projects.list_portals().await.unwrap();
    assert_eq!(portals["portals"], serde_json::json!([]));

    let record = h.state.tokens.store().get_active(Provider::Zoho).await.unwrap();
    assert_eq!(record.metadata.location.as_deref(), Some("eu"));
}

#[tokio::test]
async fn token_without_location_uses_default_region() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(refreshed("1000.com.rotated"))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restapi/portals/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"portals": [1]})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.com", "1000.com.refresh", ProviderMetadata::default()).await;
    h.clock.advance(Duration::hours(1));

    h.state.projects.list_portals().await.unwrap();
}

#[tokio::test]
async fn code_exchange_supersedes_previous_token() {
    let h = common::harness().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "1000.second",
            "refresh_token": "1000.second.refresh",
            "api_domain": "https://www.zohoapis.com",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.seed("1000.first", "1000.first.refresh", ProviderMetadata::default()).await;
    let record = h
        .state
        .tokens
        .authorize(Provider::Zoho, "1000.code", ProviderMetadata::default())
        .await
        .unwrap();

    assert_eq!(record.access_token, "1000.second");
    assert_eq!(record.scope, "ZohoProjects.portals.ALL,ZohoProjects.projects.ALL,ZohoProjects.activities.ALL");
    assert_eq!(h.state.tokens.store().count_active(Provider::Zoho).await.unwrap(), 1);
    assert_eq!(h.repo.len().await, 2);
    assert_eq!(h.active_access_token().await, "1000.second");
}

#[tokio::test]
async fn at_most_one_active_record_after_mixed_writes() {
    let h = common::harness().await;
    let store = h.state.tokens.store();

    for i in 0..5 {
        let access = format!("1000.access.{}", i);
        store
            .save(Provider::Zoho, &common::payload(&access, "r", ProviderMetadata::default()))
            .await
            .unwrap();
        let mut update = common::payload(&format!("{}.u", access), "r2", ProviderMetadata::default());
        update.metadata = None;
        store.update_access_token(Provider::Zoho, &update).await.unwrap();
        assert_eq!(store.count_active(Provider::Zoho).await.unwrap(), 1);
    }

    let saves = (0..8).map(|i| {
        let state = h.state.clone();
        tokio::spawn(async move {
            state
                .tokens
                .store()
                .save(
                    Provider::Zoho,
                    &common::payload(&format!("c{}", i), "r", ProviderMetadata::default()),
                )
                .await
        })
    });
    for r in futures::future::join_all(saves).await {
        r.unwrap().unwrap();
    }
    assert_eq!(store.count_active(Provider::Zoho).await.unwrap(), 1);
}

#[tokio::test]
async fn stored_secrets_roundtrip_and_are_sealed_at_rest() {
    use broker::store::TokenRepository;

    let h = common::harness().await;
    h.seed("1000.plain.access", "1000.plain.refresh", ProviderMetadata::default()).await;

    let record = h.state.tokens.store().get_active(Provider::Zoho).await.unwrap();
    assert_eq!(record.access_token, "1000.plain.access");
    assert_eq!(record.refresh_token, "1000.plain.refresh");

    let row = h.repo.find_active("zoho").await.unwrap().unwrap();
    assert!(!row.access_token_enc.contains("1000.plain"));
    assert!(!row.refresh_token_enc.contains("1000.plain"));
}

#[tokio::test]
async fn deactivated_token_is_not_served() {
    let h = common::harness().await;
    h.seed("1000.a", "1000.r", ProviderMetadata::default()).await;
    h.state.tokens.deactivate(Provider::Zoho).await.unwrap();

    assert!(matches!(
        h.state.tokens.get_valid_token(Provider::Zoho).await,
        Err(AppError::NoActiveToken { .. })
    ));
}
