// End-to-end tests for the fetch pipeline against a mock upstream

use fetchgate_core::config::ProxyConfig;
use fetchgate_core::{FetchProxy, IntelligenceRecorder, KvStore};
use fetchgate_fetcher::{BulkFetchRequest, FailureKind, FetchRequest, HttpFetcher};
use std::sync::Arc;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn build_proxy(config: ProxyConfig) -> Arc<FetchProxy> {
    let recorder = IntelligenceRecorder::in_memory(&config.intelligence).unwrap();
    Arc::new(FetchProxy::new(
        config,
        Arc::new(HttpFetcher::new().unwrap()),
        KvStore::memory(),
        recorder,
    ))
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_default_config_fetch_then_cache_hit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>example</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    let url = format!("{}/", server.uri());

    let first = proxy.fetch(FetchRequest::new(url.clone()), "client").await;
    assert!(first.succeeded);
    assert_eq!(first.status_code, 200);
    assert!(!first.cached);

    let second = proxy.fetch(FetchRequest::new(url.clone()), "client").await;
    assert!(second.succeeded);
    assert!(second.cached);
    assert_eq!(second.body, "<html>example</html>");
    assert_eq!(second.status_code, 200);
}

#[tokio::test]
async fn test_cache_disabled_per_request_goes_to_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(2)
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    let url = format!("{}/fresh", server.uri());

    for _ in 0..2 {
        let result = proxy
            .fetch(FetchRequest::new(url.clone()).with_cache(false), "client")
            .await;
        assert!(!result.cached);
    }
}

#[tokio::test]
async fn test_failed_status_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    let url = format!("{}/missing", server.uri());

    for _ in 0..2 {
        let result = proxy.fetch(FetchRequest::new(url.clone()), "client").await;
        assert!(!result.succeeded);
        assert!(!result.cached);
        assert_eq!(result.status_code, 404);
    }
}

// ============================================================================
// Policy and rate limiting
// ============================================================================

#[tokio::test]
async fn test_blocked_domain_returns_403_without_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = ProxyConfig::default();
    config.security.blocked_domains = vec!["127.0.0.1".to_string()];
    let proxy = build_proxy(config);

    let result = proxy
        .fetch(FetchRequest::new(format!("{}/secret", server.uri())), "client")
        .await;

    assert!(!result.succeeded);
    assert_eq!(result.status_code, 403);
    assert_eq!(result.failure, Some(FailureKind::PolicyViolation));

    let blocked = proxy.recorder().blocked(10).await.unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].reason, "DOMAIN_BLOCKED");
}

#[tokio::test]
async fn test_allow_list_refuses_other_hosts() {
    let mut config = ProxyConfig::default();
    config.security.allowed_domains = vec!["only-this.test".to_string()];
    let proxy = build_proxy(config);

    let result = proxy
        .fetch(FetchRequest::new("http://127.0.0.1:9/"), "client")
        .await;
    assert_eq!(result.status_code, 403);
}

#[tokio::test]
async fn test_rate_limit_rejects_cap_plus_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = ProxyConfig::default();
    config.security.rate_limiting.requests_per_minute = 3;
    config.security.rate_limiting.requests_per_hour = 3;
    let proxy = build_proxy(config);

    for i in 0..3 {
        let request = FetchRequest::new(format!("{}/{}", server.uri(), i)).with_cache(false);
        assert!(proxy.fetch(request, "client").await.succeeded);
    }

    let over = proxy
        .fetch(FetchRequest::new(format!("{}/over", server.uri())), "client")
        .await;
    assert_eq!(over.status_code, 429);
    assert_eq!(over.failure, Some(FailureKind::RateLimited));

    let blocked = proxy.recorder().blocked(10).await.unwrap();
    assert!(blocked.iter().any(|b| b.reason == "RATE_LIMIT"));
}

// ============================================================================
// Status codes and intelligence
// ============================================================================

#[tokio::test]
async fn test_allowed_status_codes_make_404_a_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    let request =
        FetchRequest::new(format!("{}/gone", server.uri())).with_allowed_status_codes(vec![404]);
    let result = proxy.fetch(request, "client").await;

    assert!(result.succeeded);
    assert_eq!(result.status_code, 404);
}

#[tokio::test]
async fn test_completed_fetches_are_recorded_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    for i in 0..4 {
        let request = FetchRequest::new(format!("{}/page/{}", server.uri(), i))
            .with_tags(vec!["batch".to_string()]);
        proxy.fetch(request, "client").await;
    }

    let records = proxy.recorder().list(3).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[0].url.ends_with("/page/3"));
    assert!(records[2].url.ends_with("/page/1"));
    assert_eq!(records[0].content_excerpt, "payload");
    assert_eq!(records[0].tags, vec!["batch".to_string()]);
}

#[tokio::test]
async fn test_outbound_request_carries_request_id_and_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("x-request-id"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    let result = proxy
        .fetch(FetchRequest::new(format!("{}/", server.uri())), "client")
        .await;
    assert!(result.succeeded);
}

#[tokio::test]
async fn test_connection_failure_is_logged_as_error() {
    let proxy = build_proxy(ProxyConfig::default());
    let result = proxy
        .fetch(FetchRequest::new("http://127.0.0.1:1/").with_timeout(2), "client")
        .await;

    assert!(!result.succeeded);
    assert!(result.is_failure());

    let blocked = proxy.recorder().blocked(10).await.unwrap();
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].reason == "ERROR" || blocked[0].reason == "TIMEOUT");
    assert!(proxy.recorder().list(10).await.unwrap().is_empty());
}

// ============================================================================
// Bulk and housekeeping
// ============================================================================

#[tokio::test]
async fn test_bulk_through_pipeline_preserves_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = ProxyConfig::default();
    config.security.blocked_domains = vec!["blocked.invalid".to_string()];
    let proxy = build_proxy(config);

    let urls = vec![
        format!("{}/a", server.uri()),
        "http://blocked.invalid/".to_string(),
        format!("{}/c", server.uri()),
    ];
    let results = proxy
        .bulk_fetch(BulkFetchRequest::new(urls.clone()), "client")
        .await;

    assert_eq!(results.len(), 3);
    for (result, url) in results.iter().zip(&urls) {
        assert_eq!(&result.url, url);
    }
    assert!(results[0].succeeded);
    assert_eq!(results[1].status_code, 403);
    assert!(results[2].succeeded);
}

#[tokio::test]
async fn test_housekeeping_trims_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let proxy = build_proxy(ProxyConfig::default());
    for i in 0..5 {
        proxy
            .fetch(FetchRequest::new(format!("{}/{}", server.uri(), i)), "client")
            .await;
    }

    let report = proxy.housekeeping(Some(2)).await.unwrap();
    assert_eq!(report.deleted_records, 3);
    assert_eq!(report.remaining_records, 2);
}

// ============================================================================
// Config reload
// ============================================================================

#[tokio::test]
async fn test_reload_of_missing_file_keeps_current_config() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fetchgate.yaml");

    let mut config = ProxyConfig::default();
    config.security.api_keys = vec!["secret-key-123".to_string()];
    config.security.blocked_domains = vec!["evil.com".to_string()];
    config.save(&config_path).unwrap();

    let recorder = IntelligenceRecorder::in_memory(&config.intelligence).unwrap();
    let proxy = FetchProxy::new(
        config,
        Arc::new(HttpFetcher::new().unwrap()),
        KvStore::memory(),
        recorder,
    )
    .with_config_path(config_path.clone());

    std::fs::remove_file(&config_path).unwrap();

    assert!(proxy.reload_config().await.is_err());
    assert_eq!(proxy.api_keys().await, vec!["secret-key-123".to_string()]);
    assert_eq!(
        proxy.config().await.security.blocked_domains,
        vec!["evil.com".to_string()]
    );
    assert!(!config_path.exists());
}
