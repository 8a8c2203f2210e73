// HTTP surface tests: a real listener on an ephemeral port driven with reqwest

use fetchgate_core::config::ProxyConfig;
use fetchgate_core::{FetchProxy, IntelligenceRecorder, KvStore};
use fetchgate_fetcher::HttpFetcher;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "test-key-0123456789";

struct TestServer {
    base: String,
    _shutdown: oneshot::Sender<()>,
}

async fn spawn_server(config: ProxyConfig, config_path: Option<&std::path::Path>) -> TestServer {
    let recorder = IntelligenceRecorder::in_memory(&config.intelligence).unwrap();
    let mut proxy = FetchProxy::new(
        config,
        Arc::new(HttpFetcher::new().unwrap()),
        KvStore::memory(),
        recorder,
    );
    if let Some(path) = config_path {
        proxy = proxy.with_config_path(path);
    }
    let proxy = Arc::new(proxy);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        fetchgate_server::serve(proxy, listener, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });

    TestServer {
        base,
        _shutdown: tx,
    }
}

fn keyed_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.security.api_keys = vec![KEY.to_string()];
    config
}

async fn upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Open routes
// ============================================================================

#[tokio::test]
async fn test_root_and_health_need_no_auth() {
    let server = spawn_server(keyed_config(), None).await;
    let client = reqwest::Client::new();

    let root: Value = client
        .get(format!("{}/", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["service"], "fetchgate");
    assert_eq!(root["status"], "running");

    let health = client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["store"], "ok");
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_protected_routes_require_valid_key() {
    let server = spawn_server(keyed_config(), None).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{}/config", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .get(format!("{}/config", server.base))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = client
        .get(format!("{}/config", server.base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let config: Value = ok.json().await.unwrap();
    assert_eq!(config["security"]["api_keys"][0], "***REDACTED***");
}

#[tokio::test]
async fn test_no_keys_configured_disables_auth() {
    let server = spawn_server(ProxyConfig::default(), None).await;
    let response = reqwest::Client::new()
        .get(format!("{}/intelligence/list", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_rotating_tokens_share_limit_without_keys() {
    let upstream = upstream().await;
    let mut config = ProxyConfig::default();
    config.security.rate_limiting.requests_per_minute = 1;
    let server = spawn_server(config, None).await;
    let client = reqwest::Client::new();
    let payload = json!({ "url": format!("{}/page", upstream.uri()), "cache_enabled": false });

    let first = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth("made-up-token-1")
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth("made-up-token-2")
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 429);
}

// ============================================================================
// Fetch routes
// ============================================================================

#[tokio::test]
async fn test_fetch_then_cached() {
    let upstream = upstream().await;
    let server = spawn_server(keyed_config(), None).await;
    let client = reqwest::Client::new();
    let payload = json!({ "url": format!("{}/page", upstream.uri()) });

    let first: Value = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["status_code"], 200);
    assert_eq!(first["body"], "hello");
    assert_eq!(first["cached"], false);

    let second: Value = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["cached"], true);
}

#[tokio::test]
async fn test_blocked_domain_maps_to_403() {
    let mut config = keyed_config();
    config.security.blocked_domains = vec!["evil.test".to_string()];
    let server = spawn_server(config, None).await;

    let response = reqwest::Client::new()
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&json!({ "url": "http://evil.test/" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let blocked: Value = reqwest::Client::new()
        .get(format!("{}/blocked/requests", server.base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(blocked["total"], 1);
    assert_eq!(blocked["recent"][0]["reason"], "DOMAIN_BLOCKED");
}

#[tokio::test]
async fn test_invalid_request_is_400() {
    let server = spawn_server(keyed_config(), None).await;
    let client = reqwest::Client::new();

    let bad_url = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&json!({ "url": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_url.status(), 400);

    let bad_method = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&json!({ "url": "http://example.com/", "method": "TRACE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_method.status(), 400);

    let not_json = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .header("content-type", "application/json")
        .body("{")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), 400);
}

#[tokio::test]
async fn test_bulk_summary_without_bodies() {
    let upstream = upstream().await;
    let server = spawn_server(keyed_config(), None).await;

    let summary: Value = reqwest::Client::new()
        .post(format!("{}/fetch/bulk", server.base))
        .bearer_auth(KEY)
        .json(&json!({
            "urls": [format!("{}/a", upstream.uri()), format!("{}/b", upstream.uri())],
            "concurrent_limit": 2,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(summary["total"], 2);
    assert_eq!(summary["successful_count"], 2);
    assert_eq!(summary["failed_count"], 0);
    assert!(summary["results"][0].get("body").is_none());
    assert!(summary["results"][1]["url"].as_str().unwrap().ends_with("/b"));
}

// ============================================================================
// Intelligence, config and housekeeping
// ============================================================================

#[tokio::test]
async fn test_intelligence_list_limit() {
    let upstream = upstream().await;
    let server = spawn_server(keyed_config(), None).await;
    let client = reqwest::Client::new();

    for i in 0..3 {
        client
            .post(format!("{}/fetch", server.base))
            .bearer_auth(KEY)
            .json(&json!({ "url": format!("{}/{}", upstream.uri(), i) }))
            .send()
            .await
            .unwrap();
    }

    let listing: Value = client
        .get(format!("{}/intelligence/list?limit=2", server.base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total_records"], 3);
    assert_eq!(listing["records"].as_array().unwrap().len(), 2);
    assert!(listing["records"][0]["url"].as_str().unwrap().ends_with("/2"));

    let cleanup: Value = client
        .post(format!("{}/housekeeping/cleanup", server.base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleanup["status"], "completed");
    assert_eq!(cleanup["remaining_records"], 3);
}

#[tokio::test]
async fn test_config_reload_applies_and_rejects_bad_yaml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fetchgate.yaml");
    let config = keyed_config();
    config.save(&path).unwrap();

    let server = spawn_server(config.clone(), Some(&path)).await;
    let client = reqwest::Client::new();

    let mut updated = config.clone();
    updated.security.blocked_domains = vec!["newly-blocked.test".to_string()];
    updated.save(&path).unwrap();

    let reload = client
        .post(format!("{}/config/reload", server.base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(reload.status(), 200);

    let blocked = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&json!({ "url": "http://newly-blocked.test/" }))
        .send()
        .await
        .unwrap();
    assert_eq!(blocked.status(), 403);

    std::fs::write(&path, "proxy: [not, a, map").unwrap();
    let failed = client
        .post(format!("{}/config/reload", server.base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(failed.status(), 500);

    // Previous config still in force
    let still_blocked = client
        .post(format!("{}/fetch", server.base))
        .bearer_auth(KEY)
        .json(&json!({ "url": "http://newly-blocked.test/" }))
        .send()
        .await
        .unwrap();
    assert_eq!(still_blocked.status(), 403);
}
