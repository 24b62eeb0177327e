//! End-to-end tests of the admission pipeline.
//!
//! Each test builds the real router (filter chain, handlers, upstream proxy)
//! and drives it with `tower::ServiceExt::oneshot`. Two loopback servers
//! stand in for the outside world:
//!
//! - an upstream that echoes the path and identity headers it received
//! - a token validation service accepting the token `good`
//!
//! Run with: `cargo test --test pipeline_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceExt;

use admission_gateway::auth::HttpTokenValidator;
use admission_gateway::config::parse_whitelist;
use admission_gateway::{AppState, Config, LocalCounterStore, build_router};

const CLIENT_IP: &str = "10.0.0.5";

/// Serve `router` on an ephemeral loopback port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Upstream echoing what it received.
async fn start_upstream(hits: Arc<AtomicUsize>) -> String {
    serve(Router::new().fallback(move |uri: Uri, headers: HeaderMap| {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            let header = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            Json(json!({
                "path": uri.path(),
                "query": uri.query(),
                "x-user-id": header("x-user-id"),
                "x-user-email": header("x-user-email"),
                "x-user-roles": header("x-user-roles"),
                "x-request-id": header("x-request-id"),
            }))
        }
    }))
    .await
}

/// Validation service: `good` is valid, anything else is not.
async fn start_auth_service(calls: Arc<AtomicUsize>) -> String {
    serve(Router::new().route(
        "/api/v1/auth/validate",
        post(move |Json(body): Json<Value>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if body["token"] == "good" {
                    Json(json!({
                        "isValid": true,
                        "userId": "u-42",
                        "email": "dev@example.com",
                        "roles": ["admin", "user"],
                    }))
                } else {
                    Json(json!({ "isValid": false }))
                }
            }
        }),
    ))
    .await
}

struct Harness {
    app: Router,
    state: AppState,
    upstream_hits: Arc<AtomicUsize>,
    auth_calls: Arc<AtomicUsize>,
}

impl Harness {
    async fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let upstream_hits = Arc::new(AtomicUsize::new(0));
        let auth_calls = Arc::new(AtomicUsize::new(0));
        let upstream_url = start_upstream(upstream_hits.clone()).await;
        let auth_url = start_auth_service(auth_calls.clone()).await;

        let mut config = Config {
            upstream_url,
            auth_service_url: format!("{auth_url}/api/v1/auth/validate"),
            auth_timeout: Duration::from_secs(2),
            auth_whitelist: parse_whitelist("/health,/fallback/**,/api/public/**").unwrap(),
            metrics_port: 0,
            ..Config::default()
        };
        configure(&mut config);

        let store = Arc::new(LocalCounterStore::new(config.rate_limit_window));
        let validator = Arc::new(
            HttpTokenValidator::new(config.auth_service_url.clone(), config.auth_timeout).unwrap(),
        );
        let state = AppState::with_parts(config, store, validator).unwrap();

        Self {
            app: build_router(state.clone()),
            state,
            upstream_hits,
            auth_calls,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn shutdown(self) {
        self.state.shutdown().await;
    }
}

fn request(path: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder()
        .uri(path)
        .header("x-forwarded-for", CLIENT_IP);
    match token {
        Some(token) => builder.header("authorization", format!("Bearer {token}")),
        None => builder,
    }
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    request(path, token).body(Body::empty()).unwrap()
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_hundred_and_first_request_is_rate_limited() {
    let harness = Harness::start(|_| {}).await;

    for i in 0..100 {
        let (status, _, _) = harness.send(get("/api/public/items", None)).await;
        assert_eq!(status, StatusCode::OK, "request {} should pass", i + 1);
    }

    let (status, headers, body) = harness.send(get("/api/public/items", None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, r#"{"message":"Rate limit exceeded","status":"429"}"#);
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    assert_eq!(headers.get("retry-after").unwrap(), "60");
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "100");
    assert_eq!(harness.upstream_hits.load(Ordering::SeqCst), 100);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_counter_resets_after_window() {
    let harness = Harness::start(|config| {
        config.rate_limit_max_requests = 1;
        config.rate_limit_window = Duration::from_millis(300);
    })
    .await;

    assert_eq!(harness.send(get("/health", None)).await.0, StatusCode::OK);
    assert_eq!(
        harness.send(get("/health", None)).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(harness.send(get("/health", None)).await.0, StatusCode::OK);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_excluded_subnet_is_never_limited() {
    let harness = Harness::start(|config| {
        config.rate_limit_max_requests = 2;
        config.rate_limit_exception_ips = vec!["10.0.0.0/24".to_string()];
    })
    .await;

    for _ in 0..10 {
        assert_eq!(harness.send(get("/health", None)).await.0, StatusCode::OK);
    }

    // Different /24 is still limited
    let other = || {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", "10.0.1.5")
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(harness.send(other()).await.0, StatusCode::OK);
    assert_eq!(harness.send(other()).await.0, StatusCode::OK);
    assert_eq!(harness.send(other()).await.0, StatusCode::TOO_MANY_REQUESTS);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_excluded_path_is_never_limited() {
    let harness = Harness::start(|config| {
        config.rate_limit_max_requests = 1;
        config.rate_limit_exception_paths = vec!["/api/public/**".to_string()];
    })
    .await;

    for _ in 0..5 {
        assert_eq!(
            harness.send(get("/api/public/a/b", None)).await.0,
            StatusCode::OK
        );
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_api_key_exclusion_by_header_and_query() {
    let harness = Harness::start(|config| {
        config.rate_limit_max_requests = 1;
        config.rate_limit_exception_api_keys = vec!["partner-key".to_string()];
    })
    .await;

    for _ in 0..3 {
        let req = request("/health", None)
            .header("x-api-key", "partner-key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(harness.send(req).await.0, StatusCode::OK);
        assert_eq!(
            harness.send(get("/health?api_key=partner-key", None)).await.0,
            StatusCode::OK
        );
    }

    // Wrong key counts normally
    let req = request("/health", None)
        .header("x-api-key", "guess")
        .body(Body::empty())
        .unwrap();
    assert_eq!(harness.send(req).await.0, StatusCode::OK);
    assert_eq!(
        harness.send(get("/health", None)).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_runs_before_auth() {
    let harness = Harness::start(|config| {
        config.rate_limit_max_requests = 1;
    })
    .await;

    assert_eq!(
        harness.send(get("/api/orders", Some("good"))).await.0,
        StatusCode::OK
    );

    // Over the limit: 429 even with a bad token, validation service untouched
    let (status, _, _) = harness.send(get("/api/orders", Some("bad"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(harness.auth_calls.load(Ordering::SeqCst), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_disabled_rate_limiting() {
    let harness = Harness::start(|config| {
        config.rate_limit_enabled = false;
        config.rate_limit_max_requests = 1;
    })
    .await;

    for _ in 0..5 {
        assert_eq!(harness.send(get("/health", None)).await.0, StatusCode::OK);
    }

    harness.shutdown().await;
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_missing_token_is_rejected_before_upstream() {
    let harness = Harness::start(|_| {}).await;

    let (status, headers, body) = harness.send(get("/api/orders", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        r#"{"message":"Missing or invalid Authorization header","status":"401"}"#
    );
    assert_eq!(headers.get("www-authenticate").unwrap(), "Bearer");
    assert_eq!(harness.upstream_hits.load(Ordering::SeqCst), 0);
    assert_eq!(harness.auth_calls.load(Ordering::SeqCst), 0);

    let req = request("/api/orders", None)
        .header("authorization", "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    assert_eq!(harness.send(req).await.0, StatusCode::UNAUTHORIZED);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_valid_token_forwards_identity() {
    let harness = Harness::start(|_| {}).await;

    let (status, _, body) = harness.send(get("/api/orders?page=2", Some("good"))).await;
    assert_eq!(status, StatusCode::OK);

    let echoed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(echoed["path"], "/api/orders");
    assert_eq!(echoed["query"], "page=2");
    assert_eq!(echoed["x-user-id"], "u-42");
    assert_eq!(echoed["x-user-email"], "dev@example.com");
    assert_eq!(echoed["x-user-roles"], "admin,user");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_invalid_token() {
    let harness = Harness::start(|_| {}).await;

    let (status, _, body) = harness.send(get("/api/orders", Some("expired"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, r#"{"message":"Invalid JWT token","status":"401"}"#);
    assert_eq!(harness.upstream_hits.load(Ordering::SeqCst), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_validation_service_down_fails_closed() {
    let harness = Harness::start(|config| {
        config.auth_service_url = "http://127.0.0.1:1/api/v1/auth/validate".to_string();
    })
    .await;

    let (status, _, body) = harness.send(get("/api/orders", Some("good"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, r#"{"message":"Authentication failed","status":"401"}"#);
    assert_eq!(harness.upstream_hits.load(Ordering::SeqCst), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_whitelisted_route_skips_auth_and_drops_forged_identity() {
    let harness = Harness::start(|_| {}).await;

    let req = request("/api/public/items", None)
        .header("x-user-id", "admin")
        .header("x-user-roles", "admin")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = harness.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.auth_calls.load(Ordering::SeqCst), 0);

    let echoed: Value = serde_json::from_str(&body).unwrap();
    assert!(echoed["x-user-id"].is_null());
    assert!(echoed["x-user-roles"].is_null());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_traversal_does_not_escape_whitelist() {
    let harness = Harness::start(|_| {}).await;

    let (status, _, _) = harness
        .send(get("/api/public/%2e%2e/admin", None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = harness
        .send(get("/api/public/..;/admin/users", None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    harness.shutdown().await;
}

// =============================================================================
// Routes and Correlation
// =============================================================================

#[tokio::test]
async fn test_request_id_is_generated_and_forwarded() {
    let harness = Harness::start(|_| {}).await;

    let (_, headers, body) = harness.send(get("/api/public/items", None)).await;
    let request_id = headers.get("x-request-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());

    let echoed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(echoed["x-request-id"], request_id);

    // Propagated when supplied, also on denials
    let req = request("/api/orders", None)
        .header("x-request-id", "trace-123")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = harness.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get("x-request-id").unwrap(), "trace-123");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::start(|_| {}).await;

    let (status, _, body) = harness.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);

    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["rate_limit_backend"], "local");
    assert_eq!(harness.upstream_hits.load(Ordering::SeqCst), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_fallback_general() {
    let harness = Harness::start(|_| {}).await;

    let (status, _, body) = harness.send(get("/fallback/general", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        r#"{"message":"Service is currently unavailable. Please try again later.","status":"503"}"#
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_upstream_down_returns_503() {
    let harness = Harness::start(|config| {
        config.upstream_url = "http://127.0.0.1:1".to_string();
    })
    .await;

    let (status, _, body) = harness.send(get("/api/public/items", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains(r#""status":"503""#));
    assert!(!body.contains("127.0.0.1"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_post_body_is_forwarded() {
    let harness = Harness::start(|_| {}).await;

    let req = request("/api/public/items", None)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"widget"}"#))
        .unwrap();
    let (status, _, body) = harness.send(req).await;
    assert_eq!(status, StatusCode::OK);

    let echoed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(echoed["path"], "/api/public/items");

    harness.shutdown().await;
}
