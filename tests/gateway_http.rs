//! End-to-end admission control through a real listener and mock upstreams.

use std::sync::atomic::Ordering;

use admission_gateway::config::EndpointOverride;
use admission_gateway::resilience::CircuitState;
use reqwest::StatusCode;

mod common;
use common::{client, config_with, start_mock_backend, TestGateway};

fn header(res: &reqwest::Response, name: &str) -> Option<String> {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_sixth_request_is_rate_limited() {
    let (backend, calls) = start_mock_backend(200).await;
    let mut config = config_with(&[("users", "/api/users", backend)]);
    config.rate_limit.requests_per_minute = 5;
    let gateway = TestGateway::start(config).await;
    let client = client();

    for expected_remaining in (0..5).rev() {
        let res = client.get(gateway.url("/api/users/1")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "x-ratelimit-limit").as_deref(), Some("5"));
        assert_eq!(
            header(&res, "x-ratelimit-remaining"),
            Some(expected_remaining.to_string())
        );
        assert!(header(&res, "x-request-id").is_some());
    }

    let res = client.get(gateway.url("/api/users/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = header(&res, "retry-after").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["scope"], "global_minute");
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_circuit_opens_after_five_server_errors() {
    let (backend, calls) = start_mock_backend(500).await;
    let gateway = TestGateway::start(config_with(&[("orders", "/api/orders", backend)])).await;
    let client = client();

    for _ in 0..5 {
        let res = client.get(gateway.url("/api/orders")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(gateway.pipeline.breaker().state("orders"), CircuitState::Open);

    let res = client.get(gateway.url("/api/orders")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(header(&res, "retry-after").as_deref(), Some("30"));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");
    assert_eq!(body["group"], "orders");

    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_open_circuit_is_isolated_per_group() {
    let (failing, _) = start_mock_backend(503).await;
    let (healthy, _) = start_mock_backend(200).await;
    let gateway = TestGateway::start(config_with(&[
        ("orders", "/api/orders", failing),
        ("users", "/api/users", healthy),
    ]))
    .await;
    let client = client();

    for _ in 0..5 {
        client.get(gateway.url("/api/orders")).send().await.unwrap();
    }

    let denied = client.get(gateway.url("/api/orders")).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::SERVICE_UNAVAILABLE);
    let ok = client.get(gateway.url("/api/users")).send().await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_address_keys_are_isolated() {
    let (backend, _) = start_mock_backend(200).await;
    let mut config = config_with(&[("users", "/api/users", backend)]);
    config.rate_limit.requests_per_minute = 1;
    let gateway = TestGateway::start(config).await;
    let client = client();

    let send = |xff: &'static str| {
        client
            .get(gateway.url("/api/users"))
            .header("x-forwarded-for", xff)
            .send()
    };

    assert_eq!(send("192.168.1.100, 10.0.0.1").await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        send("192.168.1.100").await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send("192.168.1.101").await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_endpoint_override_applies_to_its_group_only() {
    let (backend, _) = start_mock_backend(200).await;
    let mut config = config_with(&[
        ("orders", "/api/orders", backend),
        ("users", "/api/users", backend),
    ]);
    config.rate_limit.endpoint_overrides.push(EndpointOverride {
        group_prefix: "/api/orders".into(),
        requests_per_minute: 2,
        requests_per_hour: 100,
    });
    let gateway = TestGateway::start(config).await;
    let client = client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/api/orders")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client.get(gateway.url("/api/orders")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["scope"], "endpoint_minute");

    let res = client.get(gateway.url("/api/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_bypasses_admission() {
    let mut config = config_with(&[]);
    config.rate_limit.requests_per_minute = 1;
    let gateway = TestGateway::start(config).await;
    let client = client();

    for _ in 0..10 {
        let res = client.get(gateway.url("/health")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(header(&res, "x-ratelimit-limit").is_none());
    }
    assert_eq!(gateway.pipeline.limiter().tracked_keys(), 0);
}

#[tokio::test]
async fn test_disabled_limiting_admits_everything() {
    let (backend, calls) = start_mock_backend(200).await;
    let mut config = config_with(&[("users", "/api/users", backend)]);
    config.rate_limit.enabled = false;
    config.rate_limit.requests_per_minute = 1;
    let gateway = TestGateway::start(config).await;
    let client = client();

    for _ in 0..20 {
        let res = client.get(gateway.url("/api/users")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(header(&res, "x-ratelimit-remaining").is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 20);
    assert_eq!(gateway.pipeline.limiter().tracked_keys(), 0);
}

#[tokio::test]
async fn test_unreachable_upstream_is_502_and_counts() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let gateway = TestGateway::start(config_with(&[("users", "/api/users", dead)])).await;
    let res = client().get(gateway.url("/api/users")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(gateway.pipeline.breaker().consecutive_failures("users"), 1);
}

#[tokio::test]
async fn test_unrouted_path_is_404() {
    let gateway = TestGateway::start(config_with(&[])).await;
    let res = client().get(gateway.url("/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
