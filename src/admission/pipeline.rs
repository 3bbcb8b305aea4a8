//! The admission pipeline: classify, guard, forward, record, decorate.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;

use crate::clock::SharedClock;
use crate::config::GatewayConfig;
use crate::error::UpstreamError;
use crate::http::response;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{CircuitBreaker, CircuitPolicy};
use crate::routing::{Classification, GroupRouter, RequestClassifier, Route};
use crate::security::{Decision, RateLimitPolicy, RateLimiter};

/// Whether an upstream status counts against the circuit. Client errors are
/// the caller's problem, not the upstream's.
pub fn is_upstream_failure(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Composes the classifier, circuit breaker and rate limiter in front of an
/// upstream call.
#[derive(Debug)]
pub struct AdmissionPipeline {
    classifier: RequestClassifier,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    router: Arc<GroupRouter>,
    deadline: Duration,
}

impl AdmissionPipeline {
    pub fn new(
        classifier: RequestClassifier,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        router: Arc<GroupRouter>,
        deadline: Duration,
    ) -> Self {
        Self {
            classifier,
            breaker,
            limiter,
            router,
            deadline,
        }
    }

    /// Wire every engine from a validated configuration.
    pub fn from_config(config: &GatewayConfig, clock: SharedClock) -> Self {
        let router = Arc::new(GroupRouter::from_config(&config.upstreams));
        let classifier =
            RequestClassifier::new(&config.identity, &config.bypass_paths, router.clone());
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitPolicy::from(&config.circuit_breaker),
            clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            RateLimitPolicy::from_config(&config.rate_limit, &router),
            clock,
        ));

        Self::new(
            classifier,
            breaker,
            limiter,
            router,
            Duration::from_secs(config.timeouts.request_secs),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn router(&self) -> &Arc<GroupRouter> {
        &self.router
    }

    /// Run one request through admission control.
    ///
    /// `forward` performs the upstream call for the resolved route. It is
    /// only invoked when the request is admitted. If the returned future is
    /// dropped (client gone), the circuit records a failure.
    pub async fn handle<F, Fut>(
        &self,
        request: Request<Body>,
        peer: Option<SocketAddr>,
        forward: F,
    ) -> Response
    where
        F: FnOnce(Request<Body>, Option<Arc<Route>>) -> Fut,
        Fut: Future<Output = Result<Response, UpstreamError>>,
    {
        let start = Instant::now();
        let Classification { key, group, route } = self.classifier.classify(&request, peer);

        // 1. Bypass
        if group.is_bypass() {
            return match with_deadline(self.deadline, forward(request, route)).await {
                Ok(response) => response,
                Err(e) => response::upstream_error(&e),
            };
        }

        // 2. Circuit
        let permit = match self.breaker.acquire(group.as_str()) {
            Ok(permit) => permit,
            Err(open) => {
                tracing::warn!(group = %group, client = %key, "Circuit open, failing fast");
                metrics::record_circuit_rejected(group.as_str());
                metrics::record_request(group.as_str(), StatusCode::SERVICE_UNAVAILABLE.as_u16(), start);
                return response::circuit_open(&open);
            }
        };

        // 3. Quota
        let decision = match self.limiter.try_acquire(&key, &group) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(error = %e, client = %key, group = %group, "Rate limiter fault, admitting request uncounted");
                metrics::record_admission_fault("rate_limiter");
                Decision::unmetered()
            }
        };
        if !decision.allowed {
            permit.release();
            metrics::record_request(group.as_str(), StatusCode::TOO_MANY_REQUESTS.as_u16(), start);
            return response::rate_limited(&decision);
        }

        // 4. Upstream
        let mut response = match with_deadline(self.deadline, forward(request, route)).await {
            Ok(response) => {
                permit.record(!is_upstream_failure(response.status()));
                response
            }
            Err(e) => {
                tracing::warn!(group = %group, error = %e, "Upstream call failed");
                permit.record(false);
                response::upstream_error(&e)
            }
        };

        // 5. Decorate
        if let Some(quota) = &decision.quota {
            response::apply_quota_headers(response.headers_mut(), quota);
        }
        metrics::record_request(group.as_str(), response.status().as_u16(), start);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::UpstreamConfig;
    use crate::http::UpstreamForwarder;
    use crate::resilience::CircuitState;
    use crate::routing::RequestKey;
    use crate::security::{RateLimitError, RateLimitStore, ResolvedLimits};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(requests_per_minute: u32) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.upstreams.push(UpstreamConfig {
            group: "users".into(),
            path_prefix: "/api/users".into(),
            address: "127.0.0.1:3001".into(),
        });
        config.rate_limit.requests_per_minute = requests_per_minute;
        config
    }

    fn pipeline() -> AdmissionPipeline {
        AdmissionPipeline::from_config(&config(2), Arc::new(ManualClock::new()))
    }

    fn pipeline_with_clock() -> (AdmissionPipeline, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            AdmissionPipeline::from_config(&config(100), clock.clone()),
            clock,
        )
    }

    #[derive(Debug)]
    struct BrokenStore;

    impl RateLimitStore for BrokenStore {
        fn acquire(
            &self,
            _key: &RequestKey,
            _group: &Arc<str>,
            _limits: &ResolvedLimits,
            _now: std::time::Instant,
        ) -> Result<Decision, RateLimitError> {
            Err(RateLimitError::ClockOverflow)
        }

        fn tracked_keys(&self) -> usize {
            0
        }

        fn is_tracked(&self, _key: &RequestKey) -> bool {
            false
        }

        fn evict_idle(&self, _idle: Duration, _now: std::time::Instant) -> usize {
            0
        }
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.1:4000".parse().unwrap())
    }

    async fn reply(status: StatusCode) -> Result<Response, UpstreamError> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        Ok(response)
    }

    #[tokio::test]
    async fn test_rate_limited_request_does_not_reach_upstream() {
        let p = pipeline();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            p.handle(get("/api/users"), peer(), |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                reply(StatusCode::OK)
            })
            .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip_circuit() {
        let p = pipeline();
        for _ in 0..2 {
            let r = p
                .handle(get("/api/users"), peer(), |_, _| reply(StatusCode::NOT_FOUND))
                .await;
            assert_eq!(r.status(), StatusCode::NOT_FOUND);
        }
        assert_eq!(p.breaker().consecutive_failures("users"), 0);
    }

    #[tokio::test]
    async fn test_server_errors_pass_through_and_count() {
        let p = pipeline();
        let r = p
            .handle(get("/api/users"), peer(), |_, _| reply(StatusCode::BAD_GATEWAY))
            .await;
        assert_eq!(r.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(r.headers()[response::X_RATELIMIT_REMAINING], "1");
        assert_eq!(p.breaker().consecutive_failures("users"), 1);
    }

    #[tokio::test]
    async fn test_forward_error_without_route_answers_404_and_counts() {
        let p = pipeline();
        let r = p
            .handle(get("/api/users"), peer(), |_, _| async {
                Err(UpstreamError::NoRoute("test".into()))
            })
            .await;
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
        assert_eq!(p.breaker().consecutive_failures("users"), 1);
        assert_eq!(p.breaker().state("users"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_transport_error_answers_502_and_counts() {
        // Reserve a port, then free it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed = listener.local_addr().unwrap();
        drop(listener);

        let mut config = GatewayConfig::default();
        config.upstreams.push(UpstreamConfig {
            group: "users".into(),
            path_prefix: "/api/users".into(),
            address: closed.to_string(),
        });
        let p = AdmissionPipeline::from_config(&config, Arc::new(ManualClock::new()));
        let forwarder = UpstreamForwarder::new(&config.bypass_paths);

        let r = p
            .handle(get("/api/users/1"), peer(), |req, route| async move {
                forwarder.forward(req, route).await
            })
            .await;
        assert_eq!(r.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(p.breaker().consecutive_failures("users"), 1);
    }

    #[tokio::test]
    async fn test_slow_upstream_answers_504_and_counts() {
        let mut config = config(100);
        config.timeouts.request_secs = 1;
        let p = AdmissionPipeline::from_config(&config, Arc::new(ManualClock::new()));

        let r = p
            .handle(get("/api/users"), peer(), |_, _| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                reply(StatusCode::OK).await
            })
            .await;
        assert_eq!(r.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(p.breaker().consecutive_failures("users"), 1);
        assert!(r.headers().get(response::X_RATELIMIT_LIMIT).is_some());
    }

    #[tokio::test]
    async fn test_bypass_skips_both_engines() {
        let p = pipeline();
        for _ in 0..10 {
            let r = p
                .handle(get("/health"), peer(), |_, _| reply(StatusCode::OK))
                .await;
            assert_eq!(r.status(), StatusCode::OK);
            assert!(r.headers().get(response::X_RATELIMIT_LIMIT).is_none());
        }
        assert_eq!(p.limiter().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_fails_fast() {
        let (p, _) = pipeline_with_clock();
        let calls = AtomicUsize::new(0);
        let failing = |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            reply(StatusCode::INTERNAL_SERVER_ERROR)
        };

        for _ in 0..5 {
            let r = p.handle(get("/api/users"), peer(), failing).await;
            assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        let r = p.handle(get("/api/users"), peer(), failing).await;

        assert_eq!(r.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(r.headers()[axum::http::header::RETRY_AFTER], "30");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_consume_quota() {
        let (p, _) = pipeline_with_clock();
        for _ in 0..5 {
            p.breaker().record_outcome("users", false);
        }
        let key = RequestKey::address("10.0.0.1".parse().unwrap());

        p.handle(get("/api/users"), peer(), |_, _| reply(StatusCode::OK))
            .await;
        assert!(!p.limiter().is_tracked(&key));
    }

    #[tokio::test]
    async fn test_half_open_trial_recovers_circuit() {
        let (p, clock) = pipeline_with_clock();
        for _ in 0..5 {
            p.breaker().record_outcome("users", false);
        }
        clock.advance(Duration::from_secs(30));

        let r = p
            .handle(get("/api/users"), peer(), |_, _| reply(StatusCode::OK))
            .await;
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(p.breaker().state("users"), CircuitState::Closed);
        assert_eq!(p.breaker().consecutive_failures("users"), 0);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens_circuit() {
        let (p, clock) = pipeline_with_clock();
        for _ in 0..5 {
            p.breaker().record_outcome("users", false);
        }
        clock.advance(Duration::from_secs(31));

        p.handle(get("/api/users"), peer(), |_, _| {
            reply(StatusCode::SERVICE_UNAVAILABLE)
        })
        .await;
        assert_eq!(p.breaker().state("users"), CircuitState::Open);
        assert_eq!(p.breaker().retry_after("users"), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cancelled_call_counts_as_failure() {
        let (p, _) = pipeline_with_clock();
        let call = p.handle(get("/api/users"), peer(), |_, _| {
            std::future::pending::<Result<Response, UpstreamError>>()
        });

        let outcome = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert!(outcome.is_err());
        assert_eq!(p.breaker().consecutive_failures("users"), 1);
    }

    #[tokio::test]
    async fn test_limiter_fault_fails_open() {
        let config = config(1);
        let clock: SharedClock = Arc::new(ManualClock::new());
        let router = Arc::new(GroupRouter::from_config(&config.upstreams));
        let limiter = RateLimiter::with_store(
            RateLimitPolicy::from_config(&config.rate_limit, &router),
            Arc::new(BrokenStore),
            clock.clone(),
        );
        let p = AdmissionPipeline::new(
            RequestClassifier::new(&config.identity, &config.bypass_paths, router.clone()),
            Arc::new(CircuitBreaker::new(
                CircuitPolicy::from(&config.circuit_breaker),
                clock,
            )),
            Arc::new(limiter),
            router,
            Duration::from_secs(5),
        );

        for _ in 0..3 {
            let r = p
                .handle(get("/api/users"), peer(), |_, _| reply(StatusCode::OK))
                .await;
            assert_eq!(r.status(), StatusCode::OK);
            assert!(r.headers().get(response::X_RATELIMIT_LIMIT).is_none());
        }
    }

    #[tokio::test]
    async fn test_api_key_outranks_forwarded_address() {
        let p = pipeline();
        let with_key = |key: &str| {
            Request::builder()
                .uri("/api/users")
                .header("x-api-key", key)
                .header("x-forwarded-for", "192.168.1.100")
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            p.handle(with_key("alpha"), peer(), |_, _| reply(StatusCode::OK))
                .await;
        }
        let r = p
            .handle(with_key("beta"), peer(), |_, _| reply(StatusCode::OK))
            .await;
        assert_eq!(r.status(), StatusCode::OK);
        assert!(p.limiter().is_tracked(&RequestKey::api_key("alpha")));
        assert!(!p
            .limiter()
            .is_tracked(&RequestKey::address("192.168.1.100".parse().unwrap())));
    }
}
