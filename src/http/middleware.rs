//! Per-client admission middleware.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::ratelimit::{ClientKey, SharedRegistry};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Admit or reject a request based on its client's token bucket.
///
/// Installed with [`axum::middleware::from_fn_with_state`]. The client is
/// identified by the `ConnectInfo<SocketAddr>` extension that the server
/// attaches to every connection; a request without it shares the fallback
/// limiter. Admitted requests reach the inner handler untouched and its
/// response is returned verbatim.
pub async fn rate_limit(
    State(registry): State<SharedRegistry>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let key = ClientKey::identify(remote_addr.as_deref());

    let bucket = registry.get_or_create(&key);
    if !bucket.allow() {
        debug!(client = %key, "Rate limit exceeded");
        return too_many_requests();
    }

    info!(client = %key, "{} {}", request.method(), request.uri().path());
    next.run(request).await
}

/// The response sent to a throttled client.
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            error: "Too many requests",
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::router;
    use crate::ratelimit::{LimiterSettings, RegistryKind};
    use axum::body::Body;
    use axum::http::{header, Method};
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn client(ip: &str) -> SocketAddr {
        format!("{}:40000", ip).parse().unwrap()
    }

    fn request_from(addr: SocketAddr) -> Request {
        axum::http::Request::builder()
            .uri("/")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    fn anonymous_request() -> Request {
        axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request) -> (StatusCode, Option<String>, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    fn app_with(settings: LimiterSettings) -> (Router, SharedRegistry) {
        let registry = RegistryKind::Local.build(settings);
        (router(registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_burst_then_reject_then_refill() {
        let (app, _) = app_with(LimiterSettings::default());
        let a = client("198.51.100.1");

        for _ in 0..10 {
            let (status, _, _) = send(&app, request_from(a)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, content_type, body) = send(&app, request_from(a)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(body, r#"{"error":"Too many requests"}"#);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(send(&app, request_from(a)).await.0, StatusCode::OK);
        assert_eq!(send(&app, request_from(a)).await.0, StatusCode::OK);
        assert_eq!(
            send(&app, request_from(a)).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_other_client_admitted_while_one_is_throttled() {
        let (app, registry) = app_with(LimiterSettings::default());
        let a = client("198.51.100.1");
        let b = client("198.51.100.2");

        while send(&app, request_from(a)).await.0 == StatusCode::OK {}

        let (status, _, body) = send(&app, request_from(b)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"message":"Hello, World!"}"#);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_same_host_different_ports_share_a_limiter() {
        let (app, registry) = app_with(LimiterSettings {
            burst: 2,
            ..LimiterSettings::default()
        });

        let first: SocketAddr = "203.0.113.5:1111".parse().unwrap();
        let second: SocketAddr = "203.0.113.5:2222".parse().unwrap();

        assert_eq!(send(&app, request_from(first)).await.0, StatusCode::OK);
        assert_eq!(send(&app, request_from(second)).await.0, StatusCode::OK);
        assert_eq!(
            send(&app, request_from(first)).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_ipv6_client_is_identified() {
        let (app, registry) = app_with(LimiterSettings::default());
        let addr: SocketAddr = "[2001:db8::1]:8443".parse().unwrap();

        assert_eq!(send(&app, request_from(addr)).await.0, StatusCode::OK);

        let bucket = registry.get_or_create(&ClientKey::new("2001:db8::1"));
        assert!(bucket.tokens() < 10.0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_address_uses_fallback_limiter() {
        let (app, registry) = app_with(LimiterSettings::default());

        let (status, _, body) = send(&app, anonymous_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"message":"Hello, World!"}"#);

        // The fallback bucket was the one charged
        let fallback = registry.get_or_create(&ClientKey::fallback());
        assert!(fallback.tokens() < 10.0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unidentified_clients_share_one_limiter() {
        let (app, _) = app_with(LimiterSettings {
            burst: 1,
            ..LimiterSettings::default()
        });

        assert_eq!(send(&app, anonymous_request()).await.0, StatusCode::OK);
        assert_eq!(
            send(&app, anonymous_request()).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_method_and_path_pass_through() {
        let (app, _) = app_with(LimiterSettings::default());
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/some/nested/path?x=1")
            .extension(ConnectInfo(client("192.0.2.44")))
            .body(Body::empty())
            .unwrap();

        let (status, content_type, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(body, r#"{"message":"Hello, World!"}"#);
    }

    #[tokio::test]
    async fn test_rejected_request_does_not_reach_inner_handler() {
        let registry = RegistryKind::Local.build(LimiterSettings {
            burst: 1,
            ..LimiterSettings::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let app = Router::new()
            .fallback(move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NO_CONTENT
                }
            })
            .layer(axum::middleware::from_fn_with_state(registry, rate_limit));

        let a = client("192.0.2.1");
        assert_eq!(send(&app, request_from(a)).await.0, StatusCode::NO_CONTENT);
        assert_eq!(
            send(&app, request_from(a)).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_admit_at_most_burst() {
        for kind in [RegistryKind::Local, RegistryKind::Sharded] {
            let registry = kind.build(LimiterSettings {
                rate: 0.001,
                ..LimiterSettings::default()
            });
            let app = router(registry.clone());
            let a = client("198.51.100.77");

            let tasks: Vec<_> = (0..50)
                .map(|_| tokio::spawn(app.clone().oneshot(request_from(a))))
                .collect();
            let responses = futures::future::join_all(tasks).await;

            let admitted = responses
                .into_iter()
                .map(|r| r.unwrap().unwrap().status())
                .filter(|s| *s == StatusCode::OK)
                .count();
            assert_eq!(admitted, 10);

            let tokens = registry
                .get_or_create(&ClientKey::new("198.51.100.77"))
                .tokens();
            assert!((0.0..=10.0).contains(&tokens));
        }
    }

    #[test]
    fn test_too_many_requests_response() {
        let response = too_many_requests();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
