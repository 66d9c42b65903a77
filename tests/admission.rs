//! End-to-end checks of the private/public pipelines against the in-memory
//! counter store, plus fail-closed behaviour against an unreachable redis.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    response::Response,
};
use gatekeeper::{
    cache::{CounterStore, InMemoryCounterStore, RedisCounterStore},
    config::Config,
    create_router,
};
use tower::ServiceExt;

// "alice:wonderland"
const TOKEN: &str = "YWxpY2U6d29uZGVybGFuZA==";

fn config(by_token: u64, by_ip: u64, window: u64) -> Config {
    Config {
        redis_url: "redis://127.0.0.1:1/".into(),
        auth_token: TOKEN.into(),
        rate_limit_by_token: by_token,
        rate_limit_by_ip: by_ip,
        window_size_secs: window,
        server_host: "127.0.0.1".into(),
        server_port: 0,
        fail_open: false,
        store_timeout_ms: 1000,
    }
}

fn app(config: Config) -> (Router, Arc<InMemoryCounterStore>) {
    let store = Arc::new(InMemoryCounterStore::new());
    (create_router(Arc::new(config), store.clone()), store)
}

fn request(uri: &str, peer: &str) -> axum::http::request::Builder {
    let addr: SocketAddr = peer.parse().unwrap();
    Request::builder()
        .uri(uri)
        .extension(ConnectInfo(addr))
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), 4096).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn private_route_requires_credential() {
    let (app, _) = app(config(200, 100, 3600));

    let ok = send(
        &app,
        request("/private", "10.0.0.1:5000")
            .header(header::AUTHORIZATION, format!("Basic {}", TOKEN))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json(ok).await["message"], "Response from private endpoint");

    let denied = send(
        &app,
        request("/private", "10.0.0.1:5000").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json(denied).await["errorMessage"],
        "Unauthorized. Check your basic authentication"
    );
}

#[tokio::test]
async fn unauthorized_requests_are_not_counted() {
    let (app, store) = app(config(200, 100, 3600));

    for _ in 0..3 {
        let response = send(
            &app,
            request("/private/anything", "10.0.0.1:5000")
                .header(header::AUTHORIZATION, "Basic d3Jvbmc6d3Jvbmc=")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(store.active_keys().await, 0);
}

#[tokio::test]
async fn public_route_serves_any_method_and_subpath() {
    let (app, store) = app(config(200, 100, 3600));

    for (method, uri) in [("GET", "/public"), ("GET", "/public/"), ("POST", "/public/nested/path")] {
        let response = send(
            &app,
            request(uri, "10.0.0.1:5000")
                .method(method)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "{} {}", method, uri);
        assert_eq!(json(response).await["message"], "Response from public endpoint");
    }
    assert_eq!(store.count("rate_limit:ip:10.0.0.1").await.unwrap(), Some(3));

    let private = send(
        &app,
        request("/private/", "10.0.0.1:5000")
            .header(header::AUTHORIZATION, format!("Basic {}", TOKEN))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(private.status(), StatusCode::OK);
    assert_eq!(json(private).await["message"], "Response from private endpoint");

    let denied = send(
        &app,
        request("/private/", "10.0.0.1:5000").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(start_paused = true)]
async fn anonymous_window_rejects_then_resets() {
    let (app, store) = app(config(200, 2, 60));
    let public = || {
        request("/public", "127.0.0.1:4000")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(send(&app, public()).await.status(), StatusCode::OK);
    assert_eq!(send(&app, public()).await.status(), StatusCode::OK);

    tokio::time::advance(Duration::from_secs(30)).await;
    let limited = send(&app, public()).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    let message = json(limited).await["errorMessage"].as_str().unwrap().to_string();
    assert!(message.starts_with(&format!("Too many requests. Try again after {} seconds", retry_after)));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(send(&app, public()).await.status(), StatusCode::OK);
    assert_eq!(store.count("rate_limit:ip:10.0.0.1").await.unwrap(), Some(1));
}

#[tokio::test]
async fn authenticated_and_anonymous_counters_are_separate() {
    let (app, store) = app(config(1, 1, 60));

    let auth = send(
        &app,
        request("/private", "10.0.0.1:5000")
            .header(header::AUTHORIZATION, format!("Basic {}", TOKEN))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(auth.status(), StatusCode::OK);

    // 认证用户的计数不影响同一 IP 的匿名请求
    let anon = send(
        &app,
        request("/public", "10.0.0.1:5000").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(anon.status(), StatusCode::OK);

    assert_eq!(store.count("rate_limit:user:alice").await.unwrap(), Some(1));
    assert_eq!(store.count("rate_limit:ip:10.0.0.1").await.unwrap(), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_authenticated_requests_are_all_counted() {
    let (app, store) = app(config(200, 100, 3600));

    let tasks = (0..100).map(|i| {
        let app = app.clone();
        tokio::spawn(async move {
            let req = request("/private", &format!("10.0.{}.{}:5000", i / 50, i % 50))
                .header(header::AUTHORIZATION, format!("Basic {}", TOKEN))
                .body(Body::empty())
                .unwrap();
            app.oneshot(req).await.unwrap().status()
        })
    });

    for status in futures_util::future::join_all(tasks).await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }
    assert_eq!(store.count("rate_limit:user:alice").await.unwrap(), Some(100));
}

#[tokio::test]
async fn unreachable_store_never_admits() {
    let store = Arc::new(RedisCounterStore::open("redis://127.0.0.1:1/").unwrap());
    let app = create_router(Arc::new(config(200, 100, 60)), store);

    for uri in ["/public", "/private"] {
        let response = send(
            &app,
            request(uri, "10.0.0.1:5000")
                .header(header::AUTHORIZATION, format!("Basic {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let message = json(response).await["errorMessage"].as_str().unwrap().to_string();
        assert!(message.starts_with("An error occurred when checking the request"));
        assert!(!message.contains(TOKEN));
    }
}

#[tokio::test]
async fn unreachable_store_admits_when_fail_open() {
    let store = Arc::new(RedisCounterStore::open("redis://127.0.0.1:1/").unwrap());
    let mut config = config(200, 100, 60);
    config.fail_open = true;
    let app = create_router(Arc::new(config), store);

    let response = send(
        &app,
        request("/public", "10.0.0.1:5000").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_without_any_address_is_internal() {
    let (app, store) = app(config(200, 100, 60));

    let response = send(
        &app,
        Request::builder().uri("/public").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.active_keys().await, 0);
}
