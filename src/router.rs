use std::sync::Arc;

use axum::{Router, middleware, routing::any};

use crate::{
    cache::CounterStore,
    config::Config,
    middleware::{BasicAuthGate, RateLimiter, auth_middleware, log_errors, rate_limit},
    routes,
};

/// Builds the service: `/private` goes through the auth gate and then the
/// limiter, `/public` only through the limiter.
pub fn create_router(config: Arc<Config>, store: Arc<dyn CounterStore>) -> Router {
    let gate = Arc::new(BasicAuthGate::new(&config));
    if !gate.credential_is_decodable() {
        tracing::warn!("AUTH_TOKEN is not a base64 user:password pair, private routes will fail");
    }
    let limiter = Arc::new(RateLimiter::new(store, config));

    let private_routes = Router::new()
        .route("/private", any(routes::private))
        .route("/private/", any(routes::private))
        .route("/private/{*rest}", any(routes::private))
        // 后添加的 layer 先执行：先认证，再限流
        .layer(middleware::from_fn_with_state(limiter.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(gate, auth_middleware));

    let public_routes = Router::new()
        .route("/public", any(routes::public))
        .route("/public/", any(routes::public))
        .route("/public/{*rest}", any(routes::public))
        .layer(middleware::from_fn_with_state(limiter, rate_limit));

    let router = Router::new()
        .merge(private_routes)
        .merge(public_routes)
        .layer(middleware::from_fn(log_errors));

    // 开发模式下允许跨域
    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    router
}
