use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, TimeDelta, Utc};

use super::client_identity::{ClientKey, RequestContext};
use crate::{
    cache::{CounterStore, StoreError, keys::rate_limit_key},
    config::{Config, RateLimitPolicy},
    error::AppError,
};

/// Result of checking one request against its quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted { count: u64, limit: u64 },
    /// The store could not be consulted and the limiter is configured to fail open.
    Bypassed,
}

/// Fixed-window limiter backed by a shared counter store.
///
/// Store failures reject the request with an internal error unless
/// `Config::fail_open` is set; failing closed keeps the quota from being
/// bypassed by taking the store down.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: Arc<Config>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub async fn check(&self, ctx: &RequestContext) -> Result<Decision, AppError> {
        let policy = self.config.policy(ctx.is_authenticated());
        let client_key = ClientKey::resolve(ctx)?;

        match self.count_hit(&client_key, policy).await {
            Ok(decision) => Ok(decision),
            Err(CheckError::Store(err)) if self.config.fail_open => {
                tracing::warn!(
                    "Counter store unavailable, admitting {} without a check: {}",
                    client_key,
                    err
                );
                Ok(Decision::Bypassed)
            }
            Err(CheckError::Store(err)) => Err(AppError::Internal(format!(
                "An error occurred when checking the request: {}",
                err
            ))),
            Err(CheckError::Rejected(err)) => Err(err),
        }
    }

    async fn count_hit(
        &self,
        client_key: &ClientKey,
        policy: RateLimitPolicy,
    ) -> Result<Decision, CheckError> {
        let key = rate_limit_key(&client_key.to_string());

        let count = {
            let store = self.store.clone();
            let key = key.clone();
            self.run_detached(async move { store.hit(&key, policy.window_secs).await })
                .await?
        };
        tracing::info!("Client {} - current value: {}", client_key, count);

        if count <= policy.limit {
            return Ok(Decision::Admitted {
                count,
                limit: policy.limit,
            });
        }

        // 第一次请求时剩余时间就是整个窗口
        let ttl = if count == 1 {
            policy.window_secs
        } else {
            let store = self.store.clone();
            // 计数已超限，查询 TTL 失败也不能放行
            match self.run_detached(async move { store.ttl(&key).await }).await {
                Ok(ttl) => ttl.unwrap_or(policy.window_secs),
                Err(err) => {
                    tracing::warn!("Failed to read TTL for {}: {}", client_key, err);
                    policy.window_secs
                }
            }
        };
        let retry_after_secs = ttl.min(policy.window_secs).max(1);
        let reset_at = reset_time(Utc::now(), retry_after_secs);

        Err(CheckError::Rejected(AppError::TooManyRequests {
            retry_after_secs,
            reset_at,
        }))
    }

    /// Runs a store round-trip on its own task so a dropped request cannot
    /// cancel an increment half way, and bounds the wait for it.
    async fn run_detached<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, tokio::spawn(op)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Task(join_err.to_string())),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

fn reset_time(now: DateTime<Utc>, retry_after_secs: u64) -> DateTime<Utc> {
    i64::try_from(retry_after_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

enum CheckError {
    Store(StoreError),
    Rejected(AppError),
}

impl From<StoreError> for CheckError {
    fn from(err: StoreError) -> Self {
        CheckError::Store(err)
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = RequestContext::from_parts(req.headers(), req.extensions());
    limiter.check(&ctx).await?;
    Ok(next.run(req).await)
}
