use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{
    config::Config,
    utils::{error_codes, error_to_api_response},
};

/// 基于 Redis INCR + EXPIRE 的固定窗口限流
#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

impl RateLimiter {
    pub fn new(redis: redis::Client, config: Arc<Config>) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.rate_limit_requests > 0
    }

    fn client_ip(req: &Request<Body>) -> String {
        let remote_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());

        req.headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                req.headers()
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .or(remote_ip.as_deref())
            .unwrap_or("unknown")
            .trim()
            .to_string()
    }

    /// 返回当前窗口内的计数
    async fn hit(&self, key: &str) -> redis::RedisResult<u64> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let count: u64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn
                .expire(key, self.config.rate_limit_window().as_secs() as i64)
                .await?;
        }
        Ok(count)
    }

    pub async fn check_rate_limit(self: Arc<Self>, req: Request<Body>, next: Next) -> Response {
        if !self.enabled() {
            return next.run(req).await;
        }

        let ip = Self::client_ip(&req);
        let key = format!("rate_limit:auth:{}", ip);

        let count = match self.hit(&key).await {
            Ok(count) => count,
            Err(e) => {
                // Redis 不可用时放行
                tracing::warn!("Rate limiter unavailable, allowing request: {}", e);
                return next.run(req).await;
            }
        };

        if count > self.config.rate_limit_requests as u64 {
            tracing::warn!("Rate limit exceeded for {}", ip);
            return (
                StatusCode::TOO_MANY_REQUESTS,
                error_to_api_response::<()>(
                    error_codes::RATE_LIMIT,
                    format!(
                        "请求过于频繁，请在{}秒后重试",
                        self.config.rate_limit_window().as_secs()
                    ),
                ),
            )
                .into_response();
        }

        next.run(req).await
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}
