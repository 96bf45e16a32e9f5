use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use admin_backend::{
    AppState,
    auth::CaptchaService,
    config::{Config, StoreBackend},
    database::{MemoryStore, PgStore, Stores},
    middleware::RateLimiter,
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 选择存储后端
    let stores = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET application_name = 'admin_backend';")
                            .await?;
                        Ok(())
                    })
                })
                .connect(&config.database_url)
                .await
                .expect("Failed to connect to Postgres");
            Stores::new(Arc::new(PgStore::new(pool)), config.store_timeout())
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, data will not survive a restart");
            Stores::new(Arc::new(MemoryStore::new()), config.store_timeout())
        }
    };

    // 验证码会话表及其定时清理
    let shutdown = CancellationToken::new();
    let captcha = CaptchaService::in_memory(config.captcha_ttl());
    let sweeper = captcha.start_sweeper(config.captcha_sweep_interval(), shutdown.clone());

    // 设置限流器
    let rate_limiter = if config.rate_limit_requests > 0 {
        let redis_client =
            redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
        Some(Arc::new(RateLimiter::new(
            redis_client,
            Arc::new(config.clone()),
        )))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let state = AppState::new(config, stores, captcha, rate_limiter);
    let router = routes::build_router(state.clone());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    })
    .await
    .expect("Failed to start server");

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("Captcha sweeper ended abnormally: {}", e);
    }
}
