use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::token::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, parse_expires_in};

/// 各类有效期的上限（约 100 年），超出的配置值按上限处理
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub store_backend: StoreBackend,
    pub store_timeout_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_prefix: String,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub jwt_expires_in: String,
    pub jwt_refresh_expires_in: String,
    pub bcrypt_cost: u32,
    pub max_login_attempts: i32,
    pub lockout_duration_secs: u64,
    pub reset_token_ttl_secs: u64,
    pub captcha_expire_secs: u64,
    pub captcha_sweep_interval_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: String::new(),
            redis_url: "redis://127.0.0.1/".into(),
            store_backend: StoreBackend::Postgres,
            store_timeout_secs: 5,
            server_host: "::".into(),
            server_port: 3000,
            api_prefix: "/api".into(),
            jwt_secret: "default-secret-key".into(),
            jwt_refresh_secret: "default-refresh-secret-key".into(),
            jwt_expires_in: "1h".into(),
            jwt_refresh_expires_in: "30d".into(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            max_login_attempts: 5,
            lockout_duration_secs: 15 * 60,
            reset_token_ttl_secs: 60 * 60,
            captcha_expire_secs: 300,
            captcha_sweep_interval_secs: 60,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
        }
    }
}

/// 读取可选环境变量，缺失或无法解析时使用默认值
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}, falling back to default", key);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let store_backend = env_or("STORE_BACKEND", defaults.store_backend);

        // 内存存储不需要数据库连接串
        let database_url = match store_backend {
            StoreBackend::Postgres => env::var("DATABASE_URL")?,
            StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using the built-in development secret");
            defaults.jwt_secret.clone()
        });
        let jwt_refresh_secret = env::var("JWT_REFRESH_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_REFRESH_SECRET not set, using the built-in development secret");
            defaults.jwt_refresh_secret.clone()
        });

        Ok(Config {
            database_url,
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            store_backend,
            store_timeout_secs: env_or("STORE_TIMEOUT_SECS", defaults.store_timeout_secs),
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            api_prefix: env::var("API_PREFIX").unwrap_or(defaults.api_prefix),
            jwt_secret,
            jwt_refresh_secret,
            jwt_expires_in: env::var("JWT_EXPIRES_IN").unwrap_or(defaults.jwt_expires_in),
            jwt_refresh_expires_in: env::var("JWT_REFRESH_EXPIRES_IN")
                .unwrap_or(defaults.jwt_refresh_expires_in),
            bcrypt_cost: env_or("BCRYPT_COST", defaults.bcrypt_cost),
            max_login_attempts: env_or("MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts),
            lockout_duration_secs: env_or("LOCKOUT_DURATION_SECS", defaults.lockout_duration_secs),
            reset_token_ttl_secs: env_or("RESET_TOKEN_TTL_SECS", defaults.reset_token_ttl_secs),
            captcha_expire_secs: env_or("CAPTCHA_EXPIRE_TIME", defaults.captcha_expire_secs),
            captcha_sweep_interval_secs: env_or(
                "CAPTCHA_SWEEP_INTERVAL_SECS",
                defaults.captcha_sweep_interval_secs,
            ),
            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW", defaults.rate_limit_window_secs),
            rate_limit_requests: env_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests),
        })
    }

    /// 访问令牌有效期（秒）
    pub fn access_token_ttl_secs(&self) -> u64 {
        parse_expires_in(&self.jwt_expires_in)
            .unwrap_or(DEFAULT_ACCESS_TTL_SECS)
            .min(MAX_DURATION_SECS)
    }

    /// 刷新令牌有效期（秒）
    pub fn refresh_token_ttl_secs(&self) -> u64 {
        parse_expires_in(&self.jwt_refresh_expires_in)
            .unwrap_or(DEFAULT_REFRESH_TTL_SECS)
            .min(MAX_DURATION_SECS)
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs.min(MAX_DURATION_SECS))
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_secs.min(MAX_DURATION_SECS))
    }

    pub fn captcha_ttl(&self) -> Duration {
        Duration::from_secs(self.captcha_expire_secs.min(MAX_DURATION_SECS))
    }

    pub fn captcha_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.captcha_sweep_interval_secs.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.access_token_ttl_secs(), 3600);
        assert_eq!(config.refresh_token_ttl_secs(), 30 * 24 * 3600);
        assert_eq!(config.max_login_attempts, 5);
        assert_eq!(config.lockout_duration(), Duration::from_secs(900));
        assert_eq!(config.captcha_ttl(), Duration::from_secs(300));
        assert_eq!(config.bcrypt_cost, 12);
    }

    #[test]
    fn oversized_durations_are_capped() {
        let config = Config {
            lockout_duration_secs: u64::MAX,
            reset_token_ttl_secs: u64::MAX,
            captcha_expire_secs: u64::MAX,
            jwt_expires_in: "99999999999d".into(),
            ..Config::default()
        };
        let cap = Duration::from_secs(MAX_DURATION_SECS);
        assert_eq!(config.lockout_duration(), cap);
        assert_eq!(config.reset_token_ttl(), cap);
        assert_eq!(config.captcha_ttl(), cap);
        assert_eq!(config.access_token_ttl_secs(), MAX_DURATION_SECS);

        // 上限内的时长可以安全地加到当前时间上
        assert!(std::time::Instant::now().checked_add(cap).is_some());
        let chrono_cap = chrono::Duration::from_std(cap).unwrap();
        assert!(chrono::Utc::now().checked_add_signed(chrono_cap).is_some());
    }

    #[test]
    fn unparseable_lifetimes_fall_back() {
        let config = Config {
            jwt_expires_in: "soon".into(),
            jwt_refresh_expires_in: "later".into(),
            ..Config::default()
        };
        assert_eq!(config.access_token_ttl_secs(), 3600);
        assert_eq!(config.refresh_token_ttl_secs(), 30 * 24 * 3600);
    }

    #[test]
    fn store_backend_parses() {
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("Postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("mongo".parse::<StoreBackend>().is_err());
    }
}
