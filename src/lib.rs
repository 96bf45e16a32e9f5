use std::sync::Arc;

use auth::{AuthService, CaptchaService, service::AuthSettings};
use config::Config;
use database::Stores;
use middleware::RateLimiter;
use services::{PermissionService, RoleService, UserService};
use utils::TokenCodec;

pub mod auth;
pub mod common;
pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub auth: AuthService,
    pub captcha: CaptchaService,
    pub roles: RoleService,
    pub permissions: PermissionService,
    pub users: UserService,
    /// 为 None 时不限流
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(
        config: Config,
        stores: Stores,
        captcha: CaptchaService,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        let auth = AuthService::new(
            stores.clone(),
            TokenCodec::from_config(&config),
            captcha.clone(),
            AuthSettings::from_config(&config),
        );
        let users = UserService::new(stores.clone(), config.bcrypt_cost);

        Self {
            config: Arc::new(config),
            roles: RoleService::new(stores.clone()),
            permissions: PermissionService::new(stores.clone()),
            users,
            stores,
            auth,
            captcha,
            rate_limiter,
        }
    }
}
