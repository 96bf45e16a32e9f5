//! 认证服务
//!
//! 密码哈希在这里显式完成后才交给存储层，存储层只会见到哈希值。

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{Rng, distributions::Alphanumeric};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::captcha::CaptchaService;
use super::identity::{Identity, UserView};
use crate::config::Config;
use crate::database::{NewUser, Stores, UserChanges, UserEntity, UserStatus, with_timeout};
use crate::error::AppError;
use crate::utils::token::TokenSubject;
use crate::utils::{TokenCodec, TokenKind, TokenPair, hash_password_blocking, verify_password_blocking};

const RESET_TOKEN_LENGTH: usize = 48;

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,50}$").expect("static regex"));
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));
static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9\-]{6,20}$").expect("static regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    pub username: String,
    pub password: String,
    pub captcha_session_id: String,
    #[serde(alias = "captcha")]
    pub captcha_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserView,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub captcha_session_id: String,
    #[serde(alias = "captcha")]
    pub captcha_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordInput {
    pub token: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

/// 登录与密码策略相关的参数
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub bcrypt_cost: u32,
    pub max_login_attempts: i32,
    pub lockout_duration: ChronoDuration,
    pub reset_token_ttl: ChronoDuration,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bcrypt_cost: config.bcrypt_cost,
            max_login_attempts: config.max_login_attempts.max(1),
            lockout_duration: ChronoDuration::from_std(config.lockout_duration())
                .unwrap_or(ChronoDuration::minutes(15)),
            reset_token_ttl: ChronoDuration::from_std(config.reset_token_ttl())
                .unwrap_or(ChronoDuration::hours(1)),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    stores: Stores,
    codec: TokenCodec,
    captcha: CaptchaService,
    settings: Arc<AuthSettings>,
}

/// 重置令牌只以 SHA-256 摘要落库
pub fn reset_token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        out.push_str(&format!("{:02x}", b));
        out
    })
}

fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// 6-128 位，至少包含一个小写字母、一个大写字母和一个数字
pub(crate) fn validate_password_policy(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if !(6..=128).contains(&len) {
        return Err(AppError::Validation("密码长度必须在6-128个字符之间".into()));
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(AppError::Validation(
            "密码必须包含至少一个小写字母、一个大写字母和一个数字".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_username(username: &str) -> Result<(), AppError> {
    if !USERNAME_PATTERN.is_match(username) {
        return Err(AppError::Validation(
            "用户名只能包含字母、数字和下划线，长度3-50个字符".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), AppError> {
    if email.len() > 100 || !EMAIL_PATTERN.is_match(email) {
        return Err(AppError::Validation("请输入有效的邮箱地址".into()));
    }
    Ok(())
}

/// 空字符串视为未填写
pub(crate) fn validate_phone(phone: Option<&str>) -> Result<(), AppError> {
    match phone.filter(|p| !p.is_empty()) {
        Some(phone) if !PHONE_PATTERN.is_match(phone) => {
            Err(AppError::Validation("请输入有效的手机号码".into()))
        }
        _ => Ok(()),
    }
}

fn validate_registration(input: &RegisterInput) -> Result<(), AppError> {
    validate_username(&input.username)?;
    validate_email(&input.email)?;
    validate_password_policy(&input.password)?;
    validate_phone(input.phone.as_deref())
}

impl AuthService {
    pub fn new(
        stores: Stores,
        codec: TokenCodec,
        captcha: CaptchaService,
        settings: AuthSettings,
    ) -> Self {
        Self {
            stores,
            codec,
            captcha,
            settings: Arc::new(settings),
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    fn check_captcha(&self, session_id: &str, code: &str) -> Result<(), AppError> {
        let verdict = self.captcha.verify(session_id, code);
        if verdict.valid {
            Ok(())
        } else {
            Err(AppError::InvalidCaptcha(verdict.message))
        }
    }

    async fn find_user(&self, id: i64) -> Result<Option<UserEntity>, AppError> {
        let user = with_timeout(self.stores.timeout, self.stores.credentials.find_user_by_id(id)).await?;
        Ok(user)
    }

    /// 加载用户及其角色、权限
    pub async fn load_identity(&self, user: UserEntity) -> Result<Identity, AppError> {
        let roles = with_timeout(self.stores.timeout, self.stores.rbac.roles_for_user(user.id)).await?;
        Ok(Identity::new(user, roles))
    }

    fn issue_tokens(&self, user: &UserEntity) -> Result<TokenPair, AppError> {
        let subject = TokenSubject {
            id: user.id,
            username: &user.username,
            email: &user.email,
        };
        Ok(self.codec.issue_pair(&subject)?)
    }

    pub async fn login(&self, input: LoginInput) -> Result<LoginOutcome, AppError> {
        self.check_captcha(&input.captcha_session_id, &input.captcha_code)?;

        let timeout = self.stores.timeout;
        let user = with_timeout(
            timeout,
            self.stores
                .credentials
                .find_user_by_username_or_email(&input.username),
        )
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        if !user.is_active() {
            tracing::warn!("Login rejected for disabled account {}", user.id);
            return Err(AppError::AccountDisabled);
        }

        let now = Utc::now();
        // 锁定期内不校验密码，也不累加失败次数
        if user.is_locked(now) {
            tracing::warn!("Login rejected for locked account {}", user.id);
            return Err(AppError::InvalidCredentials);
        }

        if !verify_password_blocking(&input.password, &user.password_hash).await? {
            let lock_until = now + self.settings.lockout_duration;
            let attempts = with_timeout(
                timeout,
                self.stores.credentials.record_login_failure(
                    user.id,
                    self.settings.max_login_attempts,
                    lock_until,
                    now,
                ),
            )
            .await?;
            tracing::warn!(
                "Failed login for user {} (attempt {})",
                user.id,
                attempts.login_attempts
            );
            if attempts.locked_until.is_some() {
                tracing::warn!("Account {} locked until {}", user.id, lock_until);
            }
            return Err(AppError::InvalidCredentials);
        }

        with_timeout(timeout, self.stores.credentials.record_login_success(user.id, now)).await?;
        tracing::info!("User {} logged in", user.id);

        let tokens = self.issue_tokens(&user)?;
        let identity = self.load_identity(user).await?;
        Ok(LoginOutcome {
            tokens,
            user: identity.view(),
        })
    }

    pub async fn register(&self, input: RegisterInput) -> Result<RegisteredUser, AppError> {
        self.check_captcha(&input.captcha_session_id, &input.captcha_code)?;
        validate_registration(&input)?;

        if input.password != input.confirm_password {
            return Err(AppError::Validation("密码和确认密码不匹配".into()));
        }

        let timeout = self.stores.timeout;
        let credentials = &self.stores.credentials;
        if with_timeout(timeout, credentials.find_user_by_username(&input.username))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("用户名已存在".into()));
        }
        if with_timeout(timeout, credentials.find_user_by_email(&input.email))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("邮箱已存在".into()));
        }

        let password_hash = hash_password_blocking(&input.password, self.settings.bcrypt_cost).await?;
        let full_name = input
            .full_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| input.username.clone());

        let created = with_timeout(
            timeout,
            credentials.create_user(NewUser {
                username: input.username,
                email: input.email,
                password_hash,
                full_name: Some(full_name),
                phone: input.phone.filter(|p| !p.is_empty()),
                avatar: None,
                status: UserStatus::Active,
            }),
        )
        .await?;

        tracing::info!("Registered user {} ({})", created.username, created.id);
        Ok(RegisteredUser {
            id: created.id,
            username: created.username,
            email: created.email,
            full_name: created.full_name,
            created_at: created.created_at,
        })
    }

    /// 旧的刷新令牌不会失效
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|e| {
                tracing::debug!("Refresh token rejected: {}", e);
                AppError::Unauthorized("无效的刷新令牌".into())
            })?;

        let user = self
            .find_user(claims.sub)
            .await?
            .filter(UserEntity::is_active)
            .ok_or_else(|| AppError::Unauthorized("用户不存在或已被禁用".into()))?;

        self.issue_tokens(&user)
    }

    /// 校验访问令牌并加载调用者身份
    pub async fn authenticate(&self, access_token: &str) -> Result<Identity, AppError> {
        let claims = self
            .codec
            .verify(access_token, TokenKind::Access)
            .inspect_err(|e| tracing::debug!("Access token rejected: {}", e))?;

        let user = self
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("用户不存在".into()))?;
        if !user.is_active() {
            return Err(AppError::Unauthorized("用户账号已被禁用".into()));
        }

        with_timeout(
            self.stores.timeout,
            self.stores.credentials.update_user(
                user.id,
                UserChanges {
                    last_active_at: Some(Utc::now()),
                    ..UserChanges::default()
                },
            ),
        )
        .await?;

        self.load_identity(user).await
    }

    pub async fn profile(&self, user_id: i64) -> Result<UserView, AppError> {
        let user = self
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("用户不存在".into()))?;
        Ok(self.load_identity(user).await?.view())
    }

    /// 没有服务端吊销列表，仅记录日志
    pub fn logout(&self, identity: &Identity) {
        tracing::info!("User {} logged out", identity.id());
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        input: ChangePasswordInput,
    ) -> Result<(), AppError> {
        if input.new_password != input.confirm_new_password {
            return Err(AppError::Validation("新密码和确认密码不匹配".into()));
        }
        validate_password_policy(&input.new_password)?;

        let user = self
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("用户不存在".into()))?;

        if !verify_password_blocking(&input.current_password, &user.password_hash).await? {
            return Err(AppError::WrongCurrentPassword);
        }

        let password_hash =
            hash_password_blocking(&input.new_password, self.settings.bcrypt_cost).await?;
        with_timeout(
            self.stores.timeout,
            self.stores.credentials.update_user(
                user.id,
                UserChanges {
                    password_hash: Some(password_hash),
                    password_changed_at: Some(Utc::now()),
                    ..UserChanges::default()
                },
            ),
        )
        .await?;

        tracing::info!("User {} changed password", user.id);
        Ok(())
    }

    /// 对调用方总是成功；邮箱存在时返回原始令牌交给邮件投递
    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>, AppError> {
        let timeout = self.stores.timeout;
        let Some(user) = with_timeout(timeout, self.stores.credentials.find_user_by_email(email)).await?
        else {
            return Ok(None);
        };

        let token = generate_reset_token();
        let expires = Utc::now() + self.settings.reset_token_ttl;
        with_timeout(
            timeout,
            self.stores.credentials.update_user(
                user.id,
                UserChanges {
                    password_reset_token: Some(Some(reset_token_digest(&token))),
                    password_reset_expires: Some(Some(expires)),
                    ..UserChanges::default()
                },
            ),
        )
        .await?;

        // 尚未接入邮件投递，令牌只写入 debug 日志
        tracing::debug!("Issued password reset token for user {}: {}", user.id, token);
        Ok(Some(token))
    }

    pub async fn reset_password(&self, input: ResetPasswordInput) -> Result<(), AppError> {
        if input.new_password != input.confirm_new_password {
            return Err(AppError::Validation("新密码和确认密码不匹配".into()));
        }
        validate_password_policy(&input.new_password)?;

        let timeout = self.stores.timeout;
        let digest = reset_token_digest(input.token.trim());
        let user = with_timeout(timeout, self.stores.credentials.find_user_by_reset_token(&digest))
            .await?
            .filter(|u| u.password_reset_expires.is_some_and(|at| at >= Utc::now()))
            .ok_or(AppError::InvalidOrExpiredToken)?;

        let password_hash =
            hash_password_blocking(&input.new_password, self.settings.bcrypt_cost).await?;
        with_timeout(
            timeout,
            self.stores.credentials.update_user(
                user.id,
                UserChanges {
                    password_hash: Some(password_hash),
                    password_changed_at: Some(Utc::now()),
                    password_reset_token: Some(None),
                    password_reset_expires: Some(None),
                    ..UserChanges::default()
                },
            ),
        )
        .await?;

        tracing::info!("User {} reset password", user.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::database::{CredentialStore, MemoryStore, NewRole, RbacStore};
    use crate::utils::hash_password;

    const PASSWORD: &str = "Secret123";

    struct Harness {
        store: Arc<MemoryStore>,
        service: AuthService,
        captcha: CaptchaService,
    }

    fn harness() -> Harness {
        let config = Config {
            bcrypt_cost: 4,
            ..Config::default()
        };
        let store = Arc::new(MemoryStore::new());
        let captcha = CaptchaService::in_memory(Duration::from_secs(300));
        let service = AuthService::new(
            Stores::new(store.clone(), Duration::from_secs(5)),
            TokenCodec::from_config(&config),
            captcha.clone(),
            AuthSettings::from_config(&config),
        );
        Harness {
            store,
            service,
            captcha,
        }
    }

    impl Harness {
        fn solved_captcha(&self) -> (String, String) {
            let id = self.captcha.issue_known("abcd");
            (id, "abcd".to_string())
        }

        async fn seed_user(&self, username: &str) -> UserEntity {
            self.store
                .create_user(NewUser {
                    username: username.into(),
                    email: format!("{}@example.com", username),
                    password_hash: hash_password(PASSWORD, 4).unwrap(),
                    full_name: None,
                    avatar: None,
                    phone: None,
                    status: UserStatus::Active,
                })
                .await
                .unwrap()
        }

        async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AppError> {
            let (id, code) = self.solved_captcha();
            self.service
                .login(LoginInput {
                    username: username.into(),
                    password: password.into(),
                    captcha_session_id: id,
                    captcha_code: code,
                })
                .await
        }

        fn register_input(&self, username: &str, password: &str, confirm: &str) -> RegisterInput {
            let (id, code) = self.solved_captcha();
            RegisterInput {
                username: username.into(),
                email: format!("{}@example.com", username),
                password: password.into(),
                confirm_password: confirm.into(),
                full_name: None,
                phone: None,
                captcha_session_id: id,
                captcha_code: code,
            }
        }
    }

    #[tokio::test]
    async fn login_requires_a_valid_captcha() {
        let h = harness();
        h.seed_user("alice").await;
        let result = h
            .service
            .login(LoginInput {
                username: "alice".into(),
                password: PASSWORD.into(),
                captcha_session_id: "captcha_missing".into(),
                captcha_code: "abcd".into(),
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidCaptcha(_))));
    }

    #[tokio::test]
    async fn login_by_username_or_email_returns_view() {
        let h = harness();
        let user = h.seed_user("alice").await;
        let role = h
            .store
            .create_role(NewRole {
                name: "editor".into(),
                ..NewRole::default()
            })
            .await
            .unwrap();
        h.store.set_user_roles(user.id, &[role.id]).await.unwrap();

        let outcome = h.login("alice", PASSWORD).await.unwrap();
        assert_eq!(outcome.user.roles, vec!["editor".to_string()]);
        assert_eq!(outcome.tokens.token_type, "Bearer");
        assert_eq!(outcome.tokens.expires_in, 3600);

        assert!(h.login("alice@example.com", PASSWORD).await.is_ok());
        // 区分大小写
        assert!(matches!(
            h.login("ALICE", PASSWORD).await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let h = harness();
        h.seed_user("alice").await;
        let unknown = h.login("nobody", PASSWORD).await.unwrap_err();
        let wrong = h.login("alice", "Wrong123").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn disabled_account_does_not_consume_attempts() {
        let h = harness();
        let user = h.seed_user("alice").await;
        h.store
            .update_user(
                user.id,
                UserChanges {
                    status: Some(UserStatus::Banned),
                    ..UserChanges::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            h.login("alice", "Wrong123").await,
            Err(AppError::AccountDisabled)
        ));
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.login_attempts, 0);
    }

    #[tokio::test]
    async fn five_failures_lock_the_account() {
        let h = harness();
        let user = h.seed_user("alice").await;

        for _ in 0..5 {
            assert!(matches!(
                h.login("alice", "wrong").await,
                Err(AppError::InvalidCredentials)
            ));
        }
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.login_attempts, 5);
        assert!(stored.is_locked(Utc::now()));

        // 锁定期内正确密码也失败，且不再累加
        assert!(matches!(
            h.login("alice", PASSWORD).await,
            Err(AppError::InvalidCredentials)
        ));
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.login_attempts, 5);
    }

    #[tokio::test]
    async fn elapsed_lockout_allows_login_and_resets_counter() {
        let h = harness();
        let user = h.seed_user("alice").await;
        let past = Utc::now() - ChronoDuration::minutes(30);
        for _ in 0..5 {
            h.store
                .record_login_failure(user.id, 5, past + ChronoDuration::minutes(15), past)
                .await
                .unwrap();
        }

        h.login("alice", PASSWORD).await.unwrap();
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.login_attempts, 0);
        assert_eq!(stored.locked_until, None);
        assert!(stored.last_login_at.is_some());
    }

    #[tokio::test]
    async fn success_clears_partial_failures() {
        let h = harness();
        let user = h.seed_user("alice").await;
        for _ in 0..3 {
            let _ = h.login("alice", "wrong").await;
        }
        h.login("alice", PASSWORD).await.unwrap();
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.login_attempts, 0);
    }

    #[tokio::test]
    async fn register_rejects_mismatched_confirmation() {
        let h = harness();
        let input = h.register_input("alice", "Abc123!", "Abc123");
        assert!(matches!(
            h.service.register(input).await,
            Err(AppError::Validation(_))
        ));
        assert!(h.store.find_user_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_hashes_and_detects_duplicates() {
        let h = harness();
        let created = h
            .service
            .register(h.register_input("alice", "Abc123", "Abc123"))
            .await
            .unwrap();
        assert_eq!(created.full_name.as_deref(), Some("alice"));

        let stored = h.store.find_user_by_id(created.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "Abc123");
        assert!(stored.password_hash.starts_with("$2"));

        let dup_name = h.service.register(h.register_input("alice", "Abc123", "Abc123")).await;
        match dup_name {
            Err(AppError::Conflict(msg)) => assert_eq!(msg, "用户名已存在"),
            other => panic!("unexpected: {:?}", other.map(|u| u.id)),
        }

        let mut dup_email = h.register_input("alice2", "Abc123", "Abc123");
        dup_email.email = "alice@example.com".into();
        match h.service.register(dup_email).await {
            Err(AppError::Conflict(msg)) => assert_eq!(msg, "邮箱已存在"),
            other => panic!("unexpected: {:?}", other.map(|u| u.id)),
        }
    }

    #[tokio::test]
    async fn register_enforces_field_rules() {
        let h = harness();
        let weak = h.register_input("alice", "abcdef", "abcdef");
        assert!(matches!(h.service.register(weak).await, Err(AppError::Validation(_))));

        let bad_name = h.register_input("a!", "Abc123", "Abc123");
        assert!(matches!(h.service.register(bad_name).await, Err(AppError::Validation(_))));

        let mut bad_email = h.register_input("alice", "Abc123", "Abc123");
        bad_email.email = "not-an-email".into();
        assert!(matches!(h.service.register(bad_email).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn refresh_rotates_tokens_for_active_users() {
        let h = harness();
        let user = h.seed_user("alice").await;
        let outcome = h.login("alice", PASSWORD).await.unwrap();

        let pair = h.service.refresh(&outcome.tokens.refresh_token).await.unwrap();
        assert!(h.service.codec().verify(&pair.access_token, TokenKind::Access).is_ok());

        // 访问令牌不能用来刷新
        assert!(matches!(
            h.service.refresh(&outcome.tokens.access_token).await,
            Err(AppError::Unauthorized(_))
        ));

        h.store
            .update_user(
                user.id,
                UserChanges {
                    status: Some(UserStatus::Inactive),
                    ..UserChanges::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            h.service.refresh(&outcome.tokens.refresh_token).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn authenticate_loads_identity_and_rejects_refresh_tokens() {
        let h = harness();
        let user = h.seed_user("alice").await;
        let outcome = h.login("alice", PASSWORD).await.unwrap();

        let identity = h.service.authenticate(&outcome.tokens.access_token).await.unwrap();
        assert_eq!(identity.id(), user.id);
        assert!(matches!(
            h.service.authenticate(&outcome.tokens.refresh_token).await,
            Err(AppError::TokenInvalid)
        ));
        assert!(matches!(
            h.service.authenticate("garbage").await,
            Err(AppError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn change_password_checks_current() {
        let h = harness();
        let user = h.seed_user("alice").await;

        let wrong = ChangePasswordInput {
            current_password: "Nope1234".into(),
            new_password: "Newpass1".into(),
            confirm_new_password: "Newpass1".into(),
        };
        assert!(matches!(
            h.service.change_password(user.id, wrong).await,
            Err(AppError::WrongCurrentPassword)
        ));

        let mismatch = ChangePasswordInput {
            current_password: PASSWORD.into(),
            new_password: "Newpass1".into(),
            confirm_new_password: "Newpass2".into(),
        };
        assert!(matches!(
            h.service.change_password(user.id, mismatch).await,
            Err(AppError::Validation(_))
        ));

        let missing = ChangePasswordInput {
            current_password: PASSWORD.into(),
            new_password: "Newpass1".into(),
            confirm_new_password: "Newpass1".into(),
        };
        assert!(matches!(
            h.service.change_password(9999, missing.clone()).await,
            Err(AppError::NotFound(_))
        ));

        h.service.change_password(user.id, missing).await.unwrap();
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.password_changed_at.is_some());
        assert!(h.login("alice", "Newpass1").await.is_ok());
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_has_no_side_effect() {
        let h = harness();
        let user = h.seed_user("alice").await;
        assert_eq!(h.service.forgot_password("ghost@example.com").await.unwrap(), None);
        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.password_reset_token.is_none());
    }

    #[tokio::test]
    async fn reset_token_is_stored_as_digest_and_single_use() {
        let h = harness();
        let user = h.seed_user("alice").await;
        let token = h
            .service
            .forgot_password("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.len(), RESET_TOKEN_LENGTH);

        let stored = h.store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_reset_token, Some(reset_token_digest(&token)));
        assert_ne!(stored.password_reset_token.as_deref(), Some(token.as_str()));

        // 确认密码不一致时不消耗令牌
        let mismatch = ResetPasswordInput {
            token: token.clone(),
            new_password: "Newpass1".into(),
            confirm_new_password: "Newpass2".into(),
        };
        assert!(matches!(
            h.service.reset_password(mismatch).await,
            Err(AppError::Validation(_))
        ));

        let ok = ResetPasswordInput {
            token: token.clone(),
            new_password: "Newpass1".into(),
            confirm_new_password: "Newpass1".into(),
        };
        h.service.reset_password(ok.clone()).await.unwrap();
        assert!(matches!(
            h.service.reset_password(ok).await,
            Err(AppError::InvalidOrExpiredToken)
        ));
        assert!(h.login("alice", "Newpass1").await.is_ok());
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let h = harness();
        let user = h.seed_user("alice").await;
        let token = "expired-token-value";
        h.store
            .update_user(
                user.id,
                UserChanges {
                    password_reset_token: Some(Some(reset_token_digest(token))),
                    password_reset_expires: Some(Some(Utc::now() - ChronoDuration::minutes(1))),
                    ..UserChanges::default()
                },
            )
            .await
            .unwrap();

        let result = h
            .service
            .reset_password(ResetPasswordInput {
                token: token.into(),
                new_password: "Newpass1".into(),
                confirm_new_password: "Newpass1".into(),
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredToken)));
    }

    #[test]
    fn captcha_field_accepts_short_name() {
        let login: LoginInput = serde_json::from_value(serde_json::json!({
            "username": "alice",
            "password": "Secret123",
            "captchaSessionId": "captcha_1",
            "captcha": "AbCd",
        }))
        .unwrap();
        assert_eq!(login.captcha_code, "AbCd");

        let register: RegisterInput = serde_json::from_value(serde_json::json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "Secret123",
            "confirmPassword": "Secret123",
            "captchaSessionId": "captcha_1",
            "captchaCode": "wxyz",
        }))
        .unwrap();
        assert_eq!(register.captcha_code, "wxyz");
    }

    #[test]
    fn settings_follow_config_durations() {
        let settings = AuthSettings::from_config(&Config {
            lockout_duration_secs: u64::MAX,
            reset_token_ttl_secs: 120,
            ..Config::default()
        });
        assert_eq!(settings.reset_token_ttl, ChronoDuration::minutes(2));
        assert!(Utc::now().checked_add_signed(settings.lockout_duration).is_some());
    }

    #[test]
    fn reset_tokens_are_alphanumeric() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_eq!(a.len(), RESET_TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
        assert_eq!(reset_token_digest("abc").len(), 64);
    }
}
