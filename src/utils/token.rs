use std::sync::LazyLock;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

pub const DEFAULT_ACCESS_TTL_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 30 * 24 * 3600;
pub const TOKEN_TYPE: &str = "Bearer";

static EXPIRES_IN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([smhd])").expect("static regex"));

/// 解析 `30d` / `12h` / `15m` / `90s` 形式的时长，返回秒数
pub fn parse_expires_in(expires_in: &str) -> Option<u64> {
    let caps = EXPIRES_IN_PATTERN.captures(expires_in)?;
    let value: u64 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return None,
    };
    value.checked_mul(unit)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: i64,         // 用户ID
    pub username: String, // 用户名
    pub email: String,    // 邮箱
    pub iat: i64,         // 签发时间
    pub exp: i64,         // 过期时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>, // 生效时间
}

/// 令牌种类，决定签名密钥与有效期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token error: {0}")]
    Other(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Invalid,
            _ => TokenError::Other(err.to_string()),
        }
    }
}

/// 签发响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// 令牌主体
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub id: i64,
    pub username: &'a str,
    pub email: &'a str,
}

/// 访问令牌与刷新令牌使用不同密钥和不同有效期
#[derive(Clone)]
pub struct TokenCodec {
    access_secret: String,
    refresh_secret: String,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenCodec {
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        access_ttl_secs: u64,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            config.jwt_refresh_secret.clone(),
            config.access_token_ttl_secs(),
            config.refresh_token_ttl_secs(),
        )
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access => self.access_secret.as_bytes(),
            TokenKind::Refresh => self.refresh_secret.as_bytes(),
        }
    }

    fn ttl(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        }
    }

    pub fn claims_for(&self, subject: &TokenSubject<'_>, kind: TokenKind) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: subject.id,
            username: subject.username.to_string(),
            email: subject.email.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl(kind) as i64),
            nbf: None,
        }
    }

    pub fn sign(&self, claims: &Claims, kind: TokenKind) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(|e| TokenError::Other(e.to_string()))
    }

    pub fn issue_access_token(&self, subject: &TokenSubject<'_>) -> Result<String, TokenError> {
        self.sign(&self.claims_for(subject, TokenKind::Access), TokenKind::Access)
    }

    pub fn issue_refresh_token(&self, subject: &TokenSubject<'_>) -> Result<String, TokenError> {
        self.sign(&self.claims_for(subject, TokenKind::Refresh), TokenKind::Refresh)
    }

    pub fn issue_pair(&self, subject: &TokenSubject<'_>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(subject)?,
            refresh_token: self.issue_refresh_token(subject)?,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.access_ttl_secs,
        })
    }

    /// 校验签名与有效期，不容忍时钟偏差
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret(kind)),
            &validation,
        )?;

        Ok(token_data.claims)
    }
}
