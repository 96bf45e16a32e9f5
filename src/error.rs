use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::database::StoreError;
use crate::utils::{TokenError, error_codes, error_to_api_response};

/// 认证与授权核心的错误分类，在边界处统一转换为 ApiResponse
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidCaptcha(String),
    #[error("用户名或密码错误")]
    InvalidCredentials,
    #[error("账号已被禁用")]
    AccountDisabled,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("用户未认证")]
    Unauthenticated,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Token已过期，请重新登录")]
    TokenExpired,
    #[error("无效的Token")]
    TokenInvalid,
    #[error("Token尚未生效")]
    TokenNotYetValid,
    #[error("认证失败，请登录后重试")]
    AuthenticationFailed,
    #[error("重置令牌无效或已过期")]
    InvalidOrExpiredToken,
    #[error("当前密码错误")]
    WrongCurrentPassword,
    #[error("{0}")]
    SystemEntityProtected(String),
    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            AppError::InvalidCaptcha(_) => (StatusCode::BAD_REQUEST, error_codes::INVALID_CAPTCHA),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::AccountDisabled => (StatusCode::UNAUTHORIZED, error_codes::ACCOUNT_DISABLED),
            AppError::Validation(_) | AppError::WrongCurrentPassword => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR)
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, error_codes::CONFLICT),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, error_codes::UNAUTHENTICATED),
            AppError::Unauthorized(_) | AppError::AuthenticationFailed => {
                (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED)
            }
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED),
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, error_codes::TOKEN_EXPIRED),
            AppError::TokenInvalid => (StatusCode::UNAUTHORIZED, error_codes::TOKEN_INVALID),
            AppError::TokenNotYetValid => {
                (StatusCode::UNAUTHORIZED, error_codes::TOKEN_NOT_YET_VALID)
            }
            AppError::InvalidOrExpiredToken => {
                (StatusCode::BAD_REQUEST, error_codes::RESET_TOKEN_INVALID)
            }
            AppError::SystemEntityProtected(_) => {
                (StatusCode::BAD_REQUEST, error_codes::SYSTEM_ENTITY_PROTECTED)
            }
            AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            // 并发写入时由唯一约束兜底
            StoreError::UniqueViolation(what) => AppError::Conflict(format!("{}已存在", what)),
            StoreError::NotFound => AppError::NotFound("记录不存在".into()),
            other => {
                tracing::error!("Store failure: {}", other);
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Invalid => AppError::TokenInvalid,
            TokenError::NotYetValid => AppError::TokenNotYetValid,
            TokenError::Other(_) => AppError::AuthenticationFailed,
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        tracing::error!("Password hashing failed: {}", err);
        AppError::Internal("密码处理失败".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // 内部错误细节只写日志，不返回给客户端
        let message = match &self {
            AppError::Internal(_) => "内部服务器错误".to_string(),
            other => other.to_string(),
        };

        (status, error_to_api_response::<()>(code, message)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_specific_reasons() {
        assert!(matches!(AppError::from(TokenError::Expired), AppError::TokenExpired));
        assert!(matches!(AppError::from(TokenError::Invalid), AppError::TokenInvalid));
        assert!(matches!(
            AppError::from(TokenError::NotYetValid),
            AppError::TokenNotYetValid
        ));
        assert!(matches!(
            AppError::from(TokenError::Other("x".into())),
            AppError::AuthenticationFailed
        ));
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(AppError::InvalidCredentials.status_and_code().0, StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status_and_code().0, StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("x".into()).status_and_code().0, StatusCode::CONFLICT);
        assert_eq!(
            AppError::Internal("db down".into()).status_and_code().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn login_failures_share_one_message() {
        // 登录失败不区分用户不存在、密码错误与锁定
        assert_eq!(AppError::InvalidCredentials.to_string(), "用户名或密码错误");
    }
}
