use axum::Json;
use serde::Serialize;

use crate::common::ApiResponse;

pub mod password;
pub mod token;

pub use password::{hash_password, hash_password_blocking, verify_password, verify_password_blocking};
pub use token::{Claims, TokenCodec, TokenError, TokenKind, TokenPair};

// 所有 handler 返回 Json<ApiResponse<T>>
pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn message_to_api_response<T: Serialize>(data: T, msg: &str) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: msg.to_string(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const CONFLICT: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const INVALID_CAPTCHA: i32 = 1006;
    pub const ACCOUNT_DISABLED: i32 = 1007;
    pub const TOKEN_EXPIRED: i32 = 1008;
    pub const TOKEN_INVALID: i32 = 1009;
    pub const TOKEN_NOT_YET_VALID: i32 = 1010;
    pub const UNAUTHENTICATED: i32 = 1011;
    pub const RESET_TOKEN_INVALID: i32 = 1012;
    pub const SYSTEM_ENTITY_PROTECTED: i32 = 1013;
    pub const INTERNAL_ERROR: i32 = 5000;
}
