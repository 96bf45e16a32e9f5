use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    auth::{
        CaptchaChallenge, CaptchaVerdict, Identity, UserView,
        service::{
            ChangePasswordInput, LoginInput, LoginOutcome, RegisterInput, RegisteredUser,
            ResetPasswordInput,
        },
    },
    common::EmptyResponse,
    routes::ApiResult,
    utils::{TokenPair, message_to_api_response, success_to_api_response},
};

use super::model::{
    CaptchaQuery, ForgotPasswordRequest, RefreshTokenRequest, VerifyCaptchaRequest,
    VerifyTokenResponse,
};

#[axum::debug_handler]
pub async fn generate_captcha(
    State(state): State<AppState>,
    Query(query): Query<CaptchaQuery>,
) -> ApiResult<CaptchaChallenge> {
    let challenge = state.captcha.generate(query.session_id);
    Ok((StatusCode::OK, success_to_api_response(challenge)))
}

#[axum::debug_handler]
pub async fn verify_captcha(
    State(state): State<AppState>,
    Json(req): Json<VerifyCaptchaRequest>,
) -> ApiResult<CaptchaVerdict> {
    let verdict = state.captcha.verify(&req.session_id, &req.captcha_code);
    let msg = verdict.message.clone();
    Ok((StatusCode::OK, message_to_api_response(verdict, &msg)))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginInput>,
) -> ApiResult<LoginOutcome> {
    let outcome = state.auth.login(req).await?;
    Ok((StatusCode::OK, message_to_api_response(outcome, "登录成功")))
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterInput>,
) -> ApiResult<RegisteredUser> {
    let user = state.auth.register(req).await?;
    Ok((StatusCode::CREATED, message_to_api_response(user, "注册成功")))
}

#[axum::debug_handler]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> ApiResult<TokenPair> {
    let tokens = state.auth.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, message_to_api_response(tokens, "令牌刷新成功")))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<EmptyResponse> {
    state.auth.logout(&identity);
    Ok((StatusCode::OK, message_to_api_response(EmptyResponse {}, "退出登录成功")))
}

#[axum::debug_handler]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ChangePasswordInput>,
) -> ApiResult<EmptyResponse> {
    state.auth.change_password(identity.id(), req).await?;
    Ok((StatusCode::OK, message_to_api_response(EmptyResponse {}, "密码修改成功")))
}

#[axum::debug_handler]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<EmptyResponse> {
    // 不论邮箱是否存在都返回相同结果
    let _ = state.auth.forgot_password(req.email.trim()).await?;
    Ok((
        StatusCode::OK,
        message_to_api_response(EmptyResponse {}, "如果邮箱存在，重置密码链接已发送"),
    ))
}

#[axum::debug_handler]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordInput>,
) -> ApiResult<EmptyResponse> {
    state.auth.reset_password(req).await?;
    Ok((StatusCode::OK, message_to_api_response(EmptyResponse {}, "密码重置成功")))
}

#[axum::debug_handler]
pub async fn verify_token(Extension(identity): Extension<Identity>) -> ApiResult<VerifyTokenResponse> {
    let response = VerifyTokenResponse {
        valid: true,
        user: identity.view(),
    };
    Ok((StatusCode::OK, message_to_api_response(response, "令牌有效")))
}

#[axum::debug_handler]
pub async fn profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<UserView> {
    let view = state.auth.profile(identity.id()).await?;
    Ok((StatusCode::OK, success_to_api_response(view)))
}
