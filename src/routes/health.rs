use axum::{extract::State, http::StatusCode};
use serde::Serialize;

use crate::{AppState, routes::ApiResult, utils::success_to_api_response};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub captcha_sessions: usize,
}

#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> ApiResult<HealthStatus> {
    let status = HealthStatus {
        status: "ok",
        captcha_sessions: state.captcha.active_sessions(),
    };
    Ok((StatusCode::OK, success_to_api_response(status)))
}
