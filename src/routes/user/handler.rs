use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    common::EmptyResponse,
    database::UserFilter,
    routes::ApiResult,
    services::user::{CreateUserInput, UpdateUserInput, UserDetail},
    utils::{message_to_api_response, success_to_api_response},
};

use super::model::AssignRolesRequest;

#[axum::debug_handler]
pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
) -> ApiResult<Vec<UserDetail>> {
    let users = state.users.list(&filter).await?;
    Ok((StatusCode::OK, success_to_api_response(users)))
}

#[axum::debug_handler]
pub async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<UserDetail> {
    let detail = state.users.get(id).await?;
    Ok((StatusCode::OK, success_to_api_response(detail)))
}

#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserInput>,
) -> ApiResult<UserDetail> {
    let detail = state.users.create(req).await?;
    Ok((StatusCode::CREATED, message_to_api_response(detail, "用户创建成功")))
}

#[axum::debug_handler]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserInput>,
) -> ApiResult<UserDetail> {
    let detail = state.users.update(id, req).await?;
    Ok((StatusCode::OK, message_to_api_response(detail, "用户更新成功")))
}

#[axum::debug_handler]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<EmptyResponse> {
    state.users.remove(id).await?;
    Ok((StatusCode::OK, message_to_api_response(EmptyResponse {}, "用户删除成功")))
}

#[axum::debug_handler]
pub async fn assign_roles(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AssignRolesRequest>,
) -> ApiResult<UserDetail> {
    let detail = state.users.assign_roles(id, &req.role_ids).await?;
    Ok((StatusCode::OK, message_to_api_response(detail, "角色分配成功")))
}

#[axum::debug_handler]
pub async fn toggle_user_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<UserDetail> {
    let detail = state.users.toggle_status(id).await?;
    Ok((StatusCode::OK, message_to_api_response(detail, "用户状态已更新")))
}
