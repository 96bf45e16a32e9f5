use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    auth::resolver::PermissionNode,
    common::EmptyResponse,
    database::PermissionEntity,
    routes::ApiResult,
    services::permission::{CreatePermissionInput, UpdatePermissionInput},
    utils::{message_to_api_response, success_to_api_response},
};

#[axum::debug_handler]
pub async fn list_permissions(State(state): State<AppState>) -> ApiResult<Vec<PermissionEntity>> {
    let permissions = state.permissions.list().await?;
    Ok((StatusCode::OK, success_to_api_response(permissions)))
}

#[axum::debug_handler]
pub async fn permission_tree(State(state): State<AppState>) -> ApiResult<Vec<PermissionNode>> {
    let tree = state.permissions.tree().await?;
    Ok((StatusCode::OK, success_to_api_response(tree)))
}

#[axum::debug_handler]
pub async fn get_permission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<PermissionEntity> {
    let permission = state.permissions.get(id).await?;
    Ok((StatusCode::OK, success_to_api_response(permission)))
}

#[axum::debug_handler]
pub async fn create_permission(
    State(state): State<AppState>,
    Json(req): Json<CreatePermissionInput>,
) -> ApiResult<PermissionEntity> {
    let permission = state.permissions.create(req).await?;
    Ok((StatusCode::CREATED, message_to_api_response(permission, "权限创建成功")))
}

#[axum::debug_handler]
pub async fn update_permission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePermissionInput>,
) -> ApiResult<PermissionEntity> {
    let permission = state.permissions.update(id, req).await?;
    Ok((StatusCode::OK, message_to_api_response(permission, "权限更新成功")))
}

#[axum::debug_handler]
pub async fn delete_permission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<EmptyResponse> {
    state.permissions.remove(id).await?;
    Ok((StatusCode::OK, message_to_api_response(EmptyResponse {}, "权限删除成功")))
}

#[axum::debug_handler]
pub async fn toggle_permission_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<PermissionEntity> {
    let permission = state.permissions.toggle_status(id).await?;
    Ok((StatusCode::OK, message_to_api_response(permission, "权限状态已更新")))
}
