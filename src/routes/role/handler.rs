use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    common::EmptyResponse,
    database::RoleWithPermissions,
    routes::ApiResult,
    services::role::{CreateRoleInput, UpdateRoleInput},
    utils::{message_to_api_response, success_to_api_response},
};

use super::model::AssignPermissionsRequest;

#[axum::debug_handler]
pub async fn list_roles(State(state): State<AppState>) -> ApiResult<Vec<RoleWithPermissions>> {
    let roles = state.roles.list().await?;
    Ok((StatusCode::OK, success_to_api_response(roles)))
}

#[axum::debug_handler]
pub async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<RoleWithPermissions> {
    let role = state.roles.get(id).await?;
    Ok((StatusCode::OK, success_to_api_response(role)))
}

#[axum::debug_handler]
pub async fn create_role(
    State(state): State<AppState>,
    Json(req): Json<CreateRoleInput>,
) -> ApiResult<RoleWithPermissions> {
    let role = state.roles.create(req).await?;
    Ok((StatusCode::CREATED, message_to_api_response(role, "角色创建成功")))
}

#[axum::debug_handler]
pub async fn update_role(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRoleInput>,
) -> ApiResult<RoleWithPermissions> {
    let role = state.roles.update(id, req).await?;
    Ok((StatusCode::OK, message_to_api_response(role, "角色更新成功")))
}

#[axum::debug_handler]
pub async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<EmptyResponse> {
    state.roles.remove(id).await?;
    Ok((StatusCode::OK, message_to_api_response(EmptyResponse {}, "角色删除成功")))
}

#[axum::debug_handler]
pub async fn toggle_role_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<RoleWithPermissions> {
    let role = state.roles.toggle_status(id).await?;
    Ok((StatusCode::OK, message_to_api_response(role, "角色状态已更新")))
}

#[axum::debug_handler]
pub async fn assign_permissions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AssignPermissionsRequest>,
) -> ApiResult<RoleWithPermissions> {
    let role = state.roles.assign_permissions(id, &req.permission_ids).await?;
    Ok((StatusCode::OK, message_to_api_response(role, "权限分配成功")))
}
