// 路由表
// 每个路由在这里声明自己的 Requirements，由 authorize_request 中间件统一认证与授权

use axum::{
    Json, Router,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{MethodRouter, delete, get, patch, post},
};

use crate::{
    AppState,
    auth::Requirements,
    common::ApiResponse,
    error::AppError,
    middleware::{GuardState, authorize_request, log_errors, rate_limit},
};

pub mod auth;
pub mod health;
pub mod permission;
pub mod role;
pub mod user;

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

fn guarded(
    state: &AppState,
    route: MethodRouter<AppState>,
    requirements: Requirements,
) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(
        GuardState::new(state.clone(), requirements),
        authorize_request,
    ))
}

// 登录、注册、找回密码与验证码，受限流保护
fn public_auth_routes(state: &AppState) -> Router<AppState> {
    let public = Requirements::public;
    let router = Router::new()
        .route(
            "/auth/captcha/generate",
            guarded(state, get(auth::generate_captcha), public()),
        )
        .route(
            "/auth/captcha/verify",
            guarded(state, post(auth::verify_captcha), public()),
        )
        .route("/auth/login", guarded(state, post(auth::login), public()))
        .route("/auth/register", guarded(state, post(auth::register), public()))
        .route(
            "/auth/forgot-password",
            guarded(state, post(auth::forgot_password), public()),
        );

    match &state.rate_limiter {
        Some(limiter) => router.layer(from_fn_with_state(limiter.clone(), rate_limit)),
        None => router,
    }
}

fn session_routes(state: &AppState) -> Router<AppState> {
    let signed_in = Requirements::authenticated;
    Router::new()
        .route(
            "/auth/refresh",
            guarded(state, post(auth::refresh_token), Requirements::public()),
        )
        .route(
            "/auth/reset-password",
            guarded(state, post(auth::reset_password), Requirements::public()),
        )
        .route("/auth/logout", guarded(state, post(auth::logout), signed_in()))
        .route(
            "/auth/verify-token",
            guarded(state, post(auth::verify_token), signed_in()),
        )
        .route("/auth/profile", guarded(state, get(auth::profile), signed_in()))
        .route(
            "/auth/change-password",
            guarded(state, patch(auth::change_password), signed_in()),
        )
}

fn role_routes(state: &AppState) -> Router<AppState> {
    let needs = |permission: &str| Requirements::authenticated().permissions([permission]);
    Router::new()
        .route("/roles", guarded(state, get(role::list_roles), needs("role:read")))
        .route("/roles", guarded(state, post(role::create_role), needs("role:create")))
        .route("/roles/{id}", guarded(state, get(role::get_role), needs("role:read")))
        .route(
            "/roles/{id}",
            guarded(state, patch(role::update_role), needs("role:update")),
        )
        .route(
            "/roles/{id}",
            guarded(state, delete(role::delete_role), needs("role:delete")),
        )
        .route(
            "/roles/{id}/status",
            guarded(state, patch(role::toggle_role_status), needs("role:update")),
        )
        .route(
            "/roles/{id}/permissions",
            guarded(
                state,
                post(role::assign_permissions),
                needs("role:assign-permissions"),
            ),
        )
}

fn permission_routes(state: &AppState) -> Router<AppState> {
    let needs = |permission: &str| Requirements::authenticated().permissions([permission]);
    Router::new()
        .route(
            "/permissions",
            guarded(state, get(permission::list_permissions), needs("permission:read")),
        )
        .route(
            "/permissions",
            guarded(state, post(permission::create_permission), needs("permission:create")),
        )
        .route(
            "/permissions/tree",
            guarded(state, get(permission::permission_tree), needs("permission:read")),
        )
        .route(
            "/permissions/{id}",
            guarded(state, get(permission::get_permission), needs("permission:read")),
        )
        .route(
            "/permissions/{id}",
            guarded(state, patch(permission::update_permission), needs("permission:update")),
        )
        .route(
            "/permissions/{id}",
            guarded(state, delete(permission::delete_permission), needs("permission:delete")),
        )
        .route(
            "/permissions/{id}/status",
            guarded(
                state,
                patch(permission::toggle_permission_status),
                needs("permission:update"),
            ),
        )
}

fn user_routes(state: &AppState) -> Router<AppState> {
    let needs = |permission: &str| Requirements::authenticated().permissions([permission]);
    Router::new()
        .route("/users", guarded(state, get(user::list_users), needs("user:read")))
        .route("/users", guarded(state, post(user::create_user), needs("user:create")))
        .route(
            "/users/{id}",
            guarded(state, patch(user::update_user), needs("user:update")),
        )
        .route(
            "/users/{id}",
            guarded(state, delete(user::delete_user), needs("user:delete")),
        )
        .route(
            "/users/{id}",
            guarded(
                state,
                get(user::get_user),
                Requirements::authenticated().super_admin().resource_owner(),
            ),
        )
        .route(
            "/users/{id}/roles",
            guarded(
                state,
                post(user::assign_roles),
                Requirements::authenticated()
                    .super_admin()
                    .permissions(["user:assign-roles"]),
            ),
        )
        .route(
            "/users/{id}/status",
            guarded(
                state,
                patch(user::toggle_user_status),
                needs("user:update"),
            ),
        )
}

/// 组装完整的应用路由
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .merge(public_auth_routes(&state))
        .merge(session_routes(&state))
        .merge(role_routes(&state))
        .merge(permission_routes(&state))
        .merge(user_routes(&state));

    // nest 不接受空前缀或 "/"
    let prefix = state.config.api_prefix.trim_end_matches('/');
    let router = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(prefix, api)
    };

    router.layer(from_fn(log_errors)).with_state(state)
}
