use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde_json::Value;

use crate::{
    AppState,
    auth::{Identity, Requirements, ResourceTarget, authorize},
    error::AppError,
};

// 资源所有者检查需要读取请求体时的上限
const OWNER_BODY_LIMIT: usize = 64 * 1024;

/// 每个路由各自持有一份授权声明
#[derive(Clone)]
pub struct GuardState {
    pub app: AppState,
    pub requirements: Arc<Requirements>,
}

impl GuardState {
    pub fn new(app: AppState, requirements: Requirements) -> Self {
        Self {
            app,
            requirements: Arc::new(requirements),
        }
    }
}

async fn bearer_token(parts: &mut Parts) -> Option<String> {
    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, &())
        .await
        .ok()
        .map(|TypedHeader(auth)| auth.token().to_string())
}

/// 目标用户 ID 依次取自路径参数 userId / id、查询参数 userId、JSON 请求体 userId
async fn resource_target(parts: &mut Parts, body: Body) -> Result<(ResourceTarget, Body), AppError> {
    let path = RawPathParams::from_request_parts(parts, &())
        .await
        .ok()
        .and_then(|params| {
            let find = |name: &str| {
                params
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
            };
            find("userId").or_else(|| find("id"))
        });

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(params)| params.get("userId").cloned());

    if path.is_some() || query.is_some() {
        let target = ResourceTarget {
            path,
            query,
            body: None,
        };
        return Ok((target, body));
    }

    let bytes = to_bytes(body, OWNER_BODY_LIMIT)
        .await
        .map_err(|_| AppError::Validation("请求体过大或无法读取".into()))?;
    let from_body = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|value| match value.get("userId") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });

    let target = ResourceTarget {
        body: from_body,
        ..ResourceTarget::default()
    };
    Ok((target, Body::from(bytes)))
}

/// 认证并按路由声明授权，通过后把 `Identity` 放入请求扩展
pub async fn authorize_request(
    State(guard): State<GuardState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let requirements = &guard.requirements;
    let (mut parts, body) = request.into_parts();

    let identity: Option<Identity> = match bearer_token(&mut parts).await {
        Some(token) => match guard.app.auth.authenticate(&token).await {
            Ok(identity) => Some(identity),
            // 公开路由上的无效令牌按匿名处理
            Err(e) if requirements.public => {
                tracing::debug!("Ignoring rejected token on public route: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Authentication failed for {}: {}", parts.uri.path(), e);
                return Err(e);
            }
        },
        None => None,
    };

    let (target, body) = if requirements.resource_owner.is_some() && !requirements.public {
        resource_target(&mut parts, body).await?
    } else {
        (ResourceTarget::default(), body)
    };

    if let Err(e) = authorize(identity.as_ref(), requirements, &target).into_result() {
        tracing::info!(
            "Access denied for {} on {}: {}",
            identity.as_ref().map(|i| i.id().to_string()).unwrap_or_else(|| "anonymous".into()),
            parts.uri.path(),
            e
        );
        return Err(e);
    }

    if let Some(identity) = identity {
        parts.extensions.insert(identity);
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}
