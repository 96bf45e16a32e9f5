//! 授权判定
//!
//! 每个路由在路由表中声明一个 `Requirements`，中间件完成认证后调用 `authorize`。
//! 判定按固定顺序短路：公开 → 未认证 → 超级管理员 → 角色 → 权限 → 任一/全部 → 资源所有者。

use crate::error::AppError;

use super::SUPER_ADMIN_ROLE;
use super::identity::Identity;
use super::resolver;

/// 资源所有者检查在找不到目标用户 ID 时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerPolicy {
    /// 找不到目标 ID 时放行
    #[default]
    Lenient,
    /// 找不到目标 ID 时拒绝
    Strict,
}

/// 路由的授权声明，空列表视为未声明
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    pub public: bool,
    pub super_admin: bool,
    /// 持有其中任意一个即可
    pub roles: Vec<String>,
    /// 持有其中任意一个即可
    pub permissions: Vec<String>,
    pub any_permissions: Vec<String>,
    pub all_permissions: Vec<String>,
    pub any_roles: Vec<String>,
    pub all_roles: Vec<String>,
    pub resource_owner: Option<OwnerPolicy>,
}

fn names<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl Requirements {
    pub fn public() -> Self {
        Self {
            public: true,
            ..Self::default()
        }
    }

    /// 只要求已登录
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn super_admin(mut self) -> Self {
        self.super_admin = true;
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = names(roles);
        self
    }

    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = names(permissions);
        self
    }

    pub fn any_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.any_permissions = names(permissions);
        self
    }

    pub fn all_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.all_permissions = names(permissions);
        self
    }

    pub fn any_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.any_roles = names(roles);
        self
    }

    pub fn all_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.all_roles = names(roles);
        self
    }

    pub fn resource_owner(mut self) -> Self {
        self.resource_owner = Some(OwnerPolicy::Lenient);
        self
    }

    pub fn resource_owner_strict(mut self) -> Self {
        self.resource_owner = Some(OwnerPolicy::Strict);
        self
    }
}

/// 请求中携带的目标用户 ID 原始值，按 路径 → 查询参数 → 请求体 的优先级取用
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTarget {
    pub path: Option<String>,
    pub query: Option<String>,
    pub body: Option<String>,
}

impl ResourceTarget {
    pub fn from_path(id: impl Into<String>) -> Self {
        Self {
            path: Some(id.into()),
            ..Self::default()
        }
    }

    fn raw(&self) -> Option<&str> {
        [&self.path, &self.query, &self.body]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    MissingRole,
    MissingPermission,
    MissingAnyPermission(Vec<String>),
    MissingAllPermissions(Vec<String>),
    MissingAnyRole(Vec<String>),
    MissingAllRoles(Vec<String>),
    NotResourceOwner,
}

impl DenyReason {
    pub fn message(&self) -> String {
        match self {
            DenyReason::Unauthenticated => "用户未认证".into(),
            DenyReason::MissingRole => "权限不足：缺少必要的角色".into(),
            DenyReason::MissingPermission => "权限不足：缺少必要的权限".into(),
            DenyReason::MissingAnyPermission(p) => {
                format!("权限不足：需要以下权限之一：{}", p.join(", "))
            }
            DenyReason::MissingAllPermissions(p) => {
                format!("权限不足：需要所有以下权限：{}", p.join(", "))
            }
            DenyReason::MissingAnyRole(r) => format!("权限不足：需要以下角色之一：{}", r.join(", ")),
            DenyReason::MissingAllRoles(r) => format!("权限不足：需要所有以下角色：{}", r.join(", ")),
            DenyReason::NotResourceOwner => "权限不足：只能操作自己的资源".into(),
        }
    }
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => AppError::Unauthenticated,
            other => AppError::Forbidden(other.message()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason.into()),
        }
    }
}

/// 纯函数：根据调用者身份与路由声明给出判定
pub fn authorize(
    identity: Option<&Identity>,
    requirements: &Requirements,
    target: &ResourceTarget,
) -> Decision {
    if requirements.public {
        return Decision::Allow;
    }

    let Some(identity) = identity else {
        return Decision::Deny(DenyReason::Unauthenticated);
    };
    let roles = &identity.roles;

    if requirements.super_admin && resolver::has_role(roles, SUPER_ADMIN_ROLE) {
        return Decision::Allow;
    }

    // roles / permissions 两个列表按“任一”语义判定
    if !requirements.roles.is_empty() && !resolver::has_any_role(roles, &requirements.roles) {
        return Decision::Deny(DenyReason::MissingRole);
    }

    if !requirements.permissions.is_empty()
        && !resolver::has_any_permission(roles, &requirements.permissions)
    {
        return Decision::Deny(DenyReason::MissingPermission);
    }

    if !requirements.any_permissions.is_empty()
        && !resolver::has_any_permission(roles, &requirements.any_permissions)
    {
        return Decision::Deny(DenyReason::MissingAnyPermission(
            requirements.any_permissions.clone(),
        ));
    }

    if !requirements.all_permissions.is_empty()
        && !resolver::has_all_permissions(roles, &requirements.all_permissions)
    {
        return Decision::Deny(DenyReason::MissingAllPermissions(
            requirements.all_permissions.clone(),
        ));
    }

    if !requirements.any_roles.is_empty() && !resolver::has_any_role(roles, &requirements.any_roles)
    {
        return Decision::Deny(DenyReason::MissingAnyRole(requirements.any_roles.clone()));
    }

    if !requirements.all_roles.is_empty() && !resolver::has_all_roles(roles, &requirements.all_roles)
    {
        return Decision::Deny(DenyReason::MissingAllRoles(requirements.all_roles.clone()));
    }

    if let Some(policy) = requirements.resource_owner {
        match target.raw() {
            // 无法解析的 ID 不可能等于调用者 ID
            Some(raw) => {
                if raw.parse::<i64>().ok() != Some(identity.id()) {
                    return Decision::Deny(DenyReason::NotResourceOwner);
                }
            }
            None => {
                if policy == OwnerPolicy::Strict {
                    return Decision::Deny(DenyReason::NotResourceOwner);
                }
            }
        }
    }

    Decision::Allow
}
