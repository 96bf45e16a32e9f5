use std::collections::BTreeSet;

use serde::Serialize;

use super::resolver;
use crate::database::{RoleWithPermissions, UserEntity};

/// 已认证的调用者，携带加载好的角色及其权限
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: UserEntity,
    pub roles: Vec<RoleWithPermissions>,
}

impl Identity {
    pub fn new(user: UserEntity, roles: Vec<RoleWithPermissions>) -> Self {
        Self { user, roles }
    }

    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn role_names(&self) -> Vec<String> {
        resolver::role_names(&self.roles)
    }

    pub fn permissions(&self) -> BTreeSet<String> {
        resolver::effective_permissions(&self.roles)
    }

    pub fn view(&self) -> UserView {
        UserView {
            id: self.user.id,
            username: self.user.username.clone(),
            email: self.user.email.clone(),
            full_name: self.user.full_name.clone(),
            avatar: self.user.avatar.clone(),
            roles: self.role_names(),
            permissions: self.permissions().into_iter().collect(),
        }
    }
}

/// 返回给客户端的扁平化用户信息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}
