use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::permission::PermissionEntity;

/// 角色状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "role_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    Active,
    Inactive,
}

impl RoleStatus {
    pub fn toggled(self) -> Self {
        match self {
            RoleStatus::Active => RoleStatus::Inactive,
            RoleStatus::Inactive => RoleStatus::Active,
        }
    }
}

/// 角色数据库实体
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoleEntity {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: RoleStatus,
    pub sort: i32,
    pub is_system: bool,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 角色及其直接分配的权限
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: RoleEntity,
    pub permissions: Vec<PermissionEntity>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRole {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<RoleStatus>,
    pub sort: i32,
    pub is_system: bool,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleChanges {
    pub name: Option<String>,
    pub display_name: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub status: Option<RoleStatus>,
    pub sort: Option<i32>,
    pub color: Option<Option<String>>,
}
