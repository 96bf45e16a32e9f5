use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 权限类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "permission_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    Menu,
    Button,
    Api,
    Data,
}

/// 权限状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "permission_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Active,
    Inactive,
}

impl PermissionStatus {
    pub fn toggled(self) -> Self {
        match self {
            PermissionStatus::Active => PermissionStatus::Inactive,
            PermissionStatus::Inactive => PermissionStatus::Active,
        }
    }
}

/// 权限数据库实体，parent_id 构成单亲树
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntity {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: PermissionType,
    pub status: PermissionStatus,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub sort: i32,
    pub is_system: bool,
    pub group_name: Option<String>,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub kind: PermissionType,
    pub status: PermissionStatus,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub sort: i32,
    pub is_system: bool,
    pub group_name: Option<String>,
    pub parent_id: Option<i64>,
}

impl NewPermission {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            kind: PermissionType::Api,
            status: PermissionStatus::Active,
            resource: None,
            action: None,
            sort: 0,
            is_system: false,
            group_name: None,
            parent_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionChanges {
    pub name: Option<String>,
    pub display_name: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub kind: Option<PermissionType>,
    pub status: Option<PermissionStatus>,
    pub resource: Option<Option<String>>,
    pub action: Option<Option<String>>,
    pub sort: Option<i32>,
    pub group_name: Option<Option<String>>,
    pub parent_id: Option<Option<i64>>,
}
