use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 用户状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Banned,
}

/// 用户数据库实体
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub status: UserStatus,
    pub login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    /// 只保存重置令牌的 SHA-256 摘要
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserEntity {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// 锁定期尚未结束
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// 新建用户，password_hash 必须已经是哈希值
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub status: UserStatus,
}

/// 用户列表的筛选条件，search 匹配用户名、邮箱或姓名
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub search: Option<String>,
    pub status: Option<UserStatus>,
    pub role_id: Option<i64>,
}

/// 用户字段的部分更新，外层 None 表示不修改
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub avatar: Option<Option<String>>,
    pub password_hash: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub password_reset_token: Option<Option<String>>,
    pub password_reset_expires: Option<Option<DateTime<Utc>>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub status: Option<UserStatus>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.full_name.is_none()
            && self.phone.is_none()
            && self.avatar.is_none()
            && self.password_hash.is_none()
            && self.password_changed_at.is_none()
            && self.password_reset_token.is_none()
            && self.password_reset_expires.is_none()
            && self.last_login_at.is_none()
            && self.last_active_at.is_none()
            && self.status.is_none()
    }
}

/// 登录失败计数更新后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct LoginAttempts {
    pub login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}
