// 数据库模块
// 包含实体定义、存储接口以及 Postgres / 内存两种实现

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod models;
pub mod operations;

pub use memory::MemoryStore;
pub use models::permission::{
    NewPermission, PermissionChanges, PermissionEntity, PermissionStatus, PermissionType,
};
pub use models::role::{NewRole, RoleChanges, RoleEntity, RoleStatus, RoleWithPermissions};
pub use models::user::{
    LoginAttempts, NewUser, UserChanges, UserEntity, UserFilter, UserStatus,
};
pub use operations::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("record not found")]
    NotFound,
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 为存储调用加上超时，超时视为失败
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// 用户凭据存储
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 按用户名或邮箱查找（区分大小写）
    async fn find_user_by_username_or_email(&self, login: &str)
    -> StoreResult<Option<UserEntity>>;
    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<UserEntity>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserEntity>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserEntity>>;
    /// 按重置令牌摘要查找
    async fn find_user_by_reset_token(&self, token_digest: &str)
    -> StoreResult<Option<UserEntity>>;
    /// 按创建时间倒序
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<UserEntity>>;
    async fn create_user(&self, user: NewUser) -> StoreResult<UserEntity>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<()>;
    /// 用户-角色关联随之删除
    async fn delete_user(&self, id: i64) -> StoreResult<()>;

    /// 原子地累加失败次数，达到上限时写入锁定截止时间。
    /// 锁定已过期的账号从 1 重新计数。
    async fn record_login_failure(
        &self,
        id: i64,
        max_attempts: i32,
        lock_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<LoginAttempts>;

    /// 清零失败次数、解除锁定并记录登录时间
    async fn record_login_success(&self, id: i64, now: DateTime<Utc>) -> StoreResult<()>;
}

/// 角色、权限以及用户-角色关联的存储
#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn roles_for_user(&self, user_id: i64) -> StoreResult<Vec<RoleWithPermissions>>;
    async fn set_user_roles(&self, user_id: i64, role_ids: &[i64]) -> StoreResult<()>;

    async fn find_roles_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<RoleEntity>>;
    async fn find_role_by_id(&self, id: i64) -> StoreResult<Option<RoleWithPermissions>>;
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<RoleEntity>>;
    async fn list_roles(&self) -> StoreResult<Vec<RoleWithPermissions>>;
    async fn create_role(&self, role: NewRole) -> StoreResult<RoleEntity>;
    async fn update_role(&self, id: i64, changes: RoleChanges) -> StoreResult<()>;
    async fn delete_role(&self, id: i64) -> StoreResult<()>;
    async fn count_role_users(&self, id: i64) -> StoreResult<i64>;
    async fn set_role_permissions(&self, role_id: i64, permission_ids: &[i64]) -> StoreResult<()>;

    async fn find_permissions_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<PermissionEntity>>;
    async fn find_permission_by_id(&self, id: i64) -> StoreResult<Option<PermissionEntity>>;
    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<PermissionEntity>>;
    async fn list_permissions(&self) -> StoreResult<Vec<PermissionEntity>>;
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionEntity>;
    async fn update_permission(&self, id: i64, changes: PermissionChanges) -> StoreResult<()>;
    async fn delete_permission(&self, id: i64) -> StoreResult<()>;
    async fn count_permission_roles(&self, id: i64) -> StoreResult<i64>;
    async fn count_permission_children(&self, id: i64) -> StoreResult<i64>;
}

/// 应用持有的存储句柄
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub rbac: Arc<dyn RbacStore>,
    pub timeout: Duration,
}

impl Stores {
    pub fn new<S>(store: Arc<S>, timeout: Duration) -> Self
    where
        S: CredentialStore + RbacStore + 'static,
    {
        Self {
            credentials: store.clone(),
            rbac: store,
            timeout,
        }
    }
}
