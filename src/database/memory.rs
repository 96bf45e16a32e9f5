//! 内存存储实现
//!
//! 使用 DashMap 保存用户、角色与权限，用于测试与 `STORE_BACKEND=memory` 的本地开发。
//! 数据不持久化，进程重启后丢失。

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    CredentialStore, LoginAttempts, NewPermission, NewRole, NewUser, PermissionChanges,
    PermissionEntity, RbacStore, RoleChanges, RoleEntity, RoleStatus, RoleWithPermissions,
    StoreError, StoreResult, UserChanges, UserEntity, UserFilter,
};

pub struct MemoryStore {
    next_id: AtomicI64,
    users: DashMap<i64, UserEntity>,
    roles: DashMap<i64, RoleEntity>,
    permissions: DashMap<i64, PermissionEntity>,
    user_roles: DashMap<i64, Vec<i64>>,
    role_permissions: DashMap<i64, Vec<i64>>,
    // 唯一性检查与插入需要串行化
    write_gate: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            users: DashMap::new(),
            roles: DashMap::new(),
            permissions: DashMap::new(),
            user_roles: DashMap::new(),
            role_permissions: DashMap::new(),
            write_gate: Mutex::new(()),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn gate(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find_user(&self, pred: impl Fn(&UserEntity) -> bool) -> Option<UserEntity> {
        self.users
            .iter()
            .find(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
    }

    fn permissions_of_role(&self, role_id: i64) -> Vec<PermissionEntity> {
        let ids = self
            .role_permissions
            .get(&role_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.permissions.get(id).map(|p| p.value().clone()))
            .collect()
    }

    fn with_permissions(&self, role: RoleEntity) -> RoleWithPermissions {
        let permissions = self.permissions_of_role(role.id);
        RoleWithPermissions { role, permissions }
    }
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_username_or_email(
        &self,
        login: &str,
    ) -> StoreResult<Option<UserEntity>> {
        Ok(self.find_user(|u| u.username == login || u.email == login))
    }

    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<UserEntity>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserEntity>> {
        Ok(self.find_user(|u| u.username == username))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserEntity>> {
        Ok(self.find_user(|u| u.email == email))
    }

    async fn find_user_by_reset_token(
        &self,
        token_digest: &str,
    ) -> StoreResult<Option<UserEntity>> {
        Ok(self.find_user(|u| u.password_reset_token.as_deref() == Some(token_digest)))
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<UserEntity>> {
        let search = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let matches_search = |u: &UserEntity| match &search {
            Some(needle) => {
                u.username.to_lowercase().contains(needle)
                    || u.email.to_lowercase().contains(needle)
                    || u
                        .full_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(needle))
            }
            None => true,
        };
        let has_role = |u: &UserEntity| match filter.role_id {
            Some(role_id) => self
                .user_roles
                .get(&u.id)
                .is_some_and(|ids| ids.contains(&role_id)),
            None => true,
        };

        let mut users: Vec<UserEntity> = self
            .users
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|u| filter.status.is_none_or(|status| u.status == status))
            .filter(|u| matches_search(u) && has_role(u))
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserEntity> {
        let _gate = self.gate();
        if self.find_user(|u| u.username == user.username).is_some() {
            return Err(StoreError::UniqueViolation("用户名".into()));
        }
        if self.find_user(|u| u.email == user.email).is_some() {
            return Err(StoreError::UniqueViolation("邮箱".into()));
        }

        let now = Utc::now();
        let entity = UserEntity {
            id: self.allocate_id(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            full_name: user.full_name,
            phone: user.phone,
            avatar: user.avatar,
            status: user.status,
            login_attempts: 0,
            locked_until: None,
            password_reset_token: None,
            password_reset_expires: None,
            password_changed_at: None,
            last_login_at: None,
            last_active_at: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<()> {
        let _gate = self.gate();
        if let Some(username) = &changes.username {
            if self.find_user(|u| u.id != id && &u.username == username).is_some() {
                return Err(StoreError::UniqueViolation("用户名".into()));
            }
        }
        if let Some(email) = &changes.email {
            if self.find_user(|u| u.id != id && &u.email == email).is_some() {
                return Err(StoreError::UniqueViolation("邮箱".into()));
            }
        }

        let mut user = self.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(full_name) = changes.full_name {
            user.full_name = full_name;
        }
        if let Some(phone) = changes.phone {
            user.phone = phone;
        }
        if let Some(avatar) = changes.avatar {
            user.avatar = avatar;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(at) = changes.password_changed_at {
            user.password_changed_at = Some(at);
        }
        if let Some(token) = changes.password_reset_token {
            user.password_reset_token = token;
        }
        if let Some(expires) = changes.password_reset_expires {
            user.password_reset_expires = expires;
        }
        if let Some(at) = changes.last_login_at {
            user.last_login_at = Some(at);
        }
        if let Some(at) = changes.last_active_at {
            user.last_active_at = Some(at);
        }
        if let Some(status) = changes.status {
            user.status = status;
        }
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<()> {
        if self.users.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        self.user_roles.remove(&id);
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: i64,
        max_attempts: i32,
        lock_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<LoginAttempts> {
        // get_mut 持有分片写锁，读改写在同一临界区内完成
        let mut user = self.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        let lock_expired = user.locked_until.is_some_and(|until| until <= now);
        user.login_attempts = if lock_expired {
            1
        } else {
            user.login_attempts.saturating_add(1)
        };
        if lock_expired {
            user.locked_until = None;
        }
        if user.login_attempts >= max_attempts {
            user.locked_until = Some(lock_until);
        }
        user.updated_at = now;
        Ok(LoginAttempts {
            login_attempts: user.login_attempts,
            locked_until: user.locked_until,
        })
    }

    async fn record_login_success(&self, id: i64, now: DateTime<Utc>) -> StoreResult<()> {
        let mut user = self.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.last_active_at = Some(now);
        user.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn roles_for_user(&self, user_id: i64) -> StoreResult<Vec<RoleWithPermissions>> {
        let role_ids = self
            .user_roles
            .get(&user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(role_ids
            .iter()
            .filter_map(|id| self.roles.get(id).map(|r| r.value().clone()))
            .map(|role| self.with_permissions(role))
            .collect())
    }

    async fn set_user_roles(&self, user_id: i64, role_ids: &[i64]) -> StoreResult<()> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        self.user_roles.insert(user_id, dedup_ids(role_ids));
        Ok(())
    }

    async fn find_roles_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<RoleEntity>> {
        Ok(dedup_ids(ids)
            .iter()
            .filter_map(|id| self.roles.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn find_role_by_id(&self, id: i64) -> StoreResult<Option<RoleWithPermissions>> {
        let role = self.roles.get(&id).map(|r| r.value().clone());
        Ok(role.map(|role| self.with_permissions(role)))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<RoleEntity>> {
        Ok(self
            .roles
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value().clone()))
    }

    async fn list_roles(&self) -> StoreResult<Vec<RoleWithPermissions>> {
        let mut roles: Vec<RoleEntity> = self.roles.iter().map(|r| r.value().clone()).collect();
        roles.sort_by_key(|r| (r.sort, r.id));
        Ok(roles.into_iter().map(|r| self.with_permissions(r)).collect())
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<RoleEntity> {
        let _gate = self.gate();
        if self.roles.iter().any(|r| r.name == role.name) {
            return Err(StoreError::UniqueViolation("角色名".into()));
        }
        let now = Utc::now();
        let entity = RoleEntity {
            id: self.allocate_id(),
            name: role.name,
            display_name: role.display_name,
            description: role.description,
            status: role.status.unwrap_or(RoleStatus::Active),
            sort: role.sort,
            is_system: role.is_system,
            color: role.color,
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn update_role(&self, id: i64, changes: RoleChanges) -> StoreResult<()> {
        let _gate = self.gate();
        if let Some(name) = &changes.name {
            if self.roles.iter().any(|r| &r.name == name && r.id != id) {
                return Err(StoreError::UniqueViolation("角色名".into()));
            }
        }
        let mut role = self.roles.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = changes.name {
            role.name = name;
        }
        if let Some(display_name) = changes.display_name {
            role.display_name = display_name;
        }
        if let Some(description) = changes.description {
            role.description = description;
        }
        if let Some(status) = changes.status {
            role.status = status;
        }
        if let Some(sort) = changes.sort {
            role.sort = sort;
        }
        if let Some(color) = changes.color {
            role.color = color;
        }
        role.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> StoreResult<()> {
        self.roles.remove(&id).ok_or(StoreError::NotFound)?;
        self.role_permissions.remove(&id);
        for mut ids in self.user_roles.iter_mut() {
            ids.retain(|role_id| *role_id != id);
        }
        Ok(())
    }

    async fn count_role_users(&self, id: i64) -> StoreResult<i64> {
        Ok(self.user_roles.iter().filter(|ids| ids.contains(&id)).count() as i64)
    }

    async fn set_role_permissions(&self, role_id: i64, permission_ids: &[i64]) -> StoreResult<()> {
        if !self.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound);
        }
        self.role_permissions
            .insert(role_id, dedup_ids(permission_ids));
        Ok(())
    }

    async fn find_permissions_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<PermissionEntity>> {
        Ok(dedup_ids(ids)
            .iter()
            .filter_map(|id| self.permissions.get(id).map(|p| p.value().clone()))
            .collect())
    }

    async fn find_permission_by_id(&self, id: i64) -> StoreResult<Option<PermissionEntity>> {
        Ok(self.permissions.get(&id).map(|p| p.value().clone()))
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<PermissionEntity>> {
        Ok(self
            .permissions
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value().clone()))
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionEntity>> {
        let mut permissions: Vec<PermissionEntity> =
            self.permissions.iter().map(|p| p.value().clone()).collect();
        permissions.sort_by_key(|p| (p.sort, p.id));
        Ok(permissions)
    }

    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionEntity> {
        let _gate = self.gate();
        if self.permissions.iter().any(|p| p.name == permission.name) {
            return Err(StoreError::UniqueViolation("权限名".into()));
        }
        let now = Utc::now();
        let entity = PermissionEntity {
            id: self.allocate_id(),
            name: permission.name,
            display_name: permission.display_name,
            description: permission.description,
            kind: permission.kind,
            status: permission.status,
            resource: permission.resource,
            action: permission.action,
            sort: permission.sort,
            is_system: permission.is_system,
            group_name: permission.group_name,
            parent_id: permission.parent_id,
            created_at: now,
            updated_at: now,
        };
        self.permissions.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn update_permission(&self, id: i64, changes: PermissionChanges) -> StoreResult<()> {
        let _gate = self.gate();
        if let Some(name) = &changes.name {
            if self.permissions.iter().any(|p| &p.name == name && p.id != id) {
                return Err(StoreError::UniqueViolation("权限名".into()));
            }
        }
        let mut permission = self.permissions.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = changes.name {
            permission.name = name;
        }
        if let Some(display_name) = changes.display_name {
            permission.display_name = display_name;
        }
        if let Some(description) = changes.description {
            permission.description = description;
        }
        if let Some(kind) = changes.kind {
            permission.kind = kind;
        }
        if let Some(status) = changes.status {
            permission.status = status;
        }
        if let Some(resource) = changes.resource {
            permission.resource = resource;
        }
        if let Some(action) = changes.action {
            permission.action = action;
        }
        if let Some(sort) = changes.sort {
            permission.sort = sort;
        }
        if let Some(group_name) = changes.group_name {
            permission.group_name = group_name;
        }
        if let Some(parent_id) = changes.parent_id {
            permission.parent_id = parent_id;
        }
        permission.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_permission(&self, id: i64) -> StoreResult<()> {
        self.permissions.remove(&id).ok_or(StoreError::NotFound)?;
        for mut ids in self.role_permissions.iter_mut() {
            ids.retain(|permission_id| *permission_id != id);
        }
        Ok(())
    }

    async fn count_permission_roles(&self, id: i64) -> StoreResult<i64> {
        Ok(self
            .role_permissions
            .iter()
            .filter(|ids| ids.contains(&id))
            .count() as i64)
    }

    async fn count_permission_children(&self, id: i64) -> StoreResult<i64> {
        Ok(self
            .permissions
            .iter()
            .filter(|p| p.parent_id == Some(id))
            .count() as i64)
    }
}
