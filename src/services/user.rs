use serde::{Deserialize, Serialize};

use crate::auth::service::{
    validate_email, validate_password_policy, validate_phone, validate_username,
};
use crate::auth::{ADMIN_ROLE, resolver};
use crate::database::{
    NewUser, RoleWithPermissions, Stores, UserChanges, UserEntity, UserFilter, UserStatus,
    with_timeout,
};
use crate::error::AppError;
use crate::utils::hash_password_blocking;

/// 用户详情，附带角色及有效权限
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: UserEntity,
    pub roles: Vec<RoleWithPermissions>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub status: Option<UserStatus>,
    pub role_ids: Option<Vec<i64>>,
}

/// 缺省字段不修改；role_ids 为空数组时清空角色
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub status: Option<UserStatus>,
    pub role_ids: Option<Vec<i64>>,
}

#[derive(Clone)]
pub struct UserService {
    stores: Stores,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(stores: Stores, bcrypt_cost: u32) -> Self {
        Self {
            stores,
            bcrypt_cost,
        }
    }

    async fn detail_of(&self, user: UserEntity) -> Result<UserDetail, AppError> {
        let roles = with_timeout(self.stores.timeout, self.stores.rbac.roles_for_user(user.id)).await?;
        let permissions = resolver::effective_permissions(&roles).into_iter().collect();
        Ok(UserDetail {
            user,
            roles,
            permissions,
        })
    }

    pub async fn get(&self, id: i64) -> Result<UserDetail, AppError> {
        let user = with_timeout(self.stores.timeout, self.stores.credentials.find_user_by_id(id))
            .await?
            .ok_or_else(|| AppError::NotFound("用户不存在".into()))?;
        self.detail_of(user).await
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<Vec<UserDetail>, AppError> {
        let users = with_timeout(self.stores.timeout, self.stores.credentials.list_users(filter)).await?;
        let mut details = Vec::with_capacity(users.len());
        for user in users {
            details.push(self.detail_of(user).await?);
        }
        Ok(details)
    }

    async fn ensure_username_free(&self, username: &str) -> Result<(), AppError> {
        if with_timeout(
            self.stores.timeout,
            self.stores.credentials.find_user_by_username(username),
        )
        .await?
        .is_some()
        {
            return Err(AppError::Conflict("用户名已存在".into()));
        }
        Ok(())
    }

    async fn ensure_email_free(&self, email: &str) -> Result<(), AppError> {
        if with_timeout(self.stores.timeout, self.stores.credentials.find_user_by_email(email))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("邮箱已存在".into()));
        }
        Ok(())
    }

    /// 只保留确实存在的角色 ID
    async fn existing_role_ids(&self, ids: &[i64]) -> Result<Vec<i64>, AppError> {
        let found = with_timeout(self.stores.timeout, self.stores.rbac.find_roles_by_ids(ids)).await?;
        Ok(found.into_iter().map(|r| r.id).collect())
    }

    pub async fn create(&self, input: CreateUserInput) -> Result<UserDetail, AppError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();
        validate_username(&username)?;
        validate_email(&email)?;
        validate_password_policy(&input.password)?;
        validate_phone(input.phone.as_deref())?;

        self.ensure_username_free(&username).await?;
        self.ensure_email_free(&email).await?;

        let password_hash = hash_password_blocking(&input.password, self.bcrypt_cost).await?;
        let created = with_timeout(
            self.stores.timeout,
            self.stores.credentials.create_user(NewUser {
                username,
                email,
                password_hash,
                full_name: input.full_name.filter(|n| !n.trim().is_empty()),
                phone: input.phone.filter(|p| !p.is_empty()),
                avatar: input.avatar.filter(|a| !a.is_empty()),
                status: input.status.unwrap_or(UserStatus::Active),
            }),
        )
        .await?;

        if let Some(ids) = input.role_ids.filter(|ids| !ids.is_empty()) {
            let ids = self.existing_role_ids(&ids).await?;
            with_timeout(
                self.stores.timeout,
                self.stores.rbac.set_user_roles(created.id, &ids),
            )
            .await?;
        }

        tracing::info!("Created user {} ({})", created.username, created.id);
        self.get(created.id).await
    }

    pub async fn update(&self, id: i64, input: UpdateUserInput) -> Result<UserDetail, AppError> {
        let current = self.get(id).await?;
        if input.role_ids.is_some() {
            Self::ensure_not_admin(&current, "不能修改系统管理员角色")?;
        }
        if input.status.is_some_and(|status| status != current.user.status) {
            Self::ensure_not_admin(&current, "不能修改系统管理员状态")?;
        }

        let username = input
            .username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty() && *u != current.user.username);
        if let Some(username) = &username {
            validate_username(username)?;
            self.ensure_username_free(username).await?;
        }

        let email = input
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty() && *e != current.user.email);
        if let Some(email) = &email {
            validate_email(email)?;
            self.ensure_email_free(email).await?;
        }

        validate_phone(input.phone.as_deref())?;

        let password_hash = match input.password {
            Some(password) => {
                validate_password_policy(&password)?;
                Some(hash_password_blocking(&password, self.bcrypt_cost).await?)
            }
            None => None,
        };

        let changes = UserChanges {
            username,
            email,
            full_name: input.full_name.map(|n| Some(n).filter(|n| !n.trim().is_empty())),
            phone: input.phone.map(|p| Some(p).filter(|p| !p.is_empty())),
            avatar: input.avatar.map(|a| Some(a).filter(|a| !a.is_empty())),
            password_changed_at: password_hash.as_ref().map(|_| chrono::Utc::now()),
            password_hash,
            status: input.status,
            ..UserChanges::default()
        };
        if !changes.is_empty() {
            with_timeout(self.stores.timeout, self.stores.credentials.update_user(id, changes))
                .await?;
        }

        if let Some(ids) = input.role_ids {
            let ids = self.existing_role_ids(&ids).await?;
            with_timeout(self.stores.timeout, self.stores.rbac.set_user_roles(id, &ids)).await?;
        }

        self.get(id).await
    }

    pub async fn remove(&self, id: i64) -> Result<(), AppError> {
        let current = self.get(id).await?;
        Self::ensure_not_admin(&current, "不能删除系统管理员")?;

        with_timeout(self.stores.timeout, self.stores.credentials.delete_user(id)).await?;
        tracing::info!("Deleted user {} ({})", current.user.username, id);
        Ok(())
    }

    /// 持有 admin 角色的用户不允许通过管理接口修改
    fn ensure_not_admin(detail: &UserDetail, message: &str) -> Result<(), AppError> {
        if resolver::has_role(&detail.roles, ADMIN_ROLE) {
            return Err(AppError::SystemEntityProtected(message.into()));
        }
        Ok(())
    }

    pub async fn assign_roles(&self, id: i64, role_ids: &[i64]) -> Result<UserDetail, AppError> {
        let detail = self.get(id).await?;
        Self::ensure_not_admin(&detail, "不能修改系统管理员角色")?;

        let ids = self.existing_role_ids(role_ids).await?;
        with_timeout(self.stores.timeout, self.stores.rbac.set_user_roles(id, &ids)).await?;

        tracing::info!("Assigned roles {:?} to user {}", ids, id);
        self.get(id).await
    }

    /// active 与 inactive 之间切换，其它状态切换为 active
    pub async fn toggle_status(&self, id: i64) -> Result<UserDetail, AppError> {
        let detail = self.get(id).await?;
        Self::ensure_not_admin(&detail, "不能修改系统管理员状态")?;

        let status = match detail.user.status {
            UserStatus::Active => UserStatus::Inactive,
            UserStatus::Inactive | UserStatus::Banned => UserStatus::Active,
        };
        with_timeout(
            self.stores.timeout,
            self.stores.credentials.update_user(
                id,
                UserChanges {
                    status: Some(status),
                    ..UserChanges::default()
                },
            ),
        )
        .await?;

        tracing::info!("User {} status changed to {:?}", id, status);
        self.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::database::{CredentialStore, MemoryStore, NewPermission, NewRole, NewUser, RbacStore};

    async fn setup() -> (Arc<MemoryStore>, UserService, UserEntity) {
        let store = Arc::new(MemoryStore::new());
        let service = UserService::new(Stores::new(store.clone(), Duration::from_secs(5)), 4);
        let user = store
            .create_user(NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                password_hash: "$2b$04$placeholder".into(),
                full_name: None,
                phone: None,
                avatar: None,
                status: UserStatus::Active,
            })
            .await
            .unwrap();
        (store, service, user)
    }

    async fn role(store: &MemoryStore, name: &str) -> i64 {
        store
            .create_role(NewRole {
                name: name.into(),
                ..NewRole::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn assign_roles_ignores_unknown_ids() {
        let (store, service, user) = setup().await;
        let editor = role(&store, "editor").await;
        let perm = store.create_permission(NewPermission::named("article:read")).await.unwrap();
        store.set_role_permissions(editor, &[perm.id]).await.unwrap();

        let detail = service.assign_roles(user.id, &[editor, 4242]).await.unwrap();
        assert_eq!(detail.roles.len(), 1);
        assert_eq!(detail.permissions, vec!["article:read".to_string()]);
    }

    #[tokio::test]
    async fn admins_are_protected() {
        let (store, service, user) = setup().await;
        let admin = role(&store, ADMIN_ROLE).await;
        store.set_user_roles(user.id, &[admin]).await.unwrap();

        assert!(matches!(
            service.assign_roles(user.id, &[]).await,
            Err(AppError::SystemEntityProtected(_))
        ));
        assert!(matches!(
            service.toggle_status(user.id).await,
            Err(AppError::SystemEntityProtected(_))
        ));
    }

    #[tokio::test]
    async fn toggle_status_flips_between_active_and_inactive() {
        let (_, service, user) = setup().await;
        let detail = service.toggle_status(user.id).await.unwrap();
        assert_eq!(detail.user.status, UserStatus::Inactive);
        let detail = service.toggle_status(user.id).await.unwrap();
        assert_eq!(detail.user.status, UserStatus::Active);

        assert!(matches!(
            service.toggle_status(9999).await,
            Err(AppError::NotFound(_))
        ));
    }

    fn new_user(username: &str, email: &str) -> CreateUserInput {
        CreateUserInput {
            username: username.into(),
            email: email.into(),
            password: "Secret123".into(),
            ..CreateUserInput::default()
        }
    }

    #[tokio::test]
    async fn create_rejects_taken_username_and_email() {
        let (_, service, _) = setup().await;

        let err = service.create(new_user("alice", "other@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "用户名已存在"));

        let err = service.create(new_user("bob", "alice@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "邮箱已存在"));
    }

    #[tokio::test]
    async fn create_hashes_password_and_assigns_known_roles() {
        let (store, service, _) = setup().await;
        let editor = role(&store, "editor").await;

        let detail = service
            .create(CreateUserInput {
                full_name: Some("Bob Builder".into()),
                role_ids: Some(vec![editor, 4242]),
                ..new_user("bob", "bob@example.com")
            })
            .await
            .unwrap();

        assert_eq!(detail.user.status, UserStatus::Active);
        assert_eq!(detail.roles.len(), 1);
        assert_ne!(detail.user.password_hash, "Secret123");
        assert!(bcrypt::verify("Secret123", &detail.user.password_hash).unwrap());

        assert!(matches!(
            service.create(new_user("carol", "carol@example.com")).await,
            Ok(ref d) if d.roles.is_empty()
        ));
        assert!(matches!(
            service
                .create(CreateUserInput {
                    password: "short".into(),
                    ..new_user("dave", "dave@example.com")
                })
                .await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_search_and_role() {
        let (store, service, alice) = setup().await;
        let editor = role(&store, "editor").await;
        service
            .create(CreateUserInput {
                role_ids: Some(vec![editor]),
                ..new_user("bob", "bob@example.com")
            })
            .await
            .unwrap();

        let all = service.list(&UserFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let found = service
            .list(&UserFilter {
                search: Some("ALI".into()),
                ..UserFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user.id, alice.id);

        let editors = service
            .list(&UserFilter {
                role_id: Some(editor),
                ..UserFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(editors.len(), 1);
        assert_eq!(editors[0].user.username, "bob");
    }

    #[tokio::test]
    async fn update_checks_uniqueness_and_replaces_roles() {
        let (store, service, alice) = setup().await;
        service.create(new_user("bob", "bob@example.com")).await.unwrap();
        let editor = role(&store, "editor").await;

        assert!(matches!(
            service
                .update(
                    alice.id,
                    UpdateUserInput {
                        username: Some("bob".into()),
                        ..UpdateUserInput::default()
                    }
                )
                .await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            service
                .update(
                    alice.id,
                    UpdateUserInput {
                        email: Some("bob@example.com".into()),
                        ..UpdateUserInput::default()
                    }
                )
                .await,
            Err(AppError::Conflict(_))
        ));

        // 未改动的用户名不算冲突
        let detail = service
            .update(
                alice.id,
                UpdateUserInput {
                    username: Some("alice".into()),
                    full_name: Some("Alice Liddell".into()),
                    role_ids: Some(vec![editor]),
                    ..UpdateUserInput::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(detail.user.full_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(detail.roles.len(), 1);

        let detail = service
            .update(
                alice.id,
                UpdateUserInput {
                    role_ids: Some(vec![]),
                    ..UpdateUserInput::default()
                },
            )
            .await
            .unwrap();
        assert!(detail.roles.is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_users_but_not_admins() {
        let (store, service, alice) = setup().await;
        let bob = service.create(new_user("bob", "bob@example.com")).await.unwrap();
        let admin = role(&store, ADMIN_ROLE).await;
        store.set_user_roles(alice.id, &[admin]).await.unwrap();

        let err = service.remove(alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::SystemEntityProtected(ref m) if m == "不能删除系统管理员"));
        assert!(service.get(alice.id).await.is_ok());

        service.remove(bob.user.id).await.unwrap();
        assert!(matches!(service.get(bob.user.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(service.remove(bob.user.id).await, Err(AppError::NotFound(_))));
    }
}
