use serde::Deserialize;

use crate::database::{
    NewRole, RoleChanges, RoleStatus, RoleWithPermissions, Stores, with_timeout,
};
use crate::error::AppError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleInput {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<RoleStatus>,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub is_system: bool,
    pub color: Option<String>,
    pub permission_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleInput {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<RoleStatus>,
    pub sort: Option<i32>,
    pub color: Option<String>,
    pub permission_ids: Option<Vec<i64>>,
}

#[derive(Clone)]
pub struct RoleService {
    stores: Stores,
}

impl RoleService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn get(&self, id: i64) -> Result<RoleWithPermissions, AppError> {
        with_timeout(self.stores.timeout, self.stores.rbac.find_role_by_id(id))
            .await?
            .ok_or_else(|| AppError::NotFound("角色不存在".into()))
    }

    pub async fn list(&self) -> Result<Vec<RoleWithPermissions>, AppError> {
        Ok(with_timeout(self.stores.timeout, self.stores.rbac.list_roles()).await?)
    }

    /// 只保留确实存在的权限 ID
    async fn existing_permission_ids(&self, ids: &[i64]) -> Result<Vec<i64>, AppError> {
        let found =
            with_timeout(self.stores.timeout, self.stores.rbac.find_permissions_by_ids(ids)).await?;
        Ok(found.into_iter().map(|p| p.id).collect())
    }

    pub async fn create(&self, input: CreateRoleInput) -> Result<RoleWithPermissions, AppError> {
        let timeout = self.stores.timeout;
        let name = input.name.trim().to_string();
        if name.is_empty() || name.chars().count() > 50 {
            return Err(AppError::Validation("角色名长度必须在1-50个字符之间".into()));
        }
        if with_timeout(timeout, self.stores.rbac.find_role_by_name(&name))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("角色名已存在".into()));
        }

        let role = with_timeout(
            timeout,
            self.stores.rbac.create_role(NewRole {
                name,
                display_name: input.display_name,
                description: input.description,
                status: input.status,
                sort: input.sort,
                is_system: input.is_system,
                color: input.color,
            }),
        )
        .await?;

        if let Some(ids) = input.permission_ids.filter(|ids| !ids.is_empty()) {
            let ids = self.existing_permission_ids(&ids).await?;
            with_timeout(timeout, self.stores.rbac.set_role_permissions(role.id, &ids)).await?;
        }

        tracing::info!("Created role {} ({})", role.name, role.id);
        self.get(role.id).await
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdateRoleInput,
    ) -> Result<RoleWithPermissions, AppError> {
        let timeout = self.stores.timeout;
        let current = self.get(id).await?;
        if current.role.is_system {
            return Err(AppError::SystemEntityProtected("不能修改系统角色".into()));
        }

        let name = input.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if let Some(name) = name.as_deref().filter(|n| *n != current.role.name) {
            if with_timeout(timeout, self.stores.rbac.find_role_by_name(name))
                .await?
                .is_some()
            {
                return Err(AppError::Conflict("角色名已存在".into()));
            }
        }

        with_timeout(
            timeout,
            self.stores.rbac.update_role(
                id,
                RoleChanges {
                    name,
                    display_name: input.display_name.map(Some),
                    description: input.description.map(Some),
                    status: input.status,
                    sort: input.sort,
                    color: input.color.map(Some),
                },
            ),
        )
        .await?;

        if let Some(ids) = input.permission_ids {
            let ids = self.existing_permission_ids(&ids).await?;
            with_timeout(timeout, self.stores.rbac.set_role_permissions(id, &ids)).await?;
        }

        self.get(id).await
    }

    pub async fn remove(&self, id: i64) -> Result<(), AppError> {
        let timeout = self.stores.timeout;
        let current = self.get(id).await?;
        if current.role.is_system {
            return Err(AppError::SystemEntityProtected("不能删除系统角色".into()));
        }
        if with_timeout(timeout, self.stores.rbac.count_role_users(id)).await? > 0 {
            return Err(AppError::Validation("该角色下还有用户，不能删除".into()));
        }

        with_timeout(timeout, self.stores.rbac.delete_role(id)).await?;
        tracing::info!("Deleted role {} ({})", current.role.name, id);
        Ok(())
    }

    pub async fn toggle_status(&self, id: i64) -> Result<RoleWithPermissions, AppError> {
        let current = self.get(id).await?;
        if current.role.is_system {
            return Err(AppError::SystemEntityProtected("不能修改系统角色状态".into()));
        }

        with_timeout(
            self.stores.timeout,
            self.stores.rbac.update_role(
                id,
                RoleChanges {
                    status: Some(current.role.status.toggled()),
                    ..RoleChanges::default()
                },
            ),
        )
        .await?;
        self.get(id).await
    }

    /// 整体替换角色的权限集合
    pub async fn assign_permissions(
        &self,
        id: i64,
        permission_ids: &[i64],
    ) -> Result<RoleWithPermissions, AppError> {
        let current = self.get(id).await?;
        if current.role.is_system {
            return Err(AppError::SystemEntityProtected("不能修改系统角色权限".into()));
        }

        let ids = self.existing_permission_ids(permission_ids).await?;
        with_timeout(
            self.stores.timeout,
            self.stores.rbac.set_role_permissions(id, &ids),
        )
        .await?;
        self.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::database::{
        CredentialStore, MemoryStore, NewPermission, NewUser, RbacStore, UserStatus,
    };

    fn setup() -> (Arc<MemoryStore>, RoleService) {
        let store = Arc::new(MemoryStore::new());
        let service = RoleService::new(Stores::new(store.clone(), Duration::from_secs(5)));
        (store, service)
    }

    fn named(name: &str) -> CreateRoleInput {
        CreateRoleInput {
            name: name.into(),
            ..CreateRoleInput::default()
        }
    }

    #[tokio::test]
    async fn create_with_permissions_and_reject_duplicates() {
        let (store, service) = setup();
        let read = store
            .create_permission(NewPermission::named("article:read"))
            .await
            .unwrap();

        let role = service
            .create(CreateRoleInput {
                permission_ids: Some(vec![read.id, 9999]),
                ..named("editor")
            })
            .await
            .unwrap();
        assert_eq!(role.role.status, RoleStatus::Active);
        assert_eq!(role.permissions.len(), 1);

        assert!(matches!(
            service.create(named("editor")).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn system_roles_are_protected() {
        let (_, service) = setup();
        let role = service
            .create(CreateRoleInput {
                is_system: true,
                ..named("super_admin")
            })
            .await
            .unwrap();
        let id = role.role.id;

        assert!(matches!(
            service.update(id, UpdateRoleInput::default()).await,
            Err(AppError::SystemEntityProtected(_))
        ));
        assert!(matches!(
            service.remove(id).await,
            Err(AppError::SystemEntityProtected(_))
        ));
        assert!(matches!(
            service.toggle_status(id).await,
            Err(AppError::SystemEntityProtected(_))
        ));
        assert!(matches!(
            service.assign_permissions(id, &[]).await,
            Err(AppError::SystemEntityProtected(_))
        ));
    }

    #[tokio::test]
    async fn role_with_users_cannot_be_deleted() {
        let (store, service) = setup();
        let role = service.create(named("editor")).await.unwrap();
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
        store.set_user_roles(user.id, &[role.role.id]).await.unwrap();

        assert!(matches!(
            service.remove(role.role.id).await,
            Err(AppError::Validation(_))
        ));

        store.set_user_roles(user.id, &[]).await.unwrap();
        service.remove(role.role.id).await.unwrap();
        assert!(matches!(
            service.get(role.role.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rename_conflicts_and_status_toggle() {
        let (_, service) = setup();
        service.create(named("editor")).await.unwrap();
        let viewer = service.create(named("viewer")).await.unwrap();

        let rename = UpdateRoleInput {
            name: Some("editor".into()),
            ..UpdateRoleInput::default()
        };
        assert!(matches!(
            service.update(viewer.role.id, rename).await,
            Err(AppError::Conflict(_))
        ));

        let toggled = service.toggle_status(viewer.role.id).await.unwrap();
        assert_eq!(toggled.role.status, RoleStatus::Inactive);
        let toggled = service.toggle_status(viewer.role.id).await.unwrap();
        assert_eq!(toggled.role.status, RoleStatus::Active);
    }

    #[tokio::test]
    async fn assign_permissions_replaces_the_set() {
        let (store, service) = setup();
        let a = store.create_permission(NewPermission::named("a")).await.unwrap();
        let b = store.create_permission(NewPermission::named("b")).await.unwrap();
        let role = service.create(named("editor")).await.unwrap();

        service.assign_permissions(role.role.id, &[a.id, b.id]).await.unwrap();
        let updated = service.assign_permissions(role.role.id, &[b.id]).await.unwrap();
        let names: Vec<_> = updated.permissions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }
}
