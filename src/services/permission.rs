use serde::Deserialize;

use crate::auth::resolver::{self, PermissionNode};
use crate::database::{
    NewPermission, PermissionChanges, PermissionEntity, PermissionStatus, PermissionType, Stores,
    with_timeout,
};
use crate::error::AppError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePermissionInput {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<PermissionType>,
    pub status: Option<PermissionStatus>,
    pub resource: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub is_system: bool,
    pub group_name: Option<String>,
    pub parent_id: Option<i64>,
}

/// parent_id 为 `null` 时移到根节点，缺省时不修改
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePermissionInput {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<PermissionType>,
    pub status: Option<PermissionStatus>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub sort: Option<i32>,
    pub group_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i64>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Clone)]
pub struct PermissionService {
    stores: Stores,
}

impl PermissionService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn get(&self, id: i64) -> Result<PermissionEntity, AppError> {
        with_timeout(self.stores.timeout, self.stores.rbac.find_permission_by_id(id))
            .await?
            .ok_or_else(|| AppError::NotFound("权限不存在".into()))
    }

    pub async fn list(&self) -> Result<Vec<PermissionEntity>, AppError> {
        Ok(with_timeout(self.stores.timeout, self.stores.rbac.list_permissions()).await?)
    }

    pub async fn tree(&self) -> Result<Vec<PermissionNode>, AppError> {
        Ok(resolver::build_tree(&self.list().await?))
    }

    async fn ensure_parent_exists(&self, parent_id: i64) -> Result<(), AppError> {
        with_timeout(
            self.stores.timeout,
            self.stores.rbac.find_permission_by_id(parent_id),
        )
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("父级权限不存在".into()))
    }

    async fn ensure_name_free(&self, name: &str) -> Result<(), AppError> {
        if with_timeout(self.stores.timeout, self.stores.rbac.find_permission_by_name(name))
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("权限名已存在".into()));
        }
        Ok(())
    }

    pub async fn create(&self, input: CreatePermissionInput) -> Result<PermissionEntity, AppError> {
        let name = input.name.trim().to_string();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(AppError::Validation("权限名长度必须在1-100个字符之间".into()));
        }
        self.ensure_name_free(&name).await?;
        if let Some(parent_id) = input.parent_id {
            self.ensure_parent_exists(parent_id).await?;
        }

        let template = NewPermission::named(name);
        let created = with_timeout(
            self.stores.timeout,
            self.stores.rbac.create_permission(NewPermission {
                display_name: input.display_name,
                description: input.description,
                kind: input.kind.unwrap_or(PermissionType::Button),
                status: input.status.unwrap_or(template.status),
                resource: input.resource,
                action: input.action,
                sort: input.sort,
                is_system: input.is_system,
                group_name: input.group_name,
                parent_id: input.parent_id,
                ..template
            }),
        )
        .await?;

        tracing::info!("Created permission {} ({})", created.name, created.id);
        Ok(created)
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdatePermissionInput,
    ) -> Result<PermissionEntity, AppError> {
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AppError::SystemEntityProtected("不能修改系统权限".into()));
        }

        let name = input.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if let Some(name) = name.as_deref().filter(|n| *n != current.name) {
            self.ensure_name_free(name).await?;
        }

        if let Some(Some(parent_id)) = input.parent_id {
            if parent_id == id {
                return Err(AppError::Validation("不能将自己设为父级权限".into()));
            }
            self.ensure_parent_exists(parent_id).await?;
            let all = self.list().await?;
            if resolver::creates_cycle(&all, id, parent_id) {
                return Err(AppError::Validation("不能将子权限设为父级权限".into()));
            }
        }

        with_timeout(
            self.stores.timeout,
            self.stores.rbac.update_permission(
                id,
                PermissionChanges {
                    name,
                    display_name: input.display_name.map(Some),
                    description: input.description.map(Some),
                    kind: input.kind,
                    status: input.status,
                    resource: input.resource.map(Some),
                    action: input.action.map(Some),
                    sort: input.sort,
                    group_name: input.group_name.map(Some),
                    parent_id: input.parent_id,
                },
            ),
        )
        .await?;

        self.get(id).await
    }

    pub async fn remove(&self, id: i64) -> Result<(), AppError> {
        let timeout = self.stores.timeout;
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AppError::SystemEntityProtected("不能删除系统权限".into()));
        }
        if with_timeout(timeout, self.stores.rbac.count_permission_children(id)).await? > 0 {
            return Err(AppError::Validation("该权限下还有子权限，不能删除".into()));
        }
        if with_timeout(timeout, self.stores.rbac.count_permission_roles(id)).await? > 0 {
            return Err(AppError::Validation("该权限被角色使用，不能删除".into()));
        }

        with_timeout(timeout, self.stores.rbac.delete_permission(id)).await?;
        tracing::info!("Deleted permission {} ({})", current.name, id);
        Ok(())
    }

    pub async fn toggle_status(&self, id: i64) -> Result<PermissionEntity, AppError> {
        let current = self.get(id).await?;
        if current.is_system {
            return Err(AppError::SystemEntityProtected("不能修改系统权限状态".into()));
        }

        with_timeout(
            self.stores.timeout,
            self.stores.rbac.update_permission(
                id,
                PermissionChanges {
                    status: Some(current.status.toggled()),
                    ..PermissionChanges::default()
                },
            ),
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
    use crate::database::{MemoryStore, NewRole, RbacStore};

    fn setup() -> (Arc<MemoryStore>, PermissionService) {
        let store = Arc::new(MemoryStore::new());
        let service = PermissionService::new(Stores::new(store.clone(), Duration::from_secs(5)));
        (store, service)
    }

    fn named(name: &str, parent_id: Option<i64>) -> CreatePermissionInput {
        CreatePermissionInput {
            name: name.into(),
            parent_id,
            ..CreatePermissionInput::default()
        }
    }

    #[tokio::test]
    async fn create_checks_name_and_parent() {
        let (_, service) = setup();
        let root = service.create(named("system", None)).await.unwrap();
        assert_eq!(root.kind, PermissionType::Button);

        assert!(matches!(
            service.create(named("system", None)).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            service.create(named("orphan", Some(9999))).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn parent_cannot_be_self_or_descendant() {
        let (_, service) = setup();
        let root = service.create(named("system", None)).await.unwrap();
        let child = service.create(named("system:user", Some(root.id))).await.unwrap();
        let leaf = service
            .create(named("system:user:list", Some(child.id)))
            .await
            .unwrap();

        let to_self = UpdatePermissionInput {
            parent_id: Some(Some(root.id)),
            ..UpdatePermissionInput::default()
        };
        assert!(matches!(
            service.update(root.id, to_self).await,
            Err(AppError::Validation(_))
        ));

        let to_descendant = UpdatePermissionInput {
            parent_id: Some(Some(leaf.id)),
            ..UpdatePermissionInput::default()
        };
        assert!(matches!(
            service.update(root.id, to_descendant).await,
            Err(AppError::Validation(_))
        ));

        let to_root = UpdatePermissionInput {
            parent_id: Some(None),
            ..UpdatePermissionInput::default()
        };
        let moved = service.update(leaf.id, to_root).await.unwrap();
        assert_eq!(moved.parent_id, None);
    }

    #[tokio::test]
    async fn delete_is_blocked_by_children_and_roles() {
        let (store, service) = setup();
        let root = service.create(named("system", None)).await.unwrap();
        let child = service.create(named("system:user", Some(root.id))).await.unwrap();

        assert!(matches!(
            service.remove(root.id).await,
            Err(AppError::Validation(_))
        ));

        let role = store
            .create_role(NewRole {
                name: "editor".into(),
                ..NewRole::default()
            })
            .await
            .unwrap();
        store.set_role_permissions(role.id, &[child.id]).await.unwrap();
        assert!(matches!(
            service.remove(child.id).await,
            Err(AppError::Validation(_))
        ));

        store.set_role_permissions(role.id, &[]).await.unwrap();
        service.remove(child.id).await.unwrap();
        service.remove(root.id).await.unwrap();
    }

    #[tokio::test]
    async fn system_permissions_are_protected() {
        let (_, service) = setup();
        let locked = service
            .create(CreatePermissionInput {
                is_system: true,
                ..named("system:root", None)
            })
            .await
            .unwrap();
        assert!(matches!(
            service.toggle_status(locked.id).await,
            Err(AppError::SystemEntityProtected(_))
        ));
        assert!(matches!(
            service.remove(locked.id).await,
            Err(AppError::SystemEntityProtected(_))
        ));
    }

    #[tokio::test]
    async fn tree_nests_children() {
        let (_, service) = setup();
        let root = service.create(named("system", None)).await.unwrap();
        service.create(named("system:user", Some(root.id))).await.unwrap();
        service.create(named("dashboard", None)).await.unwrap();

        let tree = service.tree().await.unwrap();
        assert_eq!(tree.len(), 2);
        let system = tree.iter().find(|n| n.permission.id == root.id).unwrap();
        assert_eq!(system.children.len(), 1);
    }

    #[test]
    fn explicit_null_parent_differs_from_missing() {
        let missing: UpdatePermissionInput = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.parent_id, None);
        let null: UpdatePermissionInput = serde_json::from_str(r#"{"parentId":null}"#).unwrap();
        assert_eq!(null.parent_id, Some(None));
    }
}
