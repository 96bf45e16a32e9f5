use sqlx::{Postgres, QueryBuilder};

use super::{PgStore, map_unique_violation};
use crate::database::{NewPermission, PermissionChanges, PermissionEntity, StoreError, StoreResult};

pub(crate) const PERMISSION_COLUMNS: &str = r#"
    p.id, p.name, p.display_name, p.description, p."type", p.status, p.resource,
    p.action, p.sort, p.is_system, p.group_name, p.parent_id, p.created_at, p.updated_at
"#;

fn permission_name_taken(err: sqlx::Error) -> StoreError {
    map_unique_violation(err, |_| "权限名".to_string())
}

impl PgStore {
    pub(crate) async fn select_permissions_by_ids(
        &self,
        ids: &[i64],
    ) -> StoreResult<Vec<PermissionEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {} FROM permissions p WHERE p.id = ANY($1) ORDER BY p.sort, p.id",
            PERMISSION_COLUMNS
        );
        let permissions = sqlx::query_as::<_, PermissionEntity>(&query)
            .bind(ids)
            .fetch_all(self.pool())
            .await?;
        Ok(permissions)
    }

    pub(crate) async fn select_permission_by_id(
        &self,
        id: i64,
    ) -> StoreResult<Option<PermissionEntity>> {
        let query = format!("SELECT {} FROM permissions p WHERE p.id = $1", PERMISSION_COLUMNS);
        let permission = sqlx::query_as::<_, PermissionEntity>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(permission)
    }

    pub(crate) async fn select_permission_by_name(
        &self,
        name: &str,
    ) -> StoreResult<Option<PermissionEntity>> {
        let query = format!("SELECT {} FROM permissions p WHERE p.name = $1", PERMISSION_COLUMNS);
        let permission = sqlx::query_as::<_, PermissionEntity>(&query)
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(permission)
    }

    pub(crate) async fn select_all_permissions(&self) -> StoreResult<Vec<PermissionEntity>> {
        let query = format!(
            "SELECT {} FROM permissions p ORDER BY p.sort, p.id",
            PERMISSION_COLUMNS
        );
        let permissions = sqlx::query_as::<_, PermissionEntity>(&query)
            .fetch_all(self.pool())
            .await?;
        Ok(permissions)
    }

    pub(crate) async fn insert_permission(
        &self,
        permission: NewPermission,
    ) -> StoreResult<PermissionEntity> {
        let query = format!(
            r#"
            WITH p AS (
                INSERT INTO permissions
                    (name, display_name, description, "type", status, resource, action,
                     sort, is_system, group_name, parent_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING *
            )
            SELECT {} FROM p
            "#,
            PERMISSION_COLUMNS
        );

        let created = sqlx::query_as::<_, PermissionEntity>(&query)
            .bind(&permission.name)
            .bind(&permission.display_name)
            .bind(&permission.description)
            .bind(permission.kind)
            .bind(permission.status)
            .bind(&permission.resource)
            .bind(&permission.action)
            .bind(permission.sort)
            .bind(permission.is_system)
            .bind(&permission.group_name)
            .bind(permission.parent_id)
            .fetch_one(self.pool())
            .await
            .map_err(permission_name_taken)?;

        tracing::info!("Created permission: {} ({})", created.name, created.id);
        Ok(created)
    }

    pub(crate) async fn apply_permission_changes(
        &self,
        id: i64,
        changes: PermissionChanges,
    ) -> StoreResult<()> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE permissions SET updated_at = NOW()");

        if let Some(name) = changes.name {
            builder.push(", name = ").push_bind(name);
        }
        if let Some(display_name) = changes.display_name {
            builder.push(", display_name = ").push_bind(display_name);
        }
        if let Some(description) = changes.description {
            builder.push(", description = ").push_bind(description);
        }
        if let Some(kind) = changes.kind {
            builder.push(r#", "type" = "#).push_bind(kind);
        }
        if let Some(status) = changes.status {
            builder.push(", status = ").push_bind(status);
        }
        if let Some(resource) = changes.resource {
            builder.push(", resource = ").push_bind(resource);
        }
        if let Some(action) = changes.action {
            builder.push(", action = ").push_bind(action);
        }
        if let Some(sort) = changes.sort {
            builder.push(", sort = ").push_bind(sort);
        }
        if let Some(group_name) = changes.group_name {
            builder.push(", group_name = ").push_bind(group_name);
        }
        if let Some(parent_id) = changes.parent_id {
            builder.push(", parent_id = ").push_bind(parent_id);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(self.pool())
            .await
            .map_err(permission_name_taken)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub(crate) async fn remove_permission(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub(crate) async fn count_roles_granting(&self, id: i64) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM role_permissions WHERE permission_id = $1",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    pub(crate) async fn count_children_of(&self, id: i64) -> StoreResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM permissions WHERE parent_id = $1")
                .bind(id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}
