use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, Postgres, QueryBuilder};

use super::permission::PERMISSION_COLUMNS;
use super::{PgStore, map_unique_violation};
use crate::database::{
    NewPermission, NewRole, PermissionChanges, PermissionEntity, RbacStore, RoleChanges,
    RoleEntity, RoleStatus, RoleWithPermissions, StoreError, StoreResult,
};

const ROLE_COLUMNS: &str = r#"
    r.id, r.name, r.display_name, r.description, r.status, r.sort, r.is_system,
    r.color, r.created_at, r.updated_at
"#;

/// 角色-权限关联行
#[derive(FromRow)]
struct RolePermissionRow {
    role_id: i64,
    #[sqlx(flatten)]
    permission: PermissionEntity,
}

fn role_name_taken(err: sqlx::Error) -> StoreError {
    map_unique_violation(err, |_| "角色名".to_string())
}

impl PgStore {
    /// 一次查询取出多个角色的权限，再按角色归并
    async fn attach_permissions(
        &self,
        roles: Vec<RoleEntity>,
    ) -> StoreResult<Vec<RoleWithPermissions>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let role_ids: Vec<i64> = roles.iter().map(|r| r.id).collect();
        let query = format!(
            r#"
            SELECT rp.role_id, {}
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            ORDER BY p.sort, p.id
            "#,
            PERMISSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, RolePermissionRow>(&query)
            .bind(&role_ids)
            .fetch_all(self.pool())
            .await?;

        let mut grouped: HashMap<i64, Vec<PermissionEntity>> = HashMap::new();
        for row in rows {
            grouped.entry(row.role_id).or_default().push(row.permission);
        }

        Ok(roles
            .into_iter()
            .map(|role| {
                let permissions = grouped.remove(&role.id).unwrap_or_default();
                RoleWithPermissions { role, permissions }
            })
            .collect())
    }

    /// 在事务内整体替换关联表中某一方的全部行
    async fn replace_links(
        &self,
        table: &str,
        owner_column: &str,
        target_column: &str,
        owner_id: i64,
        target_ids: &[i64],
    ) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(&format!("DELETE FROM {} WHERE {} = $1", table, owner_column))
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if !target_ids.is_empty() {
            sqlx::query(&format!(
                "INSERT INTO {table} ({owner_column}, {target_column}) \
                 SELECT $1, t FROM UNNEST($2::BIGINT[]) AS t ON CONFLICT DO NOTHING"
            ))
            .bind(owner_id)
            .bind(target_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn exists(&self, table: &str, id: i64) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            table
        ))
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        Ok(found)
    }
}

#[async_trait]
impl RbacStore for PgStore {
    async fn roles_for_user(&self, user_id: i64) -> StoreResult<Vec<RoleWithPermissions>> {
        let query = format!(
            r#"
            SELECT {}
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.sort, r.id
            "#,
            ROLE_COLUMNS
        );
        let roles = sqlx::query_as::<_, RoleEntity>(&query)
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;
        self.attach_permissions(roles).await
    }

    async fn set_user_roles(&self, user_id: i64, role_ids: &[i64]) -> StoreResult<()> {
        if !self.exists("users", user_id).await? {
            return Err(StoreError::NotFound);
        }
        self.replace_links("user_roles", "user_id", "role_id", user_id, role_ids)
            .await
    }

    async fn find_roles_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<RoleEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {} FROM roles r WHERE r.id = ANY($1) ORDER BY r.sort, r.id",
            ROLE_COLUMNS
        );
        let roles = sqlx::query_as::<_, RoleEntity>(&query)
            .bind(ids)
            .fetch_all(self.pool())
            .await?;
        Ok(roles)
    }

    async fn find_role_by_id(&self, id: i64) -> StoreResult<Option<RoleWithPermissions>> {
        let query = format!("SELECT {} FROM roles r WHERE r.id = $1", ROLE_COLUMNS);
        let role = sqlx::query_as::<_, RoleEntity>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        match role {
            Some(role) => Ok(self.attach_permissions(vec![role]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<RoleEntity>> {
        let query = format!("SELECT {} FROM roles r WHERE r.name = $1", ROLE_COLUMNS);
        let role = sqlx::query_as::<_, RoleEntity>(&query)
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(role)
    }

    async fn list_roles(&self) -> StoreResult<Vec<RoleWithPermissions>> {
        let query = format!("SELECT {} FROM roles r ORDER BY r.sort, r.id", ROLE_COLUMNS);
        let roles = sqlx::query_as::<_, RoleEntity>(&query)
            .fetch_all(self.pool())
            .await?;
        self.attach_permissions(roles).await
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<RoleEntity> {
        let query = format!(
            r#"
            WITH r AS (
                INSERT INTO roles (name, display_name, description, status, sort, is_system, color)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            )
            SELECT {} FROM r
            "#,
            ROLE_COLUMNS
        );
        let created = sqlx::query_as::<_, RoleEntity>(&query)
            .bind(&role.name)
            .bind(&role.display_name)
            .bind(&role.description)
            .bind(role.status.unwrap_or(RoleStatus::Active))
            .bind(role.sort)
            .bind(role.is_system)
            .bind(&role.color)
            .fetch_one(self.pool())
            .await
            .map_err(role_name_taken)?;

        tracing::info!("Created role: {} ({})", created.name, created.id);
        Ok(created)
    }

    async fn update_role(&self, id: i64, changes: RoleChanges) -> StoreResult<()> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE roles SET updated_at = NOW()");

        if let Some(name) = changes.name {
            builder.push(", name = ").push_bind(name);
        }
        if let Some(display_name) = changes.display_name {
            builder.push(", display_name = ").push_bind(display_name);
        }
        if let Some(description) = changes.description {
            builder.push(", description = ").push_bind(description);
        }
        if let Some(status) = changes.status {
            builder.push(", status = ").push_bind(status);
        }
        if let Some(sort) = changes.sort {
            builder.push(", sort = ").push_bind(sort);
        }
        if let Some(color) = changes.color {
            builder.push(", color = ").push_bind(color);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(self.pool())
            .await
            .map_err(role_name_taken)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> StoreResult<()> {
        // 关联行由外键 ON DELETE CASCADE 清理
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn count_role_users(&self, id: i64) -> StoreResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_roles WHERE role_id = $1")
                .bind(id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    async fn set_role_permissions(&self, role_id: i64, permission_ids: &[i64]) -> StoreResult<()> {
        if !self.exists("roles", role_id).await? {
            return Err(StoreError::NotFound);
        }
        self.replace_links(
            "role_permissions",
            "role_id",
            "permission_id",
            role_id,
            permission_ids,
        )
        .await
    }

    async fn find_permissions_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<PermissionEntity>> {
        self.select_permissions_by_ids(ids).await
    }

    async fn find_permission_by_id(&self, id: i64) -> StoreResult<Option<PermissionEntity>> {
        self.select_permission_by_id(id).await
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<PermissionEntity>> {
        self.select_permission_by_name(name).await
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionEntity>> {
        self.select_all_permissions().await
    }

    async fn create_permission(&self, permission: NewPermission) -> StoreResult<PermissionEntity> {
        self.insert_permission(permission).await
    }

    async fn update_permission(&self, id: i64, changes: PermissionChanges) -> StoreResult<()> {
        self.apply_permission_changes(id, changes).await
    }

    async fn delete_permission(&self, id: i64) -> StoreResult<()> {
        self.remove_permission(id).await
    }

    async fn count_permission_roles(&self, id: i64) -> StoreResult<i64> {
        self.count_roles_granting(id).await
    }

    async fn count_permission_children(&self, id: i64) -> StoreResult<i64> {
        self.count_children_of(id).await
    }
}
