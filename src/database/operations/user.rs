use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use super::{PgStore, map_unique_violation};
use crate::database::{
    CredentialStore, LoginAttempts, NewUser, StoreError, StoreResult, UserChanges, UserEntity,
    UserFilter,
};

const USER_COLUMNS: &str = r#"
    id, username, email, password_hash, full_name, phone, avatar, status,
    login_attempts, locked_until, password_reset_token, password_reset_expires,
    password_changed_at, last_login_at, last_active_at, created_at, updated_at
"#;

impl PgStore {
    async fn fetch_user_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> StoreResult<Option<UserEntity>> {
        let query = format!("SELECT {} FROM users WHERE {} LIMIT 1", USER_COLUMNS, predicate);
        let user = sqlx::query_as::<_, UserEntity>(&query)
            .bind(value)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }
}

fn user_label(constraint: Option<&str>) -> String {
    match constraint {
        Some("users_email_key") => "邮箱".to_string(),
        _ => "用户名".to_string(),
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_username_or_email(
        &self,
        login: &str,
    ) -> StoreResult<Option<UserEntity>> {
        self.fetch_user_where("username = $1 OR email = $1", login).await
    }

    async fn find_user_by_id(&self, id: i64) -> StoreResult<Option<UserEntity>> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, UserEntity>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserEntity>> {
        self.fetch_user_where("username = $1", username).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserEntity>> {
        self.fetch_user_where("email = $1", email).await
    }

    async fn find_user_by_reset_token(
        &self,
        token_digest: &str,
    ) -> StoreResult<Option<UserEntity>> {
        self.fetch_user_where("password_reset_token = $1", token_digest)
            .await
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<UserEntity>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        builder.push(USER_COLUMNS).push(" FROM users WHERE TRUE");

        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            builder
                .push(" AND (username ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR email ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR full_name ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(role_id) = filter.role_id {
            builder
                .push(" AND EXISTS (SELECT 1 FROM user_roles ur WHERE ur.user_id = users.id AND ur.role_id = ")
                .push_bind(role_id)
                .push(")");
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let users = builder
            .build_query_as::<UserEntity>()
            .fetch_all(self.pool())
            .await?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserEntity> {
        let query = format!(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, phone, avatar, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let created = sqlx::query_as::<_, UserEntity>(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(&user.phone)
            .bind(&user.avatar)
            .bind(user.status)
            .fetch_one(self.pool())
            .await
            .map_err(|e| map_unique_violation(e, user_label))?;

        tracing::info!("Created user: {} ({})", created.username, created.id);
        Ok(created)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<()> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE users SET updated_at = NOW()");

        if let Some(username) = changes.username {
            builder.push(", username = ").push_bind(username);
        }
        if let Some(email) = changes.email {
            builder.push(", email = ").push_bind(email);
        }
        if let Some(full_name) = changes.full_name {
            builder.push(", full_name = ").push_bind(full_name);
        }
        if let Some(phone) = changes.phone {
            builder.push(", phone = ").push_bind(phone);
        }
        if let Some(avatar) = changes.avatar {
            builder.push(", avatar = ").push_bind(avatar);
        }
        if let Some(hash) = changes.password_hash {
            builder.push(", password_hash = ").push_bind(hash);
        }
        if let Some(at) = changes.password_changed_at {
            builder.push(", password_changed_at = ").push_bind(at);
        }
        if let Some(token) = changes.password_reset_token {
            builder.push(", password_reset_token = ").push_bind(token);
        }
        if let Some(expires) = changes.password_reset_expires {
            builder.push(", password_reset_expires = ").push_bind(expires);
        }
        if let Some(at) = changes.last_login_at {
            builder.push(", last_login_at = ").push_bind(at);
        }
        if let Some(at) = changes.last_active_at {
            builder.push(", last_active_at = ").push_bind(at);
        }
        if let Some(status) = changes.status {
            builder.push(", status = ").push_bind(status);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(self.pool())
            .await
            .map_err(|e| map_unique_violation(e, user_label))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tracing::info!("Deleted user {}", id);
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: i64,
        max_attempts: i32,
        lock_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<LoginAttempts> {
        // 单条 UPDATE 在行锁内完成读改写，SET 中引用的都是更新前的值
        let attempts = sqlx::query_as::<_, LoginAttempts>(
            r#"
            UPDATE users SET
                login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= $4 THEN 1
                    ELSE login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE
                            WHEN locked_until IS NOT NULL AND locked_until <= $4 THEN 1
                            ELSE login_attempts + 1
                          END) >= $2 THEN $3
                    WHEN locked_until IS NOT NULL AND locked_until <= $4 THEN NULL
                    ELSE locked_until
                END,
                updated_at = $4
            WHERE id = $1
            RETURNING login_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .bind(lock_until)
        .bind(now)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(attempts)
    }

    async fn record_login_success(&self, id: i64, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET login_attempts = 0, locked_until = NULL,
                last_login_at = $2, last_active_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
