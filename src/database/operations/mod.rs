// Postgres 存储实现
// 所有查询使用运行时检查的 sqlx::query / query_as

use sqlx::PgPool;

use super::StoreError;

pub mod permission;
pub mod role;
pub mod user;

/// 基于连接池的存储实现
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// 唯一约束冲突转换为 UniqueViolation，其余原样保留
pub(crate) fn map_unique_violation(err: sqlx::Error, label: impl Fn(Option<&str>) -> String) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation(label(db_err.constraint()));
        }
    }
    StoreError::Database(err)
}
