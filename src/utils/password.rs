use bcrypt::{hash, verify};

use crate::error::AppError;

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), cost)
}

/// bcrypt 的比较本身是常量时间的
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

/// 在阻塞线程池中计算哈希，避免占用异步运行时
pub async fn hash_password_blocking(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hash task failed: {}", e)))?
        .map_err(AppError::from)
}

pub async fn verify_password_blocking(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verify task failed: {}", e)))?
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_not_plaintext_and_verifies() {
        let hashed = hash_password("Abc123", 4).unwrap();
        assert_ne!(hashed, "Abc123");
        assert!(hashed.starts_with("$2"));
        assert!(verify_password("Abc123", &hashed).unwrap());
        assert!(!verify_password("abc123", &hashed).unwrap());
    }

    #[tokio::test]
    async fn blocking_wrappers_round_trip() {
        let hashed = hash_password_blocking("Secret9x", 4).await.unwrap();
        assert!(verify_password_blocking("Secret9x", &hashed).await.unwrap());
        assert!(!verify_password_blocking("secret9x", &hashed).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_hash_is_an_error() {
        assert!(verify_password_blocking("x", "not-a-hash").await.is_err());
    }
}
