//! bcrypt 密码哈希

use std::sync::{Arc, OnceLock};

use anyhow::Context;

const DUMMY_PASSWORD: &str = "framefox-dummy-password";

/// 密码哈希器
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// 用户不存在时参与校验的占位哈希（与真实哈希同强度）
    dummy: Arc<OnceLock<String>>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::with_cost(bcrypt::DEFAULT_COST)
    }
}

impl PasswordHasher {
    /// 自定义强度（测试中可使用最低值 4）
    pub fn with_cost(cost: u32) -> Self {
        Self {
            cost,
            dummy: Arc::new(OnceLock::new()),
        }
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        bcrypt::hash(plain, self.cost).context("密码哈希失败")
    }

    /// 哈希格式无效时视为不匹配
    pub fn verify(&self, plain: &str, hash: &str) -> bool {
        match bcrypt::verify(plain, hash) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!("密码哈希格式无效: {}", e);
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn dummy_is_initialized(&self) -> bool {
        self.dummy.get().is_some()
    }

    fn dummy_hash(&self) -> &str {
        self.dummy.get_or_init(|| {
            bcrypt::hash(DUMMY_PASSWORD, self.cost).unwrap_or_else(|e| {
                tracing::warn!("生成占位哈希失败: {}", e);
                String::new()
            })
        })
    }

    /// 在阻塞线程池中校验密码
    ///
    /// `hash` 为 `None`（用户不存在或没有密码）时仍对占位哈希做一次校验并返回 `false`，
    /// 使两种失败耗时一致
    pub async fn verify_async(&self, plain: &str, hash: Option<&str>) -> bool {
        let hasher = self.clone();
        let plain = plain.to_string();
        let hash = hash.map(str::to_string);
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&plain, &hash),
            None => {
                let _ = hasher.verify(&plain, hasher.dummy_hash());
                false
            }
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!("密码校验任务失败: {}", e);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher::with_cost(4);
        let hash = hasher.hash("s3cret").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(hasher.verify("s3cret", &hash));
        assert!(!hasher.verify("wrong", &hash));
        assert!(!hasher.verify("s3cret", "not-a-hash"));
    }

    #[tokio::test]
    async fn test_verify_async_runs_dummy_for_missing_hash() {
        let hasher = PasswordHasher::with_cost(4);
        let hash = hasher.hash("s3cret").unwrap();
        assert!(hasher.verify_async("s3cret", Some(&hash)).await);
        assert!(!hasher.verify_async("wrong", Some(&hash)).await);

        assert!(!hasher.verify_async(DUMMY_PASSWORD, None).await);
        let dummy = hasher.dummy.get().cloned().unwrap();
        assert!(dummy.starts_with("$2b$04$"));
        // 克隆共享同一个占位哈希
        assert_eq!(hasher.clone().dummy_hash(), dummy);
    }
}
