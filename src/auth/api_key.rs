//! # API 密钥服务
//!
//! 密钥的生成、哈希、格式校验与记录存取。哈希索引保证按密文 O(1) 查找。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::store::{StoreManager, keys::StoreKey};
use crate::{ldebug, linfo};

use super::types::{
    ApiKeyRecord, ClientRestriction, ModelRestriction, Permissions, PlatformBindings,
};

/// 密钥密文随机部分长度
const SECRET_RANDOM_LEN: usize = 48;
/// 密文长度下限/上限（含前缀）
pub const SECRET_MIN_LEN: usize = 10;
pub const SECRET_MAX_LEN: usize = 512;

/// 新建密钥的参数
#[derive(Debug, Clone, Default)]
pub struct NewApiKey {
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Permissions,
    pub token_limit: u64,
    pub concurrency_limit: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u64,
    pub daily_cost_limit_micros: u64,
    pub model_restriction: ModelRestriction,
    pub client_restriction: ClientRestriction,
    pub bindings: PlatformBindings,
    pub tags: Vec<String>,
}

/// API 密钥服务
pub struct KeyService {
    store: Arc<StoreManager>,
    /// 密文前缀（参与哈希）
    secret_prefix: String,
    /// 全局 pepper（参与哈希）
    pepper: String,
}

impl KeyService {
    #[must_use]
    pub const fn new(store: Arc<StoreManager>, secret_prefix: String, pepper: String) -> Self {
        Self {
            store,
            secret_prefix,
            pepper,
        }
    }

    #[must_use]
    pub fn secret_prefix(&self) -> &str {
        &self.secret_prefix
    }

    /// 密文格式校验：带前缀且长度在 [10, 512] 内
    #[must_use]
    pub fn is_valid_secret_format(&self, secret: &str) -> bool {
        secret.len() >= SECRET_MIN_LEN
            && secret.len() <= SECRET_MAX_LEN
            && secret.starts_with(&self.secret_prefix)
    }

    /// 计算密文哈希：SHA-256(prefix ‖ secret ‖ pepper)，十六进制输出
    #[must_use]
    pub fn hash_secret(&self, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret_prefix.as_bytes());
        hasher.update(secret.as_bytes());
        hasher.update(self.pepper.as_bytes());
        hex_encode(&hasher.finalize())
    }

    /// 生成新密文
    fn generate_secret(&self) -> String {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_RANDOM_LEN)
            .map(char::from)
            .collect();
        format!("{}{random}", self.secret_prefix)
    }

    /// 创建密钥：生成 id 与密文，写入记录与索引，返回 (记录, 明文密文)
    ///
    /// 明文密文只在此处返回一次，之后系统仅保存哈希。
    pub async fn create_key(&self, params: NewApiKey) -> Result<(ApiKeyRecord, String)> {
        let secret = self.generate_secret();
        let record = ApiKeyRecord {
            id: Uuid::new_v4().to_string(),
            name: params.name,
            hashed_secret: self.hash_secret(&secret),
            is_active: true,
            created_at: Utc::now(),
            expires_at: params.expires_at,
            permissions: params.permissions,
            token_limit: params.token_limit,
            concurrency_limit: params.concurrency_limit,
            rate_limit_window_secs: params.rate_limit_window_secs,
            rate_limit_requests: params.rate_limit_requests,
            daily_cost_limit_micros: params.daily_cost_limit_micros,
            model_restriction: params.model_restriction,
            client_restriction: params.client_restriction,
            bindings: params.bindings,
            tags: params.tags,
            last_used_at: None,
        };
        self.put_key(&record).await?;

        linfo!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "api_key_created",
            "Created new api key",
            key_id = %record.id,
            key_name = %record.name,
        );

        Ok((record, secret))
    }

    /// 写入（或覆盖）密钥记录并维护索引
    pub async fn put_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let key = StoreKey::ApiKey {
            id: record.id.clone(),
        }
        .build();
        self.store
            .hash_set_multiple(&key, &record.to_fields()?)
            .await?;
        self.store
            .hash_set(
                &StoreKey::ApiKeyHashIndex.build(),
                &record.hashed_secret,
                &record.id,
            )
            .await?;
        self.store
            .set_add(&StoreKey::ApiKeyIndex.build(), &record.id)
            .await?;
        Ok(())
    }

    /// 按 id 读取密钥记录
    pub async fn get_key(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        let fields = self
            .store
            .hash_get_all(&StoreKey::ApiKey { id: id.to_string() }.build())
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        ApiKeyRecord::from_fields(&fields).map(Some)
    }

    /// 按哈希读取密钥记录（经索引，O(1)）
    pub async fn find_by_hash(&self, hashed_secret: &str) -> Result<Option<ApiKeyRecord>> {
        let id = self
            .store
            .hash_get(&StoreKey::ApiKeyHashIndex.build(), hashed_secret)
            .await?;
        match id {
            Some(id) => self.get_key(&id).await,
            None => Ok(None),
        }
    }

    /// 按明文密文查找（内部先做哈希）；格式不合法直接返回 None
    pub async fn find_by_secret(&self, secret: &str) -> Result<Option<ApiKeyRecord>> {
        if !self.is_valid_secret_format(secret) {
            return Ok(None);
        }
        self.find_by_hash(&self.hash_secret(secret)).await
    }

    /// 列出全部密钥记录
    pub async fn list_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let ids = self.store.set_members(&StoreKey::ApiKeyIndex.build()).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_key(&id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// 删除密钥记录与索引项
    pub async fn delete_key(&self, id: &str) -> Result<bool> {
        if let Some(record) = self.get_key(id).await? {
            self.store
                .hash_delete(&StoreKey::ApiKeyHashIndex.build(), &record.hashed_secret)
                .await?;
        }
        self.store
            .set_remove(&StoreKey::ApiKeyIndex.build(), id)
            .await?;
        self.store
            .delete(&StoreKey::ApiKey { id: id.to_string() }.build())
            .await
    }

    /// 更新最近使用时间（计费端调用）
    pub async fn touch_last_used(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.store
            .hash_set(
                &StoreKey::ApiKey { id: id.to_string() }.build(),
                "last_used_at",
                &now.to_rfc3339(),
            )
            .await
    }

    /// 惰性清理：把已过期但仍激活的密钥翻转为停用
    ///
    /// 由后台任务按配置间隔调用；准入路径对过期密钥即时拒绝，
    /// 这里只负责把状态落库。返回翻转数量。
    pub async fn disable_expired_keys(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut flipped = 0;
        for record in self.list_keys().await? {
            if record.is_active
                && let Some(expires_at) = record.expires_at
                && expires_at <= now
            {
                self.store
                    .hash_set(
                        &StoreKey::ApiKey {
                            id: record.id.clone(),
                        }
                        .build(),
                        "is_active",
                        "false",
                    )
                    .await?;
                flipped += 1;
                ldebug!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::ApiKey,
                    "expired_key_disabled",
                    "Flipped expired key to disabled",
                    key_id = %record.id,
                );
            }
        }
        Ok(flipped)
    }
}

/// 字节序列 → 小写十六进制
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
