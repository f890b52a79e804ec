//! # 键值存储适配层
//!
//! 网关的全部持久状态（密钥/账户记录、用量计数、会话映射、并发额度）
//! 都存放在一个支持 hash、set、TTL 与原子自增的键值存储中。
//! 本模块提供统一门面，内存后端用于测试与单机开发，Redis 后端用于生产。

pub mod client;
pub mod keys;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;
use client::RedisStore;
use memory::MemoryStore;

/// 存储后端枚举 - 避免泛型方法的 trait object 兼容性问题
pub enum StoreBackend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

/// 统一存储门面
pub struct StoreManager {
    backend: StoreBackend,
}

impl StoreManager {
    /// 创建内存后端存储
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory(MemoryStore::new()),
        }
    }

    /// 创建 Redis 后端存储
    pub async fn redis(url: &str) -> Result<Self> {
        Ok(Self {
            backend: StoreBackend::Redis(RedisStore::connect(url).await?),
        })
    }

    /// 获取字符串值
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            StoreBackend::Memory(s) => s.get_string(key),
            StoreBackend::Redis(s) => s.get_string(key).await,
        }
    }

    /// 设置字符串值，`ttl` 为 `None` 时永不过期
    pub async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(s) => s.set_string(key, value, ttl),
            StoreBackend::Redis(s) => s.set_string(key, value, ttl).await,
        }
    }

    /// 获取 JSON 值
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.get_string(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// 设置 JSON 值
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_string(key, &raw, ttl).await
    }

    /// 删除键，返回是否存在
    pub async fn delete(&self, key: &str) -> Result<bool> {
        match &self.backend {
            StoreBackend::Memory(s) => s.delete(key),
            StoreBackend::Redis(s) => s.delete(key).await,
        }
    }

    /// 检查键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match &self.backend {
            StoreBackend::Memory(s) => s.exists(key),
            StoreBackend::Redis(s) => s.exists(key).await,
        }
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match &self.backend {
            StoreBackend::Memory(s) => s.expire(key, ttl),
            StoreBackend::Redis(s) => s.expire(key, ttl).await,
        }
    }

    /// 原子自增计数器，返回增加后的值
    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        match &self.backend {
            StoreBackend::Memory(s) => s.incr_by(key, delta),
            StoreBackend::Redis(s) => s.incr_by(key, delta).await,
        }
    }

    /// 原子自增 hash 字段，返回增加后的值
    pub async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        match &self.backend {
            StoreBackend::Memory(s) => s.hash_incr_by(key, field, delta),
            StoreBackend::Redis(s) => s.hash_incr_by(key, field, delta).await,
        }
    }

    /// 设置单个 hash 字段
    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(s) => s.hash_set(key, field, value),
            StoreBackend::Redis(s) => s.hash_set(key, field, value).await,
        }
    }

    /// 批量设置 hash 字段
    pub async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(s) => s.hash_set_multiple(key, fields),
            StoreBackend::Redis(s) => s.hash_set_multiple(key, fields).await,
        }
    }

    /// 获取单个 hash 字段
    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        match &self.backend {
            StoreBackend::Memory(s) => s.hash_get(key, field),
            StoreBackend::Redis(s) => s.hash_get(key, field).await,
        }
    }

    /// 删除单个 hash 字段
    pub async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(s) => s.hash_delete(key, field),
            StoreBackend::Redis(s) => s.hash_delete(key, field).await,
        }
    }

    /// 获取整个 hash
    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        match &self.backend {
            StoreBackend::Memory(s) => s.hash_get_all(key),
            StoreBackend::Redis(s) => s.hash_get_all(key).await,
        }
    }

    /// 集合添加成员
    pub async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(s) => s.set_add(key, member),
            StoreBackend::Redis(s) => s.set_add(key, member).await,
        }
    }

    /// 集合移除成员
    pub async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(s) => s.set_remove(key, member),
            StoreBackend::Redis(s) => s.set_remove(key, member).await,
        }
    }

    /// 列出集合成员
    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        match &self.backend {
            StoreBackend::Memory(s) => s.set_members(key),
            StoreBackend::Redis(s) => s.set_members(key).await,
        }
    }

    /// 测试连通性
    pub async fn ping(&self) -> Result<()> {
        match &self.backend {
            StoreBackend::Memory(_) => Ok(()),
            StoreBackend::Redis(s) => s.ping().await,
        }
    }

    /// 后端名称（用于 /health 输出）
    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match &self.backend {
            StoreBackend::Memory(_) => "memory",
            StoreBackend::Redis(_) => "redis",
        }
    }
}
