//! # Redis 存储后端
//!
//! 基于 `redis::aio::ConnectionManager` 的生产后端实现。

use std::collections::HashMap;
use std::time::Duration;

use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::error::{GatewayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo};

/// Redis 存储客户端
pub struct RedisStore {
    /// Redis 连接管理器（内部可克隆复用）
    connection_manager: ConnectionManager,
}

impl RedisStore {
    /// 建立 Redis 连接
    pub async fn connect(url: &str) -> Result<Self> {
        linfo!(
            "system",
            LogStage::Store,
            LogComponent::Store,
            "connect_to_redis",
            "Connecting to redis backend",
        );

        let client = Client::open(url)
            .map_err(|e| GatewayError::store_with_source("创建 Redis 客户端失败", e))?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::store_with_source("建立 Redis 连接失败", e))?;

        linfo!(
            "system",
            LogStage::Store,
            LogComponent::Store,
            "redis_connected",
            "Redis connection established",
        );

        Ok(Self { connection_manager })
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("GET 失败: {key}"), e))?;
        Ok(value)
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        if let Some(ttl) = ttl {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(|e| GatewayError::store_with_source(format!("SETEX 失败: {key}"), e))?;
        } else {
            conn.set::<_, _, ()>(key, value)
                .await
                .map_err(|e| GatewayError::store_with_source(format!("SET 失败: {key}"), e))?;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("DEL 失败: {key}"), e))?;
        Ok(deleted > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("EXISTS 失败: {key}"), e))?;
        Ok(exists)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        #[allow(clippy::cast_possible_wrap)]
        let applied: bool = conn
            .expire(key, ttl.as_secs() as i64)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("EXPIRE 失败: {key}"), e))?;
        Ok(applied)
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection_manager.clone();
        let value: i64 = conn
            .incr(key, delta)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("INCRBY 失败: {key}"), e))?;
        Ok(value)
    }

    pub async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection_manager.clone();
        let value: i64 = conn
            .hincr(key, field, delta)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("HINCRBY 失败: {key}"), e))?;
        Ok(value)
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("HSET 失败: {key}"), e))?;
        Ok(())
    }

    pub async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection_manager.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("HMSET 失败: {key}"), e))?;
        Ok(())
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn
            .hget(key, field)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("HGET 失败: {key}"), e))?;
        Ok(value)
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.hdel::<_, _, ()>(key, field)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("HDEL 失败: {key}"), e))?;
        Ok(())
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.connection_manager.clone();
        let value: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("HGETALL 失败: {key}"), e))?;
        Ok(value)
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("SADD 失败: {key}"), e))?;
        Ok(())
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("SREM 失败: {key}"), e))?;
        Ok(())
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let members: Vec<String> = conn
            .smembers(key)
            .await
            .map_err(|e| GatewayError::store_with_source(format!("SMEMBERS 失败: {key}"), e))?;
        Ok(members)
    }

    /// 测试连接
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let response: String = redis::Cmd::new()
            .arg("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::store_with_source("Redis ping 失败", e))?;

        if response == "PONG" {
            Ok(())
        } else {
            lerror!(
                "system",
                LogStage::Store,
                LogComponent::Store,
                "ping_fail",
                "Unexpected redis ping response",
                response = %response,
            );
            Err(GatewayError::store("Redis 连接测试失败"))
        }
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            connection_manager: self.connection_manager.clone(),
        }
    }
}
