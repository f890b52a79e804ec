//! # 会话粘滞映射
//!
//! 请求指纹 → 账户的有界 TTL 映射。命中复用**不刷新** TTL，
//! 保证粘滞窗口与活跃度无关，长会话最终会重新散列到池中。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accounts::{Platform, ProviderKind};
use crate::error::Result;
use crate::store::{StoreManager, keys::StoreKey};

/// 粘滞映射值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMapping {
    pub account_id: String,
    pub account_type: ProviderKind,
}

/// 会话映射表
pub struct SessionMap {
    store: Arc<StoreManager>,
    ttl: Duration,
}

impl SessionMap {
    #[must_use]
    pub const fn new(store: Arc<StoreManager>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// 每平台独立的键前缀，避免调度器实例之间互相污染
    #[must_use]
    pub const fn prefix(platform: Platform) -> &'static str {
        match platform {
            Platform::Claude => "unified_claude_session_mapping:",
            Platform::OpenAi => "unified_openai_session_mapping:",
            Platform::Gemini => "unified_gemini_session_mapping:",
        }
    }

    fn key(platform: Platform, session_hash: &str) -> String {
        StoreKey::SessionMapping {
            prefix: Self::prefix(platform),
            session_hash: session_hash.to_string(),
        }
        .build()
    }

    pub async fn get(
        &self,
        platform: Platform,
        session_hash: &str,
    ) -> Result<Option<SessionMapping>> {
        self.store.get_json(&Self::key(platform, session_hash)).await
    }

    /// 写入映射并设置 TTL（仅新建时调用）
    pub async fn set(
        &self,
        platform: Platform,
        session_hash: &str,
        mapping: &SessionMapping,
    ) -> Result<()> {
        self.store
            .set_json(&Self::key(platform, session_hash), mapping, Some(self.ttl))
            .await
    }

    pub async fn delete(&self, platform: Platform, session_hash: &str) -> Result<bool> {
        self.store.delete(&Self::key(platform, session_hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_map_roundtrip() {
        let store = Arc::new(StoreManager::memory());
        let map = SessionMap::new(store.clone(), Duration::from_secs(3600));
        let mapping = SessionMapping {
            account_id: "acct-1".to_string(),
            account_type: ProviderKind::ClaudeOauth,
        };

        map.set(Platform::Claude, "h1", &mapping).await.unwrap();
        assert_eq!(
            map.get(Platform::Claude, "h1").await.unwrap(),
            Some(mapping.clone())
        );
        // 平台前缀互不可见
        assert_eq!(map.get(Platform::OpenAi, "h1").await.unwrap(), None);

        assert!(map.delete(Platform::Claude, "h1").await.unwrap());
        assert_eq!(map.get(Platform::Claude, "h1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mapping_wire_format() {
        // 持久化格式与既有部署兼容：camelCase 字段名
        let store = Arc::new(StoreManager::memory());
        let map = SessionMap::new(store.clone(), Duration::from_secs(3600));
        map.set(
            Platform::OpenAi,
            "h2",
            &SessionMapping {
                account_id: "acct-9".to_string(),
                account_type: ProviderKind::OpenAi,
            },
        )
        .await
        .unwrap();

        let raw = store
            .get_string("unified_openai_session_mapping:h2")
            .await
            .unwrap()
            .unwrap();
        assert!(raw.contains("\"accountId\":\"acct-9\""));
        assert!(raw.contains("\"accountType\":\"openai\""));
    }
}
