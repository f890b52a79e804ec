//! # 上游账户存储服务
//!
//! 账户与分组记录的类型化存取（hash 字段 ↔ 结构体），以及
//! 每账户限流标记的写入与窗口过后的惰性恢复。
//!
//! 字段约定：结构性字段（id / 凭据 / 布尔 / 数值）解析失败视为存储
//! 损坏并报错；`model_support` 等不透明 JSON 字段解析失败降级为默认值。

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{GatewayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::store::{StoreManager, keys::StoreKey};
use crate::{ldebug, linfo, lwarn};

use super::types::{
    AccountGroup, AccountKind, AccountStatus, ModelSupport, Platform, ProviderKind,
    RateLimitState, RateLimitStatus, UpstreamAccount,
};

/// 账户服务
pub struct AccountService {
    store: Arc<StoreManager>,
    /// 账户限流标记的有效窗口
    rate_limit_window: Duration,
}

impl AccountService {
    #[must_use]
    pub const fn new(store: Arc<StoreManager>, rate_limit_window: Duration) -> Self {
        Self {
            store,
            rate_limit_window,
        }
    }

    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    /// 写入（或覆盖）账户记录并维护平台索引
    pub async fn upsert_account(&self, account: &UpstreamAccount) -> Result<()> {
        let provider = account.provider();
        let key = StoreKey::Account {
            platform: provider.as_str().to_string(),
            id: account.id.clone(),
        }
        .build();
        self.store
            .hash_set_multiple(&key, &account_to_fields(account)?)
            .await?;
        self.store
            .set_add(
                &StoreKey::AccountIndex {
                    platform: provider.as_str().to_string(),
                }
                .build(),
                &account.id,
            )
            .await?;
        Ok(())
    }

    /// 读取账户记录；不存在返回 `None`
    pub async fn get_account(
        &self,
        provider: ProviderKind,
        id: &str,
    ) -> Result<Option<UpstreamAccount>> {
        let key = StoreKey::Account {
            platform: provider.as_str().to_string(),
            id: id.to_string(),
        }
        .build();
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        account_from_fields(&fields).map(Some)
    }

    /// 删除账户记录与索引项
    pub async fn delete_account(&self, provider: ProviderKind, id: &str) -> Result<bool> {
        self.store
            .set_remove(
                &StoreKey::AccountIndex {
                    platform: provider.as_str().to_string(),
                }
                .build(),
                id,
            )
            .await?;
        self.store
            .delete(
                &StoreKey::Account {
                    platform: provider.as_str().to_string(),
                    id: id.to_string(),
                }
                .build(),
            )
            .await
    }

    /// 列出某提供方的全部账户
    pub async fn list_provider(&self, provider: ProviderKind) -> Result<Vec<UpstreamAccount>> {
        let ids = self
            .store
            .set_members(
                &StoreKey::AccountIndex {
                    platform: provider.as_str().to_string(),
                }
                .build(),
            )
            .await?;
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = self.get_account(provider, &id).await? {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    /// 列出某平台的全部账户（Claude 平台合并两类变体）
    pub async fn list_platform(&self, platform: Platform) -> Result<Vec<UpstreamAccount>> {
        let mut accounts = Vec::new();
        for provider in platform.providers() {
            accounts.extend(self.list_provider(*provider).await?);
        }
        Ok(accounts)
    }

    /// 标记账户限流（收到 429 类信号或会话边界时由计费端调用）
    pub async fn mark_limited(&self, provider: ProviderKind, id: &str) -> Result<()> {
        let key = StoreKey::Account {
            platform: provider.as_str().to_string(),
            id: id.to_string(),
        }
        .build();
        self.store
            .hash_set_multiple(
                &key,
                &[
                    ("rate_limit_status".to_string(), "limited".to_string()),
                    ("rate_limited_at".to_string(), Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        linfo!(
            "system",
            LogStage::Scheduling,
            LogComponent::Accounts,
            "account_rate_limited",
            "Marked upstream account as rate limited",
            provider = provider.as_str(),
            account_id = %id,
        );
        Ok(())
    }

    /// 强制清除限流标记
    pub async fn clear_limited(&self, provider: ProviderKind, id: &str) -> Result<()> {
        let key = StoreKey::Account {
            platform: provider.as_str().to_string(),
            id: id.to_string(),
        }
        .build();
        self.store
            .hash_set_multiple(
                &key,
                &[
                    ("rate_limit_status".to_string(), "normal".to_string()),
                    ("rate_limited_at".to_string(), String::new()),
                ],
            )
            .await?;
        Ok(())
    }

    /// 读取时的惰性恢复：窗口已过的 limited 标记写回 normal
    ///
    /// 返回账户当前是否处于限流中。写回失败只记录日志。
    pub async fn rate_limited_now(&self, account: &UpstreamAccount, now: DateTime<Utc>) -> bool {
        if account.rate_limit.status != RateLimitStatus::Limited {
            return false;
        }
        if account.rate_limit.is_limited(now, self.rate_limit_window) {
            return true;
        }
        // 窗口已过，顺手恢复
        if let Err(err) = self.clear_limited(account.provider(), &account.id).await {
            ldebug!(
                "system",
                LogStage::Scheduling,
                LogComponent::Accounts,
                "lazy_clear_failed",
                "Failed to lazily clear expired rate limit flag",
                account_id = %account.id,
                error = %err,
            );
        }
        false
    }

    /// 更新账户最近使用时间（计费端调用，容忍最终一致）
    pub async fn touch_last_used(
        &self,
        provider: ProviderKind,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = StoreKey::Account {
            platform: provider.as_str().to_string(),
            id: id.to_string(),
        }
        .build();
        self.store
            .hash_set(&key, "last_used_at", &now.to_rfc3339())
            .await
    }

    /// 写入（或覆盖）账户分组
    pub async fn upsert_group(&self, group: &AccountGroup) -> Result<()> {
        let key = StoreKey::AccountGroup {
            id: group.id.clone(),
        }
        .build();
        self.store
            .hash_set_multiple(
                &key,
                &[
                    ("name".to_string(), group.name.clone()),
                    ("platform".to_string(), group.platform.as_str().to_string()),
                ],
            )
            .await?;
        let members_key = StoreKey::AccountGroupMembers {
            id: group.id.clone(),
        }
        .build();
        for (provider, account_id) in &group.members {
            self.store
                .set_add(&members_key, &format!("{}:{account_id}", provider.as_str()))
                .await?;
        }
        Ok(())
    }

    /// 读取账户分组；不存在返回 `None`
    pub async fn get_group(&self, id: &str) -> Result<Option<AccountGroup>> {
        let fields = self
            .store
            .hash_get_all(&StoreKey::AccountGroup { id: id.to_string() }.build())
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let name = fields.get("name").cloned().unwrap_or_default();
        let platform = match fields.get("platform").map(String::as_str) {
            Some("claude") => Platform::Claude,
            Some("openai") => Platform::OpenAi,
            Some("gemini") => Platform::Gemini,
            other => {
                return Err(GatewayError::internal(format!(
                    "账户分组 {id} 平台字段无效: {other:?}"
                )));
            }
        };

        let raw_members = self
            .store
            .set_members(
                &StoreKey::AccountGroupMembers { id: id.to_string() }.build(),
            )
            .await?;
        let mut members = Vec::with_capacity(raw_members.len());
        for raw in raw_members {
            match raw.split_once(':') {
                Some((provider, account_id)) => match ProviderKind::from_str(provider) {
                    Ok(provider) => members.push((provider, account_id.to_string())),
                    Err(_) => {
                        lwarn!(
                            "system",
                            LogStage::Scheduling,
                            LogComponent::Accounts,
                            "group_member_bad_provider",
                            "Skipping group member with unknown provider",
                            group_id = %id,
                            member = %raw,
                        );
                    }
                },
                None => {
                    lwarn!(
                        "system",
                        LogStage::Scheduling,
                        LogComponent::Accounts,
                        "group_member_malformed",
                        "Skipping malformed group member entry",
                        group_id = %id,
                        member = %raw,
                    );
                }
            }
        }

        Ok(Some(AccountGroup {
            id: id.to_string(),
            name,
            platform,
            members,
        }))
    }

    /// 删除账户分组
    pub async fn delete_group(&self, id: &str) -> Result<()> {
        self.store
            .delete(&StoreKey::AccountGroup { id: id.to_string() }.build())
            .await?;
        self.store
            .delete(&StoreKey::AccountGroupMembers { id: id.to_string() }.build())
            .await?;
        Ok(())
    }
}

/// 账户记录 → hash 字段
fn account_to_fields(account: &UpstreamAccount) -> Result<Vec<(String, String)>> {
    Ok(vec![
        ("id".to_string(), account.id.clone()),
        ("name".to_string(), account.name.clone()),
        ("provider".to_string(), account.provider().as_str().to_string()),
        ("is_active".to_string(), account.is_active.to_string()),
        ("status".to_string(), account.status.to_string()),
        ("kind".to_string(), account.kind.to_string()),
        ("schedulable".to_string(), account.schedulable.to_string()),
        ("priority".to_string(), account.priority.to_string()),
        (
            "last_used_at".to_string(),
            account
                .last_used_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ),
        (
            "rate_limit_status".to_string(),
            match account.rate_limit.status {
                RateLimitStatus::Normal => "normal".to_string(),
                RateLimitStatus::Limited => "limited".to_string(),
            },
        ),
        (
            "rate_limited_at".to_string(),
            account
                .rate_limit
                .limited_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ),
        (
            "model_support".to_string(),
            serde_json::to_string(&account.model_support)?,
        ),
        (
            "credentials".to_string(),
            serde_json::to_string(&account.credentials)?,
        ),
    ])
}

/// hash 字段 → 账户记录
fn account_from_fields(fields: &HashMap<String, String>) -> Result<UpstreamAccount> {
    let structural = |name: &str| -> Result<&String> {
        fields
            .get(name)
            .ok_or_else(|| GatewayError::internal(format!("账户记录缺少字段 {name}")))
    };

    let id = structural("id")?.clone();
    let name = fields.get("name").cloned().unwrap_or_default();
    let is_active = parse_bool(structural("is_active")?)
        .ok_or_else(|| GatewayError::internal(format!("账户 {id} is_active 字段无效")))?;
    let status = structural("status")?
        .parse::<AccountStatus>()
        .map_err(GatewayError::internal)?;
    let kind = fields
        .get("kind")
        .map_or(Ok(AccountKind::Shared), |raw| {
            raw.parse::<AccountKind>().map_err(GatewayError::internal)
        })?;
    let schedulable = fields
        .get("schedulable")
        .map_or(Some(true), |raw| parse_bool(raw))
        .ok_or_else(|| GatewayError::internal(format!("账户 {id} schedulable 字段无效")))?;
    let priority = structural("priority")?
        .parse::<i32>()
        .map_err(|_| GatewayError::internal(format!("账户 {id} priority 字段无效")))?;
    let last_used_at = parse_optional_instant(fields.get("last_used_at"));

    let rate_limit = RateLimitState {
        status: match fields.get("rate_limit_status").map(String::as_str) {
            Some("limited") => RateLimitStatus::Limited,
            _ => RateLimitStatus::Normal,
        },
        limited_at: parse_optional_instant(fields.get("rate_limited_at")),
    };

    // 不透明 JSON 字段：解析失败降级为"支持全部"
    let model_support = fields
        .get("model_support")
        .filter(|raw| !raw.is_empty())
        .map_or(ModelSupport::All, |raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| {
                lwarn!(
                    "system",
                    LogStage::Scheduling,
                    LogComponent::Accounts,
                    "model_support_parse_failed",
                    "Invalid model_support json, treating as all-models",
                    account_id = %id,
                );
                ModelSupport::All
            })
        });

    let credentials = serde_json::from_str(structural("credentials")?)
        .map_err(|e| GatewayError::internal_with_source(format!("账户 {id} 凭据字段损坏"), e))?;

    Ok(UpstreamAccount {
        id,
        name,
        is_active,
        status,
        kind,
        schedulable,
        priority,
        last_used_at,
        rate_limit,
        model_support,
        credentials,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_optional_instant(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::types::AccountCredentials;

    fn sample_account() -> UpstreamAccount {
        UpstreamAccount {
            id: "acct-1".to_string(),
            name: "主力账号".to_string(),
            is_active: true,
            status: AccountStatus::Active,
            kind: AccountKind::Shared,
            schedulable: true,
            priority: 50,
            last_used_at: Some(Utc::now()),
            rate_limit: RateLimitState::default(),
            model_support: ModelSupport::Allowed(vec!["gpt-4o".to_string()]),
            credentials: AccountCredentials::Openai {
                api_key: "sk-upstream".to_string(),
            },
        }
    }

    #[test]
    fn test_account_fields_roundtrip() {
        let account = sample_account();
        let fields: HashMap<String, String> =
            account_to_fields(&account).unwrap().into_iter().collect();
        let restored = account_from_fields(&fields).unwrap();

        assert_eq!(restored.id, account.id);
        assert_eq!(restored.provider(), ProviderKind::OpenAi);
        assert_eq!(restored.priority, 50);
        assert!(restored.model_support.supports(Some("gpt-4o")));
        assert!(!restored.model_support.supports(Some("gpt-4o-mini")));
    }

    #[test]
    fn test_bad_model_support_degrades_to_all() {
        let account = sample_account();
        let mut fields: HashMap<String, String> =
            account_to_fields(&account).unwrap().into_iter().collect();
        fields.insert("model_support".to_string(), "{not json".to_string());

        let restored = account_from_fields(&fields).unwrap();
        assert!(restored.model_support.supports(Some("anything")));
    }

    #[test]
    fn test_broken_credentials_is_loud() {
        let account = sample_account();
        let mut fields: HashMap<String, String> =
            account_to_fields(&account).unwrap().into_iter().collect();
        fields.insert("credentials".to_string(), "{not json".to_string());
        assert!(account_from_fields(&fields).is_err());
    }

    #[tokio::test]
    async fn test_mark_and_lazy_clear() {
        let store = Arc::new(StoreManager::memory());
        let service = AccountService::new(store, Duration::from_secs(3600));
        let mut account = sample_account();
        service.upsert_account(&account).await.unwrap();

        service
            .mark_limited(ProviderKind::OpenAi, &account.id)
            .await
            .unwrap();
        let stored = service
            .get_account(ProviderKind::OpenAi, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.rate_limit.status, RateLimitStatus::Limited);
        assert!(service.rate_limited_now(&stored, Utc::now()).await);

        // 模拟窗口已过：把标记时间改写到 2 小时前
        account.rate_limit = RateLimitState {
            status: RateLimitStatus::Limited,
            limited_at: Some(Utc::now() - chrono::Duration::hours(2)),
        };
        service.upsert_account(&account).await.unwrap();
        let stale = service
            .get_account(ProviderKind::OpenAi, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!service.rate_limited_now(&stale, Utc::now()).await);

        // 惰性恢复已写回 normal
        let cleared = service
            .get_account(ProviderKind::OpenAi, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared.rate_limit.status, RateLimitStatus::Normal);
    }
}
