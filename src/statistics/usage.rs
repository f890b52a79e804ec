//! # 用量计费管线
//!
//! 每个已准入请求恰好调用一次 `record`：计算费用、按多维桶原子
//! 自增、刷新最近使用时间，最后释放并发预定。本路径上的存储错误
//! 只记录日志，绝不让计费失败影响用户可见响应。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::accounts::{AccountService, ProviderKind};
use crate::auth::admission::AdmissionTicket;
use crate::auth::api_key::KeyService;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::pricing::PricingService;
use crate::store::{StoreManager, keys::StoreKey};
use crate::{ldebug, lwarn};

use super::types::{ModelUsageRow, Period, TokenUsage, UsageSnapshot};

/// 每日桶保留时长
const DAILY_BUCKET_TTL: Duration = Duration::from_secs(90 * 24 * 3600);

/// 一次请求的计费输入（中止场景各 token 可为零）
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub request_id: String,
    /// 实际服务请求的账户；调度失败或未到调度即中止时为空
    pub account: Option<(ProviderKind, String)>,
    pub model: Option<String>,
    pub tokens: TokenUsage,
}

/// 用量服务（C2 计数 + C8 记录）
pub struct UsageService {
    store: Arc<StoreManager>,
    keys: Arc<KeyService>,
    accounts: Arc<AccountService>,
    pricing: Arc<PricingService>,
}

impl UsageService {
    #[must_use]
    pub const fn new(
        store: Arc<StoreManager>,
        keys: Arc<KeyService>,
        accounts: Arc<AccountService>,
        pricing: Arc<PricingService>,
    ) -> Self {
        Self {
            store,
            keys,
            accounts,
            pricing,
        }
    }

    /// 请求后记账钩子
    ///
    /// 无论计数是否成功，并发预定都在返回前释放——这是准入协议的
    /// 硬性义务，覆盖超时、取消与上游错误路径。
    pub async fn record(&self, ticket: AdmissionTicket, usage: UsageRecord) {
        if let Err(err) = self.try_record(ticket.key_id(), &usage).await {
            lwarn!(
                &usage.request_id,
                LogStage::Accounting,
                LogComponent::Statistics,
                "usage_record_failed",
                "Failed to record usage, counters may under-report",
                key_id = %ticket.key_id(),
                error = %err,
            );
        }
        ticket.release().await;
    }

    async fn try_record(&self, key_id: &str, usage: &UsageRecord) -> Result<()> {
        let now = Utc::now();
        let date = Period::Daily.bucket(now);
        let month = Period::Monthly.bucket(now);

        let cost = self
            .pricing
            .calculate(&usage.request_id, usage.model.as_deref(), &usage.tokens);

        // 密钥维度：生命周期 / 日 / 月
        self.incr_bucket(
            &StoreKey::UsageKeyTotal {
                key_id: key_id.to_string(),
            }
            .build(),
            &usage.tokens,
            cost.total_micros,
            false,
        )
        .await?;
        self.incr_bucket(
            &StoreKey::UsageKeyDaily {
                key_id: key_id.to_string(),
                date: date.clone(),
            }
            .build(),
            &usage.tokens,
            cost.total_micros,
            true,
        )
        .await?;
        self.incr_bucket(
            &StoreKey::UsageKeyMonthly {
                key_id: key_id.to_string(),
                month: month.clone(),
            }
            .build(),
            &usage.tokens,
            cost.total_micros,
            false,
        )
        .await?;

        // 密钥×模型维度
        if let Some(model) = usage.model.as_deref() {
            self.incr_bucket(
                &StoreKey::UsageKeyModelDaily {
                    key_id: key_id.to_string(),
                    model: model.to_string(),
                    date: date.clone(),
                }
                .build(),
                &usage.tokens,
                cost.total_micros,
                true,
            )
            .await?;
            self.incr_bucket(
                &StoreKey::UsageKeyModelMonthly {
                    key_id: key_id.to_string(),
                    model: model.to_string(),
                    month: month.clone(),
                }
                .build(),
                &usage.tokens,
                cost.total_micros,
                false,
            )
            .await?;
            self.store
                .set_add(
                    &StoreKey::UsageKeyModelIndex {
                        key_id: key_id.to_string(),
                    }
                    .build(),
                    model,
                )
                .await?;
        }

        // 当日费用计数（准入检查读取的就是这个值）
        if cost.total_micros > 0 {
            let cost_key = StoreKey::CostDaily {
                key_id: key_id.to_string(),
                date: date.clone(),
            }
            .build();
            let total = self
                .store
                .incr_by(&cost_key, i64::try_from(cost.total_micros).unwrap_or(i64::MAX))
                .await?;
            if u64::try_from(total).unwrap_or(0) == cost.total_micros {
                let _ = self.store.expire(&cost_key, DAILY_BUCKET_TTL).await;
            }
        }

        // 账户维度与账户最近使用时间
        if let Some((provider, account_id)) = &usage.account {
            self.incr_bucket(
                &StoreKey::UsageAccountTotal {
                    account_id: account_id.clone(),
                }
                .build(),
                &usage.tokens,
                cost.total_micros,
                false,
            )
            .await?;
            self.incr_bucket(
                &StoreKey::UsageAccountDaily {
                    account_id: account_id.clone(),
                    date,
                }
                .build(),
                &usage.tokens,
                cost.total_micros,
                true,
            )
            .await?;
            self.incr_bucket(
                &StoreKey::UsageAccountMonthly {
                    account_id: account_id.clone(),
                    month,
                }
                .build(),
                &usage.tokens,
                cost.total_micros,
                false,
            )
            .await?;
            self.accounts
                .touch_last_used(*provider, account_id, now)
                .await?;
        }

        // 密钥最近使用时间
        self.keys.touch_last_used(key_id, now).await?;

        ldebug!(
            &usage.request_id,
            LogStage::Accounting,
            LogComponent::Statistics,
            "usage_recorded",
            "Recorded request usage",
            key_id = %key_id,
            all_tokens = usage.tokens.total(),
            cost_micros = cost.total_micros,
        );

        Ok(())
    }

    /// 对一个计数桶做原子自增；`ttl_on_first` 为真时在首次写入后设 TTL
    async fn incr_bucket(
        &self,
        key: &str,
        tokens: &TokenUsage,
        cost_micros: u64,
        ttl_on_first: bool,
    ) -> Result<()> {
        let requests = self.store.hash_incr_by(key, "requests", 1).await?;
        let mut fields: Vec<(&str, u64)> = Vec::with_capacity(6);
        if tokens.input_tokens > 0 {
            fields.push(("inputTokens", tokens.input_tokens));
        }
        if tokens.output_tokens > 0 {
            fields.push(("outputTokens", tokens.output_tokens));
        }
        if tokens.cache_create_tokens > 0 {
            fields.push(("cacheCreateTokens", tokens.cache_create_tokens));
        }
        if tokens.cache_read_tokens > 0 {
            fields.push(("cacheReadTokens", tokens.cache_read_tokens));
        }
        if tokens.total() > 0 {
            fields.push(("allTokens", tokens.total()));
        }
        if cost_micros > 0 {
            fields.push(("costMicros", cost_micros));
        }
        for (field, delta) in fields {
            self.store
                .hash_incr_by(key, field, i64::try_from(delta).unwrap_or(i64::MAX))
                .await?;
        }
        if ttl_on_first && requests == 1 {
            let _ = self.store.expire(key, DAILY_BUCKET_TTL).await;
        }
        Ok(())
    }

    /// 密钥生命周期用量
    pub async fn lifetime(&self, key_id: &str) -> Result<UsageSnapshot> {
        let fields = self
            .store
            .hash_get_all(
                &StoreKey::UsageKeyTotal {
                    key_id: key_id.to_string(),
                }
                .build(),
            )
            .await?;
        Ok(UsageSnapshot::from_hash(&fields))
    }

    /// 密钥在指定周期（当前桶）的用量
    pub async fn period_usage(
        &self,
        key_id: &str,
        period: Period,
        at: DateTime<Utc>,
    ) -> Result<UsageSnapshot> {
        let key = match period {
            Period::Daily => StoreKey::UsageKeyDaily {
                key_id: key_id.to_string(),
                date: period.bucket(at),
            },
            Period::Monthly => StoreKey::UsageKeyMonthly {
                key_id: key_id.to_string(),
                month: period.bucket(at),
            },
        };
        let fields = self.store.hash_get_all(&key.build()).await?;
        Ok(UsageSnapshot::from_hash(&fields))
    }

    /// 密钥当日费用（微美元）
    pub async fn daily_cost_micros(&self, key_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let raw = self
            .store
            .get_string(
                &StoreKey::CostDaily {
                    key_id: key_id.to_string(),
                    date: Period::Daily.bucket(at),
                }
                .build(),
            )
            .await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
    }

    /// 按模型维度的用量分解，按 `all_tokens` 降序
    pub async fn model_usage(
        &self,
        key_id: &str,
        period: Period,
        at: DateTime<Utc>,
    ) -> Result<Vec<ModelUsageRow>> {
        let models = self
            .store
            .set_members(
                &StoreKey::UsageKeyModelIndex {
                    key_id: key_id.to_string(),
                }
                .build(),
            )
            .await?;

        let bucket = period.bucket(at);
        let mut rows = Vec::with_capacity(models.len());
        for model in models {
            let key = match period {
                Period::Daily => StoreKey::UsageKeyModelDaily {
                    key_id: key_id.to_string(),
                    model: model.clone(),
                    date: bucket.clone(),
                },
                Period::Monthly => StoreKey::UsageKeyModelMonthly {
                    key_id: key_id.to_string(),
                    model: model.clone(),
                    month: bucket.clone(),
                },
            };
            let snapshot = UsageSnapshot::from_hash(&self.store.hash_get_all(&key.build()).await?);
            if !snapshot.is_empty() {
                rows.push(ModelUsageRow {
                    model,
                    usage: snapshot,
                });
            }
        }
        rows.sort_by(|a, b| b.usage.all_tokens.cmp(&a.usage.all_tokens));
        Ok(rows)
    }

    /// 账户生命周期用量
    pub async fn account_lifetime(&self, account_id: &str) -> Result<UsageSnapshot> {
        let fields = self
            .store
            .hash_get_all(
                &StoreKey::UsageAccountTotal {
                    account_id: account_id.to_string(),
                }
                .build(),
            )
            .await?;
        Ok(UsageSnapshot::from_hash(&fields))
    }
}
