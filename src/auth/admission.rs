//! # 请求准入管线
//!
//! 按固定顺序执行：格式校验 → 哈希查找 → 激活/过期 → 平台权限 →
//! 模型限制 → 客户端限制 → 配额（token / 当日费用 / 滑动窗口）→
//! 并发预定。准入成功返回携带并发释放义务的 `AdmissionTicket`。
//!
//! 配额检查是咨询性的：读取的是最近已提交的计数，竞态下允许有界
//! 超量，单调收敛即可。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::accounts::Platform;
use crate::error::{GatewayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::statistics::UsageService;
use crate::store::{StoreManager, keys::StoreKey};
use crate::{ldebug, lwarn};

use super::api_key::KeyService;
use super::rate_limit::SlidingWindowLimiter;
use super::types::ApiKeyRecord;

/// 准入请求上下文
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub request_id: String,
    pub platform: Platform,
    pub requested_model: Option<String>,
    pub user_agent: Option<String>,
    pub client_ip: String,
}

/// 并发释放凭据
///
/// 准入时并发额度 +1，凭据被消费（计费或中止路径）时恰好一次 -1。
/// `AtomicBool` 保证重复调用只生效一次；持有凭据的 future 被直接
/// 丢弃（客户端断连、任务取消）时由 `Drop` 兜底释放。
pub struct AdmissionTicket {
    key_id: String,
    store: Arc<StoreManager>,
    released: AtomicBool,
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("key_id", &self.key_id)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl AdmissionTicket {
    const fn new(key_id: String, store: Arc<StoreManager>) -> Self {
        Self {
            key_id,
            store,
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// 释放并发预定；幂等，首次调用生效
    ///
    /// 计费路径的释放失败只记录日志。
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let key = StoreKey::Concurrency {
            key_id: self.key_id.clone(),
        }
        .build();
        if let Err(err) = self.store.incr_by(&key, -1).await {
            lwarn!(
                "system",
                LogStage::Accounting,
                LogComponent::Admission,
                "concurrency_release_failed",
                "Failed to release concurrency reservation",
                key_id = %self.key_id,
                error = %err,
            );
        }
    }

    /// 是否已释放（测试与诊断用）
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for AdmissionTicket {
    /// 未经显式释放即被丢弃时的兜底路径
    ///
    /// `Drop` 是同步上下文，无法等待存储 I/O，因此把释放动作投递到
    /// 运行时后台执行；不在运行时内（进程退出尾声）则只能告警。
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let key = StoreKey::Concurrency {
            key_id: std::mem::take(&mut self.key_id),
        }
        .build();
        let store = self.store.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = store.incr_by(&key, -1).await {
                    lwarn!(
                        "system",
                        LogStage::Accounting,
                        LogComponent::Admission,
                        "concurrency_drop_release_failed",
                        "Failed to release concurrency reservation on drop",
                        key = %key,
                        error = %err,
                    );
                }
            });
        } else {
            lwarn!(
                "system",
                LogStage::Accounting,
                LogComponent::Admission,
                "concurrency_drop_no_runtime",
                "Admission ticket dropped outside runtime, reservation may leak",
                key = %key,
            );
        }
    }
}

/// 准入结果
#[derive(Debug)]
pub struct Admission {
    pub key: ApiKeyRecord,
    pub ticket: AdmissionTicket,
}

/// 准入服务
pub struct AdmissionService {
    store: Arc<StoreManager>,
    keys: Arc<KeyService>,
    usage: Arc<UsageService>,
    limiter: SlidingWindowLimiter,
}

impl AdmissionService {
    #[must_use]
    pub fn new(
        store: Arc<StoreManager>,
        keys: Arc<KeyService>,
        usage: Arc<UsageService>,
    ) -> Self {
        let limiter = SlidingWindowLimiter::new(store.clone());
        Self {
            store,
            keys,
            usage,
            limiter,
        }
    }

    /// 执行准入
    pub async fn admit(&self, secret: &str, request: &AdmissionRequest) -> Result<Admission> {
        let now = Utc::now();

        // 1/2. 格式与哈希查找。未知密钥与格式错误在响应上不可区分，
        //      但在安全通道分别记录来源 IP。
        if !self.keys.is_valid_secret_format(secret) {
            lwarn!(
                &request.request_id,
                LogStage::Authentication,
                LogComponent::Security,
                "bad_secret_format",
                "Rejected api key with invalid format",
                client_ip = %request.client_ip,
            );
            return Err(GatewayError::unauthorized("密钥格式无效"));
        }
        let Some(key) = self.keys.find_by_secret(secret).await? else {
            lwarn!(
                &request.request_id,
                LogStage::Authentication,
                LogComponent::Security,
                "unknown_api_key",
                "Rejected unknown api key",
                client_ip = %request.client_ip,
            );
            return Err(GatewayError::unauthorized("密钥不存在"));
        };

        // 3. 激活与过期。过期时间等于当前时刻即视为过期；状态翻转
        //    交给后台清理任务。
        if !key.is_active {
            return Err(GatewayError::disabled(format!("密钥 {} 已停用", key.id)));
        }
        if let Some(expires_at) = key.expires_at
            && expires_at <= now
        {
            return Err(GatewayError::expired(format!("密钥 {} 已过期", key.id)));
        }

        // 4. 平台权限
        if !key.permissions.covers(request.platform) {
            return Err(GatewayError::forbidden(format!(
                "密钥 {} 无权访问 {} 平台",
                key.id, request.platform
            )));
        }

        // 5. 模型限制（拒绝列表语义）
        if key
            .model_restriction
            .denies(request.requested_model.as_deref())
        {
            return Err(GatewayError::model_not_allowed(format!(
                "Model {} is not allowed for this key",
                request.requested_model.as_deref().unwrap_or("<unknown>")
            )));
        }

        // 6. 客户端限制
        if key
            .client_restriction
            .denies(request.user_agent.as_deref())
        {
            return Err(GatewayError::client_not_allowed(format!(
                "密钥 {} 拒绝客户端 {:?}",
                key.id, request.user_agent
            )));
        }

        // 7. 配额：生命周期 token、当日费用、滑动窗口。上限为 0 表示不限。
        if key.token_limit > 0 {
            let lifetime = self.usage.lifetime(&key.id).await?;
            if lifetime.all_tokens >= key.token_limit {
                return Err(GatewayError::token_limit_exceeded(format!(
                    "密钥 {} token 用量 {} 达到上限 {}",
                    key.id, lifetime.all_tokens, key.token_limit
                )));
            }
        }
        if key.daily_cost_limit_micros > 0 {
            let spent = self.usage.daily_cost_micros(&key.id, now).await?;
            if spent >= key.daily_cost_limit_micros {
                return Err(GatewayError::daily_cost_exceeded(format!(
                    "密钥 {} 当日费用 {} 微美元达到上限 {}",
                    key.id, spent, key.daily_cost_limit_micros
                )));
            }
        }
        let window = self
            .limiter
            .check(
                &key.id,
                key.rate_limit_window_secs,
                key.rate_limit_requests,
                now,
            )
            .await?;
        if !window.allowed {
            return Err(GatewayError::rate_limited(format!(
                "密钥 {} 窗口内请求 {}/{}",
                key.id, window.current, window.limit
            )));
        }
        // 8. 并发预定：原子 +1 后检查，超限立即回退一次。
        //    竞态下至多多放行一个，属文档化契约。
        let concurrency_key = StoreKey::Concurrency {
            key_id: key.id.clone(),
        }
        .build();
        let current = self.store.incr_by(&concurrency_key, 1).await?;
        if key.concurrency_limit > 0 && current > i64::from(key.concurrency_limit) {
            self.store.incr_by(&concurrency_key, -1).await?;
            return Err(GatewayError::concurrency_exceeded(format!(
                "密钥 {} 并发 {} 超过上限 {}",
                key.id, current, key.concurrency_limit
            )));
        }

        // 窗口计数只记已准入的请求，被任何一步拒绝的请求不消耗窗口额度。
        // 计数写入失败时回退刚拿到的并发预定再报错。
        if let Err(err) = self
            .limiter
            .record(&key.id, key.rate_limit_window_secs, now)
            .await
        {
            if let Err(revert_err) = self.store.incr_by(&concurrency_key, -1).await {
                lwarn!(
                    &request.request_id,
                    LogStage::Admission,
                    LogComponent::Admission,
                    "concurrency_revert_failed",
                    "Failed to revert concurrency reservation after window write error",
                    key_id = %key.id,
                    error = %revert_err,
                );
            }
            return Err(err);
        }

        ldebug!(
            &request.request_id,
            LogStage::Admission,
            LogComponent::Admission,
            "request_admitted",
            "Request admitted",
            key_id = %key.id,
            platform = request.platform.as_str(),
            concurrency = current,
        );

        let ticket = AdmissionTicket::new(key.id.clone(), self.store.clone());
        Ok(Admission { key, ticket })
    }

    /// 当前并发读数（诊断用）
    pub async fn concurrency(&self, key_id: &str) -> Result<i64> {
        let raw = self
            .store
            .get_string(
                &StoreKey::Concurrency {
                    key_id: key_id.to_string(),
                }
                .build(),
            )
            .await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
    }
}
