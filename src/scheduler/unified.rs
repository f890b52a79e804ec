//! # 统一账户调度器
//!
//! 解析优先序：专属个体绑定 → 分组绑定限定候选池 → 会话粘滞 →
//! 共享池。候选按 (priority 升序, last_used_at 升序, id) 稳定排序。
//! 规则命中但账户不合格时降级继续，不中断请求。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::accounts::{AccountKind, AccountService, Platform, UpstreamAccount};
use crate::auth::AccountBinding;
use crate::error::{GatewayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

use super::session::{SessionMap, SessionMapping};
use super::types::{ScheduleRequest, Selection};

/// 统一调度器
pub struct UnifiedScheduler {
    accounts: Arc<AccountService>,
    sessions: SessionMap,
}

impl UnifiedScheduler {
    #[must_use]
    pub const fn new(accounts: Arc<AccountService>, sessions: SessionMap) -> Self {
        Self { accounts, sessions }
    }

    /// 为请求选择一个上游账户
    pub async fn select(&self, request: &ScheduleRequest<'_>) -> Result<Selection> {
        let now = Utc::now();

        linfo!(
            request.request_id,
            LogStage::Scheduling,
            LogComponent::Scheduler,
            "start_selection",
            "Starting account selection",
            key_id = %request.key.id,
            platform = request.platform.as_str(),
            requested_model = ?request.requested_model,
            has_session = request.session_hash.is_some(),
        );

        // 规则 1：专属个体绑定，按平台内固定提供方顺序。
        // 绑定账户缺失或不合格时告警降级，不中断。
        if let Some(selection) = self.try_dedicated_bindings(request, now).await? {
            return Ok(selection);
        }

        // 规则 2：分组绑定限定候选池；无分组时取平台共享池。
        let (candidates, group_restricted) = self.load_candidates(request).await?;
        ldebug!(
            request.request_id,
            LogStage::Scheduling,
            LogComponent::Scheduler,
            "candidates_loaded",
            "Loaded candidate accounts",
            count = candidates.len(),
            group_restricted,
        );

        // 规则 3：会话粘滞。映射的账户必须仍在候选池内且合格；
        // 否则删除映射并继续。命中复用不重写映射（TTL 不刷新）。
        if let Some(session_hash) = request.session_hash
            && let Some(mapping) = self.sessions.get(request.platform, session_hash).await?
        {
            let mapped = candidates.iter().find(|account| {
                account.id == mapping.account_id && account.provider() == mapping.account_type
            });
            match mapped {
                Some(account) if self.eligible(account, request, now).await => {
                    ldebug!(
                        request.request_id,
                        LogStage::Scheduling,
                        LogComponent::Scheduler,
                        "sticky_hit",
                        "Reusing session-mapped account",
                        account_id = %account.id,
                    );
                    return Ok(Selection::from_account(account));
                }
                _ => {
                    lwarn!(
                        request.request_id,
                        LogStage::Scheduling,
                        LogComponent::SessionMap,
                        "sticky_invalidated",
                        "Session-mapped account no longer eligible, dropping mapping",
                        account_id = %mapping.account_id,
                    );
                    self.sessions.delete(request.platform, session_hash).await?;
                }
            }
        }

        // 规则 4：池内按资格过滤后排序取首。
        let mut eligible = Vec::with_capacity(candidates.len());
        for account in candidates {
            if self.eligible(&account, request, now).await {
                eligible.push(account);
            }
        }
        if eligible.is_empty() {
            let message = request.requested_model.map_or_else(
                || "No available upstream accounts".to_string(),
                |model| format!("No available upstream accounts for model {model}"),
            );
            return Err(GatewayError::no_available_accounts(message));
        }

        rank_candidates(&mut eligible);
        let chosen = &eligible[0];
        let selection = Selection::from_account(chosen);

        linfo!(
            request.request_id,
            LogStage::Scheduling,
            LogComponent::Scheduler,
            "account_selected",
            "Selected upstream account",
            account_id = %chosen.id,
            provider = chosen.provider().as_str(),
            priority = chosen.priority,
        );

        // 新选出的账户建立粘滞映射
        if let Some(session_hash) = request.session_hash {
            self.sessions
                .set(
                    request.platform,
                    session_hash,
                    &SessionMapping {
                        account_id: selection.account_id.clone(),
                        account_type: selection.account_type,
                    },
                )
                .await?;
        }

        Ok(selection)
    }

    /// 显式粘滞失效：账户被标记限流时由调用方删除对应会话映射
    pub async fn invalidate_session(&self, platform: Platform, session_hash: &str) -> Result<bool> {
        self.sessions.delete(platform, session_hash).await
    }

    /// 规则 1：逐个检查专属个体绑定
    async fn try_dedicated_bindings(
        &self,
        request: &ScheduleRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<Selection>> {
        for provider in request.platform.providers() {
            let Some(AccountBinding::Account(account_id)) =
                request.key.bindings.for_provider(*provider)
            else {
                continue;
            };
            match self.accounts.get_account(*provider, &account_id).await? {
                Some(account) => {
                    if self.eligible(&account, request, now).await {
                        ldebug!(
                            request.request_id,
                            LogStage::Scheduling,
                            LogComponent::Scheduler,
                            "dedicated_binding_hit",
                            "Using dedicated bound account",
                            account_id = %account.id,
                            provider = provider.as_str(),
                        );
                        return Ok(Some(Selection::from_account(&account)));
                    }
                    lwarn!(
                        request.request_id,
                        LogStage::Scheduling,
                        LogComponent::Scheduler,
                        "dedicated_binding_ineligible",
                        "Bound account not eligible, falling through",
                        account_id = %account.id,
                        provider = provider.as_str(),
                    );
                }
                None => {
                    lwarn!(
                        request.request_id,
                        LogStage::Scheduling,
                        LogComponent::Scheduler,
                        "dedicated_binding_missing",
                        "Bound account record missing, falling through to pool",
                        account_id = %account_id,
                        provider = provider.as_str(),
                    );
                }
            }
        }
        Ok(None)
    }

    /// 规则 2 / 4 的候选池装载
    ///
    /// 返回 (候选账户, 是否为分组限定池)。分组缺失、为空或平台不匹配
    /// 对本次请求是致命的。
    async fn load_candidates(
        &self,
        request: &ScheduleRequest<'_>,
    ) -> Result<(Vec<UpstreamAccount>, bool)> {
        let mut group_pool: Option<Vec<UpstreamAccount>> = None;

        for provider in request.platform.providers() {
            let Some(AccountBinding::Group(group_id)) =
                request.key.bindings.for_provider(*provider)
            else {
                continue;
            };
            let Some(group) = self.accounts.get_group(&group_id).await? else {
                return Err(GatewayError::group_misconfigured(format!(
                    "密钥 {} 绑定的分组 {group_id} 不存在",
                    request.key.id
                )));
            };
            if group.platform != request.platform {
                return Err(GatewayError::group_misconfigured(format!(
                    "分组 {group_id} 属于 {} 平台，与请求平台 {} 不符",
                    group.platform, request.platform
                )));
            }
            if group.members.is_empty() {
                return Err(GatewayError::group_misconfigured(format!(
                    "分组 {group_id} 没有成员"
                )));
            }

            let pool = group_pool.get_or_insert_with(Vec::new);
            for (member_provider, member_id) in &group.members {
                match self.accounts.get_account(*member_provider, member_id).await? {
                    Some(account) => pool.push(account),
                    None => {
                        lwarn!(
                            request.request_id,
                            LogStage::Scheduling,
                            LogComponent::Scheduler,
                            "group_member_missing",
                            "Group member account record missing",
                            group_id = %group_id,
                            account_id = %member_id,
                        );
                    }
                }
            }
        }

        match group_pool {
            Some(pool) => Ok((pool, true)),
            None => {
                let pool = self
                    .accounts
                    .list_platform(request.platform)
                    .await?
                    .into_iter()
                    .filter(|account| account.kind == AccountKind::Shared)
                    .collect();
                Ok((pool, false))
            }
        }
    }

    /// 资格判定：账户自身的静态谓词 + 限流标记的惰性恢复读取
    ///
    /// 静态部分（激活/状态/可调度/限流窗口/模型支持）由
    /// `UpstreamAccount::is_eligible` 判定；窗口已过的 limited 标记
    /// 再经 `rate_limited_now` 写回 normal。
    async fn eligible(
        &self,
        account: &UpstreamAccount,
        request: &ScheduleRequest<'_>,
        now: DateTime<Utc>,
    ) -> bool {
        if !account.is_eligible(
            request.requested_model,
            now,
            self.accounts.rate_limit_window(),
        ) {
            if !account.model_support.supports(request.requested_model) {
                ldebug!(
                    request.request_id,
                    LogStage::Scheduling,
                    LogComponent::Scheduler,
                    "model_filtered",
                    "Account does not support requested model",
                    account_id = %account.id,
                    requested_model = ?request.requested_model,
                );
            }
            return false;
        }
        !self.accounts.rate_limited_now(account, now).await
    }
}

/// 候选排序：priority 升序 → last_used_at 升序（缺失视为最早）→ id
///
/// 稳定排序保证相同键的输入在重复调用间产出一致顺序。
fn rank_candidates(candidates: &mut [UpstreamAccount]) {
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| last_used_millis(a).cmp(&last_used_millis(b)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn last_used_millis(account: &UpstreamAccount) -> i64 {
    account
        .last_used_at
        .map_or(i64::MIN, |t| t.timestamp_millis())
}
