//! # 调度器类型定义

use crate::accounts::{Platform, ProviderKind, UpstreamAccount};
use crate::auth::ApiKeyRecord;

/// 一次调度请求
#[derive(Debug, Clone)]
pub struct ScheduleRequest<'a> {
    pub request_id: &'a str,
    pub key: &'a ApiKeyRecord,
    pub platform: Platform,
    /// 请求指纹，由调用方计算后传入；无会话语义的请求为 None
    pub session_hash: Option<&'a str>,
    pub requested_model: Option<&'a str>,
}

/// 调度结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub account_id: String,
    pub account_type: ProviderKind,
}

impl Selection {
    #[must_use]
    pub fn from_account(account: &UpstreamAccount) -> Self {
        Self {
            account_id: account.id.clone(),
            account_type: account.provider(),
        }
    }
}
