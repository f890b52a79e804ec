//! # 上游转发接缝
//!
//! 流式透传与各提供方协议适配部署在网关之外；本模块只定义中继
//! 入口调用的接缝。调度产生的账户与凭据经此下发，返回观测到的
//! token 用量与 429 类信号。

use async_trait::async_trait;
use serde_json::Value;

use crate::accounts::UpstreamAccount;
use crate::error::{GatewayError, Result};
use crate::statistics::TokenUsage;

/// 一次转发的上下文
pub struct DispatchContext<'a> {
    pub request_id: &'a str,
    pub account: &'a UpstreamAccount,
    /// 客户端请求的模型（Console 映射改写由转发实现执行）
    pub requested_model: Option<&'a str>,
    pub body: &'a Value,
}

/// 转发结果
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    /// 上游返回的 token 计数（流式场景为累计值）
    pub tokens: TokenUsage,
    /// 上游返回 429 类信号
    pub rate_limited: bool,
}

/// 上游连接器
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn dispatch(&self, context: DispatchContext<'_>) -> Result<UpstreamResponse>;
}

/// 未配置转发实现时的占位连接器：一律报上游错误
pub struct NoopConnector;

#[async_trait]
impl UpstreamConnector for NoopConnector {
    async fn dispatch(&self, _context: DispatchContext<'_>) -> Result<UpstreamResponse> {
        Err(GatewayError::upstream("no upstream connector configured"))
    }
}
