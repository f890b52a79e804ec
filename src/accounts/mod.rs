//! # 上游账户模块
//!
//! 定义四类上游账户（Claude OAuth / Claude Console / OpenAI / Gemini）的
//! 统一模型、资格判定与存储服务。调度器只依赖公共能力集。

pub mod service;
pub mod types;

pub use service::AccountService;
pub use types::{
    AccountCredentials, AccountGroup, AccountKind, AccountStatus, ModelSupport, Platform,
    ProviderKind, RateLimitState, RateLimitStatus, UpstreamAccount,
};
