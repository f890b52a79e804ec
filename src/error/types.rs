//! # 错误类型定义
//!
//! 准入与调度错误会以映射后的 HTTP 状态码和安全消息返回给客户端；
//! 计费路径上的存储错误只记录日志，绝不影响用户可见响应。

use axum::http::StatusCode;
use thiserror::Error;

/// 网关主要错误类型
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 请求格式错误
    #[error("请求格式错误: {message}")]
    MalformedRequest { message: String },

    /// API 密钥未知或无效
    #[error("密钥无效: {message}")]
    Unauthorized { message: String },

    /// API 密钥已停用
    #[error("密钥已停用: {message}")]
    Disabled { message: String },

    /// API 密钥已过期
    #[error("密钥已过期: {message}")]
    Expired { message: String },

    /// 权限不覆盖请求平台
    #[error("无权访问: {message}")]
    Forbidden { message: String },

    /// 请求模型被密钥限制
    #[error("模型不允许: {message}")]
    ModelNotAllowed { message: String },

    /// 客户端标识被密钥限制
    #[error("客户端不允许: {message}")]
    ClientNotAllowed { message: String },

    /// 密钥生命周期 token 配额用尽
    #[error("token 配额用尽: {message}")]
    TokenLimitExceeded { message: String },

    /// 当日费用配额用尽
    #[error("当日费用配额用尽: {message}")]
    DailyCostExceeded { message: String },

    /// 滑动窗口请求数超限
    #[error("速率限制: {message}")]
    RateLimited { message: String },

    /// 并发数超限
    #[error("并发超限: {message}")]
    ConcurrencyExceeded { message: String },

    /// 无可用上游账户
    #[error("无可用上游账户: {message}")]
    NoAvailableAccounts { message: String },

    /// 账户分组绑定配置有误
    #[error("账户分组配置有误: {message}")]
    GroupMisconfigured { message: String },

    /// 上游服务错误
    #[error("上游服务错误: {message}")]
    UpstreamError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 存储相关错误
    #[error("存储错误: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl GatewayError {
    /// 将错误转换为HTTP状态码和错误代码
    #[must_use]
    pub const fn to_http_response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::MalformedRequest { .. } => (StatusCode::BAD_REQUEST, "MALFORMED_REQUEST"),
            Self::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Disabled { .. } => (StatusCode::FORBIDDEN, "KEY_DISABLED"),
            Self::Expired { .. } => (StatusCode::FORBIDDEN, "KEY_EXPIRED"),
            Self::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::ModelNotAllowed { .. } => (StatusCode::FORBIDDEN, "MODEL_NOT_ALLOWED"),
            Self::ClientNotAllowed { .. } => (StatusCode::FORBIDDEN, "CLIENT_NOT_ALLOWED"),
            Self::TokenLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "TOKEN_LIMIT_EXCEEDED")
            }
            Self::DailyCostExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "DAILY_COST_EXCEEDED")
            }
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            Self::ConcurrencyExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "CONCURRENCY_EXCEEDED")
            }
            Self::NoAvailableAccounts { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "NO_AVAILABLE_ACCOUNTS")
            }
            Self::GroupMisconfigured { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "GROUP_MISCONFIGURED")
            }
            Self::UpstreamError { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::Store { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            Self::Serialization { .. } => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// 面向客户端的安全消息（不暴露内部标识）
    #[must_use]
    pub fn safe_message(&self) -> String {
        match self {
            Self::MalformedRequest { message } => message.clone(),
            Self::Unauthorized { .. } => "Invalid API key".to_string(),
            Self::Disabled { .. } => "API key is disabled".to_string(),
            Self::Expired { .. } => "API key has expired".to_string(),
            Self::Forbidden { .. } => "Permission denied for this platform".to_string(),
            Self::ModelNotAllowed { message } => message.clone(),
            Self::ClientNotAllowed { .. } => "Client is not allowed for this key".to_string(),
            Self::TokenLimitExceeded { .. } => "Token limit exceeded".to_string(),
            Self::DailyCostExceeded { .. } => "Daily cost limit exceeded".to_string(),
            Self::RateLimited { .. } => "Rate limit exceeded".to_string(),
            Self::ConcurrencyExceeded { .. } => "Too many concurrent requests".to_string(),
            Self::NoAvailableAccounts { message } => message.clone(),
            Self::GroupMisconfigured { .. } => "No usable account group".to_string(),
            Self::UpstreamError { .. } => "Upstream provider error".to_string(),
            Self::Config { .. } | Self::Store { .. } | Self::Serialization { .. }
            | Self::Internal { .. } => "Internal server error".to_string(),
        }
    }

    /// 创建请求格式错误
    pub fn malformed<T: Into<String>>(message: T) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    /// 创建密钥无效错误
    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// 创建密钥停用错误
    pub fn disabled<T: Into<String>>(message: T) -> Self {
        Self::Disabled {
            message: message.into(),
        }
    }

    /// 创建密钥过期错误
    pub fn expired<T: Into<String>>(message: T) -> Self {
        Self::Expired {
            message: message.into(),
        }
    }

    /// 创建权限错误
    pub fn forbidden<T: Into<String>>(message: T) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// 创建模型限制错误
    pub fn model_not_allowed<T: Into<String>>(message: T) -> Self {
        Self::ModelNotAllowed {
            message: message.into(),
        }
    }

    /// 创建客户端限制错误
    pub fn client_not_allowed<T: Into<String>>(message: T) -> Self {
        Self::ClientNotAllowed {
            message: message.into(),
        }
    }

    /// 创建 token 配额错误
    pub fn token_limit_exceeded<T: Into<String>>(message: T) -> Self {
        Self::TokenLimitExceeded {
            message: message.into(),
        }
    }

    /// 创建当日费用配额错误
    pub fn daily_cost_exceeded<T: Into<String>>(message: T) -> Self {
        Self::DailyCostExceeded {
            message: message.into(),
        }
    }

    /// 创建速率限制错误
    pub fn rate_limited<T: Into<String>>(message: T) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// 创建并发超限错误
    pub fn concurrency_exceeded<T: Into<String>>(message: T) -> Self {
        Self::ConcurrencyExceeded {
            message: message.into(),
        }
    }

    /// 创建无可用账户错误
    pub fn no_available_accounts<T: Into<String>>(message: T) -> Self {
        Self::NoAvailableAccounts {
            message: message.into(),
        }
    }

    /// 创建分组配置错误
    pub fn group_misconfigured<T: Into<String>>(message: T) -> Self {
        Self::GroupMisconfigured {
            message: message.into(),
        }
    }

    /// 创建上游服务错误
    pub fn upstream<T: Into<String>>(message: T) -> Self {
        Self::UpstreamError {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的上游服务错误
    pub fn upstream_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::UpstreamError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建存储错误
    pub fn store<T: Into<String>>(message: T) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的存储错误
    pub fn store_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

// 自动转换常见错误类型
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::internal_with_source("文件操作失败", err)
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: "JSON处理失败".to_string(),
            source: err.into(),
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::store_with_source("Redis操作失败", err)
    }
}

impl From<bcrypt::BcryptError> for GatewayError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::internal_with_source("密码处理失败", err)
    }
}
