//! # 统一日志工具模块
//!
//! 提供网关各模块共用的结构化日志宏与日志系统初始化。
//! 所有业务日志统一携带 request_id / stage / component / operation 字段，
//! 便于按请求聚合检索。

use std::env;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志阶段枚举
#[derive(Debug, Clone, Copy)]
pub enum LogStage {
    Startup,
    Shutdown,
    Configuration,
    Authentication,
    Admission,
    Scheduling,
    Accounting,
    Store,
    BackgroundTask,
    ExternalApi,
    Internal,
}

impl LogStage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Admission => "admission",
            Self::Scheduling => "scheduling",
            Self::Accounting => "accounting",
            Self::Store => "store",
            Self::BackgroundTask => "background_task",
            Self::ExternalApi => "external_api",
            Self::Internal => "internal",
        }
    }
}

/// 组件枚举
#[derive(Debug, Clone, Copy)]
pub enum LogComponent {
    // --- System Components ---
    Main,
    ServerSetup,
    Config,
    Store,
    // --- Admission / Auth ---
    ApiKey,
    Admission,
    RateLimiter,
    Security,
    // --- Scheduling ---
    Accounts,
    Scheduler,
    SessionMap,
    // --- Accounting ---
    Pricing,
    Statistics,
    // --- HTTP Surface ---
    Management,
    Relay,
}

impl LogComponent {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::ServerSetup => "server_setup",
            Self::Config => "config",
            Self::Store => "store",
            Self::ApiKey => "api_key",
            Self::Admission => "admission",
            Self::RateLimiter => "rate_limiter",
            Self::Security => "security",
            Self::Accounts => "accounts",
            Self::Scheduler => "scheduler",
            Self::SessionMap => "session_map",
            Self::Pricing => "pricing",
            Self::Statistics => "statistics",
            Self::Management => "management",
            Self::Relay => "relay",
        }
    }
}

/// 标准日志宏 - 信息级别
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::info!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::info!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 标准日志宏 - 调试级别
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::debug!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::debug!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 标准日志宏 - 警告级别
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::warn!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::warn!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 标准日志宏 - 错误级别
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::error!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::error!(
            request_id = %$request_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 初始化日志系统
///
/// `RUST_LOG` 控制过滤级别；`RELAY_LOG_FORMAT=json` 切换为 JSON 输出。
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relay_gateway=info,tower_http=info"));

    let use_json = env::var("RELAY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if use_json {
        let layer = fmt::layer().json().with_target(false).boxed();
        tracing_subscriber::registry().with(filter).with(layer).init();
    } else {
        let layer = fmt::layer().with_target(false).boxed();
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}
