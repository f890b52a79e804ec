//! # 上游账户类型定义

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 请求平台
///
/// 入站请求按端点归属到一个平台；Claude 平台同时覆盖 OAuth 与
/// Console 两类账户。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Claude,
    OpenAi,
    Gemini,
}

impl Platform {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// 该平台可调度的账户提供方，按绑定解析的固定顺序排列
    #[must_use]
    pub const fn providers(&self) -> &'static [ProviderKind] {
        match self {
            Self::Claude => &[ProviderKind::ClaudeOauth, ProviderKind::ClaudeConsole],
            Self::OpenAi => &[ProviderKind::OpenAi],
            Self::Gemini => &[ProviderKind::Gemini],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 上游账户提供方（账户变体标识）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "claude-oauth")]
    ClaudeOauth,
    #[serde(rename = "claude-console")]
    ClaudeConsole,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeOauth => "claude-oauth",
            Self::ClaudeConsole => "claude-console",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// 提供方所属的请求平台
    #[must_use]
    pub const fn platform(&self) -> Platform {
        match self {
            Self::ClaudeOauth | Self::ClaudeConsole => Platform::Claude,
            Self::OpenAi => Platform::OpenAi,
            Self::Gemini => Platform::Gemini,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-oauth" => Ok(Self::ClaudeOauth),
            "claude-console" => Ok(Self::ClaudeConsole),
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!("Unknown provider kind: {s}")),
        }
    }
}

/// 账户状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    /// 正常可用
    Active,
    /// 上游报错中
    Error,
    /// 已被上游封禁
    Blocked,
    /// 凭据失效
    Unauthorized,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Error => "error",
            Self::Blocked => "blocked",
            Self::Unauthorized => "unauthorized",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            "blocked" => Ok(Self::Blocked),
            "unauthorized" => Ok(Self::Unauthorized),
            _ => Err(format!("Invalid account status: {s}")),
        }
    }
}

/// 账户共享类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountKind {
    /// 共享池账户
    #[default]
    Shared,
    /// 专属账户（仅服务绑定它的密钥）
    Dedicated,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Shared => "shared",
            Self::Dedicated => "dedicated",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" | "" => Ok(Self::Shared),
            "dedicated" => Ok(Self::Dedicated),
            _ => Err(format!("Invalid account kind: {s}")),
        }
    }
}

/// 限流标记状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitStatus {
    #[default]
    Normal,
    Limited,
}

/// 账户限流状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub status: RateLimitStatus,
    pub limited_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// 窗口内视为限流；窗口过后由下次读取方清除
    #[must_use]
    pub fn is_limited(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.status != RateLimitStatus::Limited {
            return false;
        }
        match self.limited_at {
            Some(at) => {
                let elapsed = now.signed_duration_since(at);
                elapsed.num_seconds() < i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
            }
            // 缺失标记时间的 limited 状态按限流处理
            None => true,
        }
    }
}

/// 模型支持声明
///
/// 空列表/空映射表示支持所有模型；Console 变体以映射表同时声明
/// 客户端模型名到上游模型名的改写关系（改写由 I/O 层执行）。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ModelSupport {
    #[default]
    All,
    Allowed(Vec<String>),
    Mapped(HashMap<String, String>),
}

impl ModelSupport {
    /// 判定是否支持请求模型；未指定模型视为支持
    #[must_use]
    pub fn supports(&self, requested_model: Option<&str>) -> bool {
        let Some(model) = requested_model else {
            return true;
        };
        match self {
            Self::All => true,
            Self::Allowed(models) => models.is_empty() || models.iter().any(|m| m == model),
            Self::Mapped(mapping) => mapping.is_empty() || mapping.contains_key(model),
        }
    }

    /// Console 映射：客户端模型名对应的上游模型名
    #[must_use]
    pub fn upstream_model<'a>(&'a self, requested_model: &'a str) -> &'a str {
        match self {
            Self::Mapped(mapping) => mapping
                .get(requested_model)
                .map_or(requested_model, String::as_str),
            _ => requested_model,
        }
    }
}

/// 变体专属凭据（准入/调度路径不解读其内容）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AccountCredentials {
    ClaudeOauth {
        access_token: String,
        refresh_token: String,
    },
    ClaudeConsole {
        api_key: String,
        base_url: String,
    },
    Openai {
        api_key: String,
    },
    Gemini {
        api_key: String,
    },
}

impl AccountCredentials {
    #[must_use]
    pub const fn provider(&self) -> ProviderKind {
        match self {
            Self::ClaudeOauth { .. } => ProviderKind::ClaudeOauth,
            Self::ClaudeConsole { .. } => ProviderKind::ClaudeConsole,
            Self::Openai { .. } => ProviderKind::OpenAi,
            Self::Gemini { .. } => ProviderKind::Gemini,
        }
    }
}

/// 上游账户
///
/// 四类变体共享同一能力集（id / priority / last_used_at / 资格判定 /
/// 限流标记），差异只存在于凭据中。
#[derive(Debug, Clone)]
pub struct UpstreamAccount {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub status: AccountStatus,
    pub kind: AccountKind,
    pub schedulable: bool,
    pub priority: i32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub rate_limit: RateLimitState,
    pub model_support: ModelSupport,
    pub credentials: AccountCredentials,
}

impl UpstreamAccount {
    /// 账户所属提供方（由凭据变体推导）
    #[must_use]
    pub const fn provider(&self) -> ProviderKind {
        self.credentials.provider()
    }

    /// 调度资格判定（不含专属绑定匹配，绑定关系由调度器掌握）
    #[must_use]
    pub fn is_eligible(
        &self,
        requested_model: Option<&str>,
        now: DateTime<Utc>,
        rate_limit_window: Duration,
    ) -> bool {
        self.is_active
            && self.status == AccountStatus::Active
            && self.schedulable
            && !self.rate_limit.is_limited(now, rate_limit_window)
            && self.model_support.supports(requested_model)
    }
}

/// 账户分组：同一平台账户的命名集合
#[derive(Debug, Clone)]
pub struct AccountGroup {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    /// 成员以 (提供方, 账户id) 标识
    pub members: Vec<(ProviderKind, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(
            "claude-oauth".parse::<ProviderKind>(),
            Ok(ProviderKind::ClaudeOauth)
        );
        assert_eq!("openai".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert!("anthropic".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::ClaudeConsole.to_string(), "claude-console");
    }

    #[test]
    fn test_provider_platform_mapping() {
        assert_eq!(ProviderKind::ClaudeOauth.platform(), Platform::Claude);
        assert_eq!(ProviderKind::ClaudeConsole.platform(), Platform::Claude);
        assert_eq!(ProviderKind::Gemini.platform(), Platform::Gemini);
        assert_eq!(
            Platform::Claude.providers(),
            &[ProviderKind::ClaudeOauth, ProviderKind::ClaudeConsole]
        );
    }

    #[test]
    fn test_account_status_parsing() {
        assert_eq!("active".parse::<AccountStatus>(), Ok(AccountStatus::Active));
        assert_eq!(
            "unauthorized".parse::<AccountStatus>(),
            Ok(AccountStatus::Unauthorized)
        );
        assert!("paused".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_rate_limit_window_boundary() {
        let window = Duration::from_secs(3600);
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();

        // 限流 3599 秒前：仍在窗口内
        let still_limited = RateLimitState {
            status: RateLimitStatus::Limited,
            limited_at: Some(now - chrono::Duration::seconds(3599)),
        };
        assert!(still_limited.is_limited(now, window));

        // 限流 3601 秒前：窗口已过
        let recovered = RateLimitState {
            status: RateLimitStatus::Limited,
            limited_at: Some(now - chrono::Duration::seconds(3601)),
        };
        assert!(!recovered.is_limited(now, window));

        let normal = RateLimitState::default();
        assert!(!normal.is_limited(now, window));
    }

    #[test]
    fn test_model_support() {
        let all = ModelSupport::All;
        assert!(all.supports(Some("gpt-4o")));
        assert!(all.supports(None));

        // 空 allow-list 等价于支持全部
        let empty = ModelSupport::Allowed(vec![]);
        assert!(empty.supports(Some("gpt-4o-mini")));

        let allowed = ModelSupport::Allowed(vec!["gpt-4o".to_string()]);
        assert!(allowed.supports(Some("gpt-4o")));
        assert!(!allowed.supports(Some("gpt-4o-mini")));

        let mut mapping = HashMap::new();
        mapping.insert(
            "claude-3-5-sonnet-20241022".to_string(),
            "internal-sonnet".to_string(),
        );
        let mapped = ModelSupport::Mapped(mapping);
        assert!(mapped.supports(Some("claude-3-5-sonnet-20241022")));
        assert!(!mapped.supports(Some("claude-3-opus")));
        assert_eq!(
            mapped.upstream_model("claude-3-5-sonnet-20241022"),
            "internal-sonnet"
        );
        assert_eq!(mapped.upstream_model("unknown"), "unknown");
    }
}
