//! # API 密钥记录类型
//!
//! 密钥记录以 hash 字段持久化：结构性字段解析失败视为存储损坏，
//! JSON 列表字段（模型/客户端限制、标签）解析失败降级为空。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::{Platform, ProviderKind};
use crate::error::{GatewayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;

/// 密钥权限：限定可访问的请求平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permissions {
    Claude,
    Gemini,
    #[default]
    All,
}

impl Permissions {
    /// 权限是否覆盖请求平台
    ///
    /// 权限集合没有 openai 成员，OpenAI 平台仅 `all` 可访问。
    #[must_use]
    pub const fn covers(&self, platform: Platform) -> bool {
        match self {
            Self::All => true,
            Self::Claude => matches!(platform, Platform::Claude),
            Self::Gemini => matches!(platform, Platform::Gemini),
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::All => "all",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Permissions {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "all" | "" => Ok(Self::All),
            _ => Err(format!("Invalid permissions: {s}")),
        }
    }
}

/// 模型限制
///
/// `restricted_models` 是**拒绝列表**：启用后命中列表的模型被拒绝，
/// 未命中的全部放行。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRestriction {
    pub enabled: bool,
    pub restricted_models: Vec<String>,
}

impl ModelRestriction {
    /// 请求模型是否被拒绝
    #[must_use]
    pub fn denies(&self, requested_model: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        requested_model.is_some_and(|model| self.restricted_models.iter().any(|m| m == model))
    }
}

/// 客户端限制：启用后 User-Agent 必须命中允许列表之一（大小写不敏感子串匹配）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRestriction {
    pub enabled: bool,
    pub allowed_clients: Vec<String>,
}

impl ClientRestriction {
    /// 客户端是否被拒绝
    #[must_use]
    pub fn denies(&self, user_agent: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(ua) = user_agent else {
            return true;
        };
        let ua = ua.to_lowercase();
        !self
            .allowed_clients
            .iter()
            .any(|allowed| ua.contains(&allowed.to_lowercase()))
    }
}

/// 账户绑定值：单个账户或 `group:<id>` 分组
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountBinding {
    Account(String),
    Group(String),
}

impl AccountBinding {
    /// 从持久化字符串解析
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        raw.strip_prefix("group:").map_or_else(
            || Some(Self::Account(raw.to_string())),
            |group_id| Some(Self::Group(group_id.to_string())),
        )
    }
}

impl fmt::Display for AccountBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// 各平台的账户绑定（每提供方最多一个）
#[derive(Debug, Clone, Default)]
pub struct PlatformBindings {
    pub claude_oauth: Option<String>,
    pub claude_console: Option<String>,
    pub openai: Option<String>,
    pub gemini: Option<String>,
}

impl PlatformBindings {
    /// 取某提供方的绑定（已解析）
    #[must_use]
    pub fn for_provider(&self, provider: ProviderKind) -> Option<AccountBinding> {
        let raw = match provider {
            ProviderKind::ClaudeOauth => self.claude_oauth.as_deref(),
            ProviderKind::ClaudeConsole => self.claude_console.as_deref(),
            ProviderKind::OpenAi => self.openai.as_deref(),
            ProviderKind::Gemini => self.gemini.as_deref(),
        };
        raw.and_then(AccountBinding::parse)
    }

    /// 是否有任意绑定
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.claude_oauth.is_none()
            && self.claude_console.is_none()
            && self.openai.is_none()
            && self.gemini.is_none()
    }
}

/// API 密钥记录
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    pub hashed_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Permissions,
    /// 生命周期 token 上限，0 表示不限
    pub token_limit: u64,
    /// 并发请求上限，0 表示不限
    pub concurrency_limit: u32,
    /// 滑动窗口长度（秒）
    pub rate_limit_window_secs: u64,
    /// 窗口内请求数上限，0 表示不限
    pub rate_limit_requests: u64,
    /// 当日费用上限（微美元），0 表示不限
    pub daily_cost_limit_micros: u64,
    pub model_restriction: ModelRestriction,
    pub client_restriction: ClientRestriction,
    pub bindings: PlatformBindings,
    pub tags: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// 记录 → hash 字段
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("id".to_string(), self.id.clone()),
            ("name".to_string(), self.name.clone()),
            ("hashed_secret".to_string(), self.hashed_secret.clone()),
            ("is_active".to_string(), self.is_active.to_string()),
            ("created_at".to_string(), self.created_at.to_rfc3339()),
            (
                "expires_at".to_string(),
                self.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            ),
            ("permissions".to_string(), self.permissions.to_string()),
            ("token_limit".to_string(), self.token_limit.to_string()),
            (
                "concurrency_limit".to_string(),
                self.concurrency_limit.to_string(),
            ),
            (
                "rate_limit_window_secs".to_string(),
                self.rate_limit_window_secs.to_string(),
            ),
            (
                "rate_limit_requests".to_string(),
                self.rate_limit_requests.to_string(),
            ),
            (
                "daily_cost_limit_micros".to_string(),
                self.daily_cost_limit_micros.to_string(),
            ),
            (
                "model_restriction".to_string(),
                serde_json::to_string(&self.model_restriction)?,
            ),
            (
                "client_restriction".to_string(),
                serde_json::to_string(&self.client_restriction)?,
            ),
            (
                "binding_claude_oauth".to_string(),
                self.bindings.claude_oauth.clone().unwrap_or_default(),
            ),
            (
                "binding_claude_console".to_string(),
                self.bindings.claude_console.clone().unwrap_or_default(),
            ),
            (
                "binding_openai".to_string(),
                self.bindings.openai.clone().unwrap_or_default(),
            ),
            (
                "binding_gemini".to_string(),
                self.bindings.gemini.clone().unwrap_or_default(),
            ),
            ("tags".to_string(), serde_json::to_string(&self.tags)?),
            (
                "last_used_at".to_string(),
                self.last_used_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ),
        ])
    }

    /// hash 字段 → 记录
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let structural = |name: &str| -> Result<&String> {
            fields
                .get(name)
                .ok_or_else(|| GatewayError::internal(format!("密钥记录缺少字段 {name}")))
        };

        let id = structural("id")?.clone();
        let parse_u64 = |name: &str| -> Result<u64> {
            structural(name)?
                .parse::<u64>()
                .map_err(|_| GatewayError::internal(format!("密钥 {id} 字段 {name} 无效")))
        };

        let is_active = match structural("is_active")?.as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => {
                return Err(GatewayError::internal(format!(
                    "密钥 {id} is_active 字段无效"
                )));
            }
        };
        let created_at = DateTime::parse_from_rfc3339(structural("created_at")?)
            .map_err(|_| GatewayError::internal(format!("密钥 {id} created_at 字段无效")))?
            .with_timezone(&Utc);
        let expires_at = parse_optional_instant(fields.get("expires_at"));
        let permissions = structural("permissions")?
            .parse::<Permissions>()
            .map_err(GatewayError::internal)?;

        // 不透明 JSON 字段：解析失败降级为空并继续
        let model_restriction = degrade_json(fields.get("model_restriction"), &id, "model_restriction");
        let client_restriction =
            degrade_json(fields.get("client_restriction"), &id, "client_restriction");
        let tags = degrade_json(fields.get("tags"), &id, "tags");

        let token_limit = parse_u64("token_limit")?;
        let concurrency_limit = u32::try_from(parse_u64("concurrency_limit")?)
            .map_err(|_| GatewayError::internal(format!("密钥 {id} 并发上限溢出")))?;
        let rate_limit_window_secs = parse_u64("rate_limit_window_secs")?;
        let rate_limit_requests = parse_u64("rate_limit_requests")?;
        let daily_cost_limit_micros = parse_u64("daily_cost_limit_micros")?;
        let name = fields.get("name").cloned().unwrap_or_default();
        let hashed_secret = structural("hashed_secret")?.clone();

        let binding = |name: &str| fields.get(name).filter(|s| !s.is_empty()).cloned();

        Ok(Self {
            id,
            name,
            hashed_secret,
            is_active,
            created_at,
            expires_at,
            permissions,
            token_limit,
            concurrency_limit,
            rate_limit_window_secs,
            rate_limit_requests,
            daily_cost_limit_micros,
            model_restriction,
            client_restriction,
            bindings: PlatformBindings {
                claude_oauth: binding("binding_claude_oauth"),
                claude_console: binding("binding_claude_console"),
                openai: binding("binding_openai"),
                gemini: binding("binding_gemini"),
            },
            tags,
            last_used_at: parse_optional_instant(fields.get("last_used_at")),
        })
    }
}

fn parse_optional_instant(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// 不透明 JSON 字段的降级解析
fn degrade_json<T: Default + for<'de> Deserialize<'de>>(
    raw: Option<&String>,
    key_id: &str,
    field: &str,
) -> T {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return T::default();
    };
    serde_json::from_str(raw).unwrap_or_else(|_| {
        lwarn!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "json_field_parse_failed",
            "Invalid json field on key record, degrading to default",
            key_id = %key_id,
            field = %field,
        );
        T::default()
    })
}
