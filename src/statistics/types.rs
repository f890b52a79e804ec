//! # 统计类型定义

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次请求的 token 分解
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// 四类 token 之和
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_create_tokens + self.cache_read_tokens
    }
}

/// 计数桶快照
///
/// 与存储 hash 的字段一一对应（持久化字段名为 camelCase）；
/// `cost_micros` 为微美元定点值。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
    pub all_tokens: u64,
    pub cost_micros: u64,
}

impl UsageSnapshot {
    /// 从存储 hash 解析；缺失字段按 0 处理
    #[must_use]
    pub fn from_hash(fields: &HashMap<String, String>) -> Self {
        let get = |name: &str| {
            fields
                .get(name)
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0)
        };
        Self {
            requests: get("requests"),
            input_tokens: get("inputTokens"),
            output_tokens: get("outputTokens"),
            cache_create_tokens: get("cacheCreateTokens"),
            cache_read_tokens: get("cacheReadTokens"),
            all_tokens: get("allTokens"),
            cost_micros: get("costMicros"),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.requests == 0 && self.all_tokens == 0
    }
}

/// 统计周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Monthly,
}

impl Period {
    /// 周期在某时刻对应的桶名（UTC）
    #[must_use]
    pub fn bucket(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Daily => at.format("%Y-%m-%d").to_string(),
            Self::Monthly => at.format("%Y-%m").to_string(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            _ => Err(format!("Invalid period: {s}")),
        }
    }
}

/// 按模型维度的用量行
#[derive(Debug, Clone, Serialize)]
pub struct ModelUsageRow {
    pub model: String,
    #[serde(flatten)]
    pub usage: UsageSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_token_total() {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
            cache_create_tokens: 5,
            cache_read_tokens: 65,
        };
        assert_eq!(usage.total(), 100);
    }

    #[test]
    fn test_snapshot_from_hash_tolerates_missing() {
        let mut fields = HashMap::new();
        fields.insert("requests".to_string(), "7".to_string());
        fields.insert("allTokens".to_string(), "123".to_string());
        fields.insert("costMicros".to_string(), "garbage".to_string());

        let snapshot = UsageSnapshot::from_hash(&fields);
        assert_eq!(snapshot.requests, 7);
        assert_eq!(snapshot.all_tokens, 123);
        assert_eq!(snapshot.cost_micros, 0);
        assert_eq!(snapshot.input_tokens, 0);
    }

    #[test]
    fn test_period_buckets() {
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 23, 59, 59).unwrap();
        assert_eq!(Period::Daily.bucket(at), "2025-07-01");
        assert_eq!(Period::Monthly.bucket(at), "2025-07");
        assert_eq!("daily".parse::<Period>(), Ok(Period::Daily));
        assert!("weekly".parse::<Period>().is_err());
    }
}
