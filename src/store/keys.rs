//! # 存储键命名规范
//!
//! 定义统一的存储键布局。计数 hash 的字段集合见 `statistics` 模块。

use std::fmt;

/// 存储键类型
#[derive(Debug, Clone)]
pub enum StoreKey {
    /// API 密钥记录 - `apikey:{id}`
    ApiKey { id: String },

    /// 密钥哈希索引 - `apikey:hash_index`，字段为 hashed_secret → id
    ApiKeyHashIndex,

    /// 全部密钥 id 集合 - `apikeys`
    ApiKeyIndex,

    /// 上游账户记录 - `account:{platform}:{id}`
    Account { platform: String, id: String },

    /// 平台账户 id 集合 - `accounts:{platform}`
    AccountIndex { platform: String },

    /// 账户分组记录 - `account_group:{id}`
    AccountGroup { id: String },

    /// 分组成员集合 - `account_group_members:{id}`
    AccountGroupMembers { id: String },

    /// 密钥生命周期用量 - `usage:{key_id}`
    UsageKeyTotal { key_id: String },

    /// 密钥每日用量 - `usage:daily:{key_id}:{date}`
    UsageKeyDaily { key_id: String, date: String },

    /// 密钥每月用量 - `usage:monthly:{key_id}:{month}`
    UsageKeyMonthly { key_id: String, month: String },

    /// 密钥×模型每日用量 - `usage:{key_id}:model:daily:{model}:{date}`
    UsageKeyModelDaily {
        key_id: String,
        model: String,
        date: String,
    },

    /// 密钥×模型每月用量 - `usage:{key_id}:model:monthly:{model}:{month}`
    UsageKeyModelMonthly {
        key_id: String,
        model: String,
        month: String,
    },

    /// 密钥使用过的模型集合 - `usage:{key_id}:models`
    UsageKeyModelIndex { key_id: String },

    /// 账户生命周期用量 - `account_usage:{account_id}`
    UsageAccountTotal { account_id: String },

    /// 账户每日用量 - `account_usage:daily:{account_id}:{date}`
    UsageAccountDaily { account_id: String, date: String },

    /// 账户每月用量 - `account_usage:monthly:{account_id}:{month}`
    UsageAccountMonthly { account_id: String, month: String },

    /// 密钥当日费用计数（微美元） - `usage:cost:daily:{key_id}:{date}`
    CostDaily { key_id: String, date: String },

    /// 密钥并发额度 - `concurrency:{key_id}`
    Concurrency { key_id: String },

    /// 密钥滑动窗口计数 - `ratelimit:window:{key_id}`
    RateLimitWindow { key_id: String },

    /// 会话粘滞映射 - `{prefix}{session_hash}`，prefix 按调度器实例区分
    SessionMapping {
        prefix: &'static str,
        session_hash: String,
    },

    /// 管理员凭据 - `admin:credentials`
    AdminCredentials,
}

impl StoreKey {
    /// 生成存储键字符串
    #[must_use]
    pub fn build(&self) -> String {
        match self {
            Self::ApiKey { id } => format!("apikey:{id}"),
            Self::ApiKeyHashIndex => "apikey:hash_index".to_string(),
            Self::ApiKeyIndex => "apikeys".to_string(),
            Self::Account { platform, id } => format!("account:{platform}:{id}"),
            Self::AccountIndex { platform } => format!("accounts:{platform}"),
            Self::AccountGroup { id } => format!("account_group:{id}"),
            Self::AccountGroupMembers { id } => format!("account_group_members:{id}"),
            Self::UsageKeyTotal { key_id } => format!("usage:{key_id}"),
            Self::UsageKeyDaily { key_id, date } => format!("usage:daily:{key_id}:{date}"),
            Self::UsageKeyMonthly { key_id, month } => format!("usage:monthly:{key_id}:{month}"),
            Self::UsageKeyModelDaily {
                key_id,
                model,
                date,
            } => format!("usage:{key_id}:model:daily:{model}:{date}"),
            Self::UsageKeyModelMonthly {
                key_id,
                model,
                month,
            } => format!("usage:{key_id}:model:monthly:{model}:{month}"),
            Self::UsageKeyModelIndex { key_id } => format!("usage:{key_id}:models"),
            Self::UsageAccountTotal { account_id } => format!("account_usage:{account_id}"),
            Self::UsageAccountDaily { account_id, date } => {
                format!("account_usage:daily:{account_id}:{date}")
            }
            Self::UsageAccountMonthly { account_id, month } => {
                format!("account_usage:monthly:{account_id}:{month}")
            }
            Self::CostDaily { key_id, date } => format!("usage:cost:daily:{key_id}:{date}"),
            Self::Concurrency { key_id } => format!("concurrency:{key_id}"),
            Self::RateLimitWindow { key_id } => format!("ratelimit:window:{key_id}"),
            Self::SessionMapping {
                prefix,
                session_hash,
            } => format!("{prefix}{session_hash}"),
            Self::AdminCredentials => "admin:credentials".to_string(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}
