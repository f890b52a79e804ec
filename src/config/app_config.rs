//! # 应用配置结构定义
//!
//! TOML 文件为基底，`RELAY__<SECTION>__<FIELD>` 环境变量覆盖。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP 服务器配置
    pub server: ServerConfig,
    /// 键值存储配置
    pub store: StoreConfig,
    /// 密钥准入配置
    pub auth: AuthConfig,
    /// 调度器配置
    pub scheduler: SchedulerConfig,
    /// 价格表配置
    pub pricing: PricingConfig,
}

/// HTTP 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP监听地址
    pub host: String,
    /// HTTP监听端口
    pub port: u16,
    /// 工作线程数
    pub workers: usize,
    /// 单请求整体超时（含流式响应，秒）
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: num_cpus::get(),
            request_timeout_secs: 600,
        }
    }
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// 内存后端（测试/单机）
    Memory,
    /// Redis后端（生产）
    Redis,
}

impl Default for StoreBackendKind {
    fn default() -> Self {
        Self::Memory
    }
}

/// 键值存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 后端类型
    pub backend: StoreBackendKind,
    /// Redis连接URL
    pub redis_url: String,
    /// 连接超时时间（秒）
    pub connection_timeout: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            connection_timeout: 10,
        }
    }
}

/// 密钥准入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API 密钥前缀
    pub secret_prefix: String,
    /// 全局 pepper，参与密钥哈希
    pub pepper: String,
    /// 管理员引导文件路径（JSON，含初始用户名/密码）
    pub admin_bootstrap_path: String,
    /// 过期密钥清理间隔（秒）
    pub cleanup_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_prefix: "crs_".to_string(),
            pepper: String::new(),
            admin_bootstrap_path: "admin.json".to_string(),
            cleanup_interval_secs: 600,
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 会话粘滞映射 TTL（秒）
    pub session_ttl_secs: u64,
    /// 账户限流窗口（秒），窗口过后下次读取自动恢复
    pub account_rate_limit_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            account_rate_limit_secs: 3600,
        }
    }
}

/// 价格表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// 价格表 JSON 文件路径
    pub table_path: String,
    /// 重载检查间隔（秒，0 关闭热重载）
    pub reload_interval_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            table_path: "pricing.json".to_string(),
            reload_interval_secs: 0,
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置并应用环境变量覆盖
    ///
    /// 文件不存在时退回默认配置，env 覆盖仍然生效。
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// 应用 `RELAY__<SECTION>__<FIELD>` 形式的环境变量覆盖
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("RELAY__SERVER__HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("RELAY__SERVER__PORT")
            && let Ok(port) = v.parse()
        {
            self.server.port = port;
        }
        if let Ok(v) = env::var("RELAY__STORE__BACKEND") {
            match v.to_lowercase().as_str() {
                "redis" => self.store.backend = StoreBackendKind::Redis,
                "memory" => self.store.backend = StoreBackendKind::Memory,
                _ => {}
            }
        }
        if let Ok(v) = env::var("RELAY__STORE__REDIS_URL") {
            self.store.redis_url = v;
        }
        if let Ok(v) = env::var("RELAY__AUTH__SECRET_PREFIX") {
            self.auth.secret_prefix = v;
        }
        if let Ok(v) = env::var("RELAY__AUTH__PEPPER") {
            self.auth.pepper = v;
        }
        if let Ok(v) = env::var("RELAY__AUTH__ADMIN_BOOTSTRAP_PATH") {
            self.auth.admin_bootstrap_path = v;
        }
        if let Ok(v) = env::var("RELAY__PRICING__TABLE_PATH") {
            self.pricing.table_path = v;
        }
        if let Ok(v) = env::var("RELAY__SCHEDULER__SESSION_TTL_SECS")
            && let Ok(ttl) = v.parse()
        {
            self.scheduler.session_ttl_secs = ttl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.secret_prefix, "crs_");
        assert_eq!(config.scheduler.session_ttl_secs, 3600);
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[store]
backend = "redis"
redis_url = "redis://10.0.0.1:6379/1"

[auth]
secret_prefix = "sk-relay-"
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.backend, StoreBackendKind::Redis);
        assert_eq!(config.store.redis_url, "redis://10.0.0.1:6379/1");
        assert_eq!(config.auth.secret_prefix, "sk-relay-");
        // 未出现的节保持默认
        assert_eq!(config.scheduler.session_ttl_secs, 3600);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = AppConfig::load("/definitely/not/here.toml").unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
