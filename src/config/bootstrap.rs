//! # 管理员引导凭据
//!
//! 启动时从 JSON 文件读取初始管理员用户名/密码，密码经 bcrypt
//! 哈希后落库，明文不落任何存储。

use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use serde::Deserialize;
use std::path::Path;

/// 引导文件结构：`{"username": "...", "password": "..."}`
#[derive(Debug, Clone, Deserialize)]
pub struct AdminBootstrap {
    pub username: String,
    password: String,
}

impl AdminBootstrap {
    /// 从 JSON 文件加载；文件缺失返回 `None`（允许纯 API 部署）
    pub fn load(path: &str) -> Result<Option<Self>> {
        if !Path::new(path).exists() {
            lwarn!(
                "system",
                LogStage::Configuration,
                LogComponent::Config,
                "admin_bootstrap_missing",
                "Admin bootstrap file not found, skipping admin provisioning",
                path = %path,
            );
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let bootstrap: Self = serde_json::from_str(&raw)?;
        crate::ensure_config!(
            !bootstrap.username.trim().is_empty(),
            "引导文件缺少管理员用户名"
        );
        crate::ensure_config!(
            bootstrap.password.len() >= 8,
            "引导文件管理员密码不足 8 位"
        );
        Ok(Some(bootstrap))
    }

    /// 对密码做 bcrypt 哈希，返回 (username, password_hash)
    pub fn into_hashed(self) -> Result<(String, String)> {
        let hash = bcrypt::hash(&self.password, bcrypt::DEFAULT_COST)?;
        Ok((self.username, hash))
    }
}
