//! # 应用上下文（DI 容器）
//!
//! 持有跨模块共享的服务实例，全部通过构造注入，便于测试中替换
//! 存储后端与上游连接器。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::accounts::AccountService;
use crate::auth::{AdmissionService, KeyService};
use crate::config::{AdminBootstrap, AppConfig, StoreBackendKind};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::management::upstream::UpstreamConnector;
use crate::pricing::{PriceTable, PricingService};
use crate::scheduler::{SessionMap, UnifiedScheduler};
use crate::statistics::UsageService;
use crate::store::{StoreManager, keys::StoreKey};
use crate::{ldebug, linfo};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<StoreManager>,
    pub keys: Arc<KeyService>,
    pub accounts: Arc<AccountService>,
    pub pricing: Arc<PricingService>,
    pub usage: Arc<UsageService>,
    pub admission: Arc<AdmissionService>,
    pub scheduler: Arc<UnifiedScheduler>,
    pub connector: Arc<dyn UpstreamConnector>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// 按配置装配全部服务
    pub async fn build(
        config: AppConfig,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Result<Self> {
        let store = Arc::new(match config.store.backend {
            StoreBackendKind::Memory => StoreManager::memory(),
            StoreBackendKind::Redis => StoreManager::redis(&config.store.redis_url).await?,
        });
        Self::build_with_store(config, store, connector).await
    }

    /// 使用现成的存储实例装配（测试注入内存后端）
    pub async fn build_with_store(
        config: AppConfig,
        store: Arc<StoreManager>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let keys = Arc::new(KeyService::new(
            store.clone(),
            config.auth.secret_prefix.clone(),
            config.auth.pepper.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            Duration::from_secs(config.scheduler.account_rate_limit_secs),
        ));
        let pricing = Arc::new(PricingService::new(PriceTable::from_file(
            &config.pricing.table_path,
        )?));
        let usage = Arc::new(UsageService::new(
            store.clone(),
            keys.clone(),
            accounts.clone(),
            pricing.clone(),
        ));
        let admission = Arc::new(AdmissionService::new(
            store.clone(),
            keys.clone(),
            usage.clone(),
        ));
        let scheduler = Arc::new(UnifiedScheduler::new(
            accounts.clone(),
            SessionMap::new(
                store.clone(),
                Duration::from_secs(config.scheduler.session_ttl_secs),
            ),
        ));

        let context = Self {
            config,
            store,
            keys,
            accounts,
            pricing,
            usage,
            admission,
            scheduler,
            connector,
            started_at: Utc::now(),
        };
        context.provision_admin().await?;
        Ok(context)
    }

    /// 管理员引导：读取凭据文件，bcrypt 哈希后落库
    ///
    /// 已有凭据不会被覆盖，避免重启回滚管理员改密。
    async fn provision_admin(&self) -> Result<()> {
        let Some(bootstrap) = AdminBootstrap::load(&self.config.auth.admin_bootstrap_path)? else {
            return Ok(());
        };
        let credentials_key = StoreKey::AdminCredentials.build();
        if self.store.exists(&credentials_key).await? {
            ldebug!(
                "system",
                LogStage::Startup,
                LogComponent::Config,
                "admin_already_provisioned",
                "Admin credentials already present, keeping stored ones",
            );
            return Ok(());
        }
        let (username, password_hash) = bootstrap.into_hashed()?;
        self.store
            .hash_set_multiple(
                &credentials_key,
                &[
                    ("username".to_string(), username.clone()),
                    ("password_hash".to_string(), password_hash),
                ],
            )
            .await?;
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Config,
            "admin_provisioned",
            "Provisioned initial admin credentials",
            username = %username,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::upstream::NoopConnector;

    #[tokio::test]
    async fn test_build_with_memory_store() {
        let context = AppContext::build(AppConfig::default(), Arc::new(NoopConnector))
            .await
            .unwrap();
        assert_eq!(context.store.backend_name(), "memory");
        context.store.ping().await.unwrap();
    }
}
