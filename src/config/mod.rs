//! # 配置管理模块

mod app_config;
mod bootstrap;

pub use app_config::{
    AppConfig, AuthConfig, PricingConfig, SchedulerConfig, ServerConfig, StoreBackendKind,
    StoreConfig,
};
pub use bootstrap::AdminBootstrap;
