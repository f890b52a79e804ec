//! # LLM 中继网关
//!
//! 多租户 LLM 中继网关入口：密钥准入、统一账户调度与用量计费。
//! 流式透传实现通过 `UpstreamConnector` 接缝注入。

use std::sync::Arc;

use relay_gateway::logging::{LogComponent, LogStage};
use relay_gateway::management::upstream::NoopConnector;
use relay_gateway::{AppConfig, linfo, lwarn};

#[tokio::main]
async fn main() -> relay_gateway::Result<()> {
    // 初始化日志
    relay_gateway::logging::init_logging();

    println!("Relay Gateway v0.3.1");

    // 加载配置
    let config_path =
        std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = match AppConfig::load(&config_path) {
        Ok(config) => {
            println!("✅ 配置加载成功");
            println!("  监听地址: {}:{}", config.server.host, config.server.port);
            println!("  存储后端: {:?}", config.store.backend);
            println!("  密钥前缀: {}", config.auth.secret_prefix);
            config
        }
        Err(e) => {
            eprintln!("❌ 配置加载失败: {e}");
            return Err(e);
        }
    };

    if config.auth.pepper.is_empty() {
        lwarn!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "empty_pepper",
            "Global pepper is empty, key hashes are not peppered",
        );
    }

    // 装配应用上下文（存储连接、服务、价格表、管理员引导）
    let context =
        match relay_gateway::app::AppContext::build(config, Arc::new(NoopConnector)).await {
            Ok(context) => {
                println!("✅ 存储连接成功 ({})", context.store.backend_name());
                println!("  价格表模型数: {}", context.pricing.snapshot().len());
                context
            }
            Err(e) => {
                eprintln!("❌ 应用上下文装配失败: {e}");
                return Err(e);
            }
        };

    // 启动后台任务（过期密钥清理、价格表热重载）
    relay_gateway::app::tasks::spawn_background_tasks(&context);

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "gateway_starting",
        "Relay gateway starting",
    );

    // HTTP 服务阻塞运行，Ctrl+C 优雅退出
    relay_gateway::management::server::serve(context).await?;

    println!("👋 网关已退出");
    Ok(())
}
