//! # HTTP 服务器

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::app::AppContext;
use crate::error::{GatewayError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::linfo;

use super::routes::create_routes;

/// 路由层共享状态
#[derive(Clone)]
pub struct AppState {
    pub context: AppContext,
}

impl AppState {
    #[must_use]
    pub const fn new(context: AppContext) -> Self {
        Self { context }
    }
}

/// 启动 HTTP 服务并阻塞到收到关停信号
pub async fn serve(context: AppContext) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        context.config.server.host, context.config.server.port
    )
    .parse()
    .map_err(|e| GatewayError::config_with_source("监听地址无效", anyhow::Error::new(e)))?;

    let router = create_routes(AppState::new(context));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::internal_with_source("端口绑定失败", e))?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::ServerSetup,
        "server_listening",
        "Gateway listening",
        addr = %addr,
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayError::internal_with_source("HTTP 服务异常退出", e))?;

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::ServerSetup,
        "server_stopped",
        "Gateway stopped",
    );
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// 供集成测试构造路由
#[must_use]
pub fn router_for(context: AppContext) -> axum::Router {
    create_routes(AppState::new(context))
}
