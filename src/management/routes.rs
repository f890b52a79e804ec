//! # 路由配置
//!
//! 中继入口在转发前经过准入与调度；apiStats 为密钥自助查询接口。

use axum::Router;
use axum::routing::{get, post};

use super::server::AppState;

/// 创建所有路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 运维端点
        .route(
            "/health",
            get(super::handlers::system::health),
        )
        .route(
            "/metrics",
            get(super::handlers::system::metrics),
        )
        // 密钥自助统计
        .route(
            "/apiStats/api/get-key-id",
            post(super::handlers::stats::get_key_id),
        )
        .route(
            "/apiStats/api/user-stats",
            post(super::handlers::stats::user_stats),
        )
        .route(
            "/apiStats/api/user-model-stats",
            post(super::handlers::stats::user_model_stats),
        )
        // 中继入口（准入 → 调度 → 转发 → 记账）
        .route(
            "/api/v1/messages",
            post(super::handlers::relay::relay_claude),
        )
        .route(
            "/claude/v1/messages",
            post(super::handlers::relay::relay_claude),
        )
        .route(
            "/openai/v1/chat/completions",
            post(super::handlers::relay::relay_openai),
        )
        .route(
            "/gemini/v1/generate",
            post(super::handlers::relay::relay_gemini),
        )
        .with_state(state)
}
