//! # 运维端点

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::management::response;
use crate::management::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthPayload {
    status: &'static str,
    store_backend: &'static str,
    pricing_models: usize,
    uptime_secs: i64,
}

/// `GET /health`：存储可达即健康，否则 503
pub async fn health(State(state): State<AppState>) -> Response {
    let context = &state.context;
    match context.store.ping().await {
        Ok(()) => response::success(HealthPayload {
            status: "healthy",
            store_backend: context.store.backend_name(),
            pricing_models: context.pricing.snapshot().len(),
            uptime_secs: (Utc::now() - context.started_at).num_seconds(),
        }),
        Err(err) => {
            let (_, code) = err.to_http_response_parts();
            response::error(StatusCode::SERVICE_UNAVAILABLE, code, "store unreachable")
        }
    }
}

/// `GET /metrics`：纯文本运维计数
pub async fn metrics(State(state): State<AppState>) -> Response {
    let context = &state.context;
    let uptime = (Utc::now() - context.started_at).num_seconds();

    let key_count = context
        .keys
        .list_keys()
        .await
        .map(|keys| keys.len())
        .unwrap_or(0);

    let mut body = String::new();
    body.push_str(&format!("relay_gateway_uptime_seconds {uptime}\n"));
    body.push_str(&format!("relay_gateway_api_keys {key_count}\n"));
    body.push_str(&format!(
        "relay_gateway_pricing_models {}\n",
        context.pricing.snapshot().len()
    ));
    for platform in [
        crate::accounts::Platform::Claude,
        crate::accounts::Platform::OpenAi,
        crate::accounts::Platform::Gemini,
    ] {
        let count = context
            .accounts
            .list_platform(platform)
            .await
            .map(|accounts| accounts.len())
            .unwrap_or(0);
        body.push_str(&format!(
            "relay_gateway_accounts{{platform=\"{platform}\"}} {count}\n"
        ));
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
