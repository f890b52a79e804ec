//! HTTP 接口集成测试：apiStats 查询、运维端点与中继入口的端到端行为。

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use relay_gateway::accounts::{
    AccountCredentials, AccountKind, AccountStatus, ModelSupport, RateLimitState, UpstreamAccount,
};
use relay_gateway::app::AppContext;
use relay_gateway::auth::api_key::NewApiKey;
use relay_gateway::config::AppConfig;
use relay_gateway::management::server::router_for;
use relay_gateway::management::upstream::NoopConnector;

async fn build() -> (AppContext, Router) {
    let mut config = AppConfig::default();
    config.auth.pepper = "http-pepper".to_string();
    let context = AppContext::build(config, Arc::new(NoopConnector))
        .await
        .expect("context should build on memory store");
    let router = router_for(context.clone());
    (context, router)
}

async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn get_key_id_roundtrip() {
    let (context, router) = build().await;
    let (record, secret) = context.keys.create_key(NewApiKey::default()).await.unwrap();

    let (status, body) = post_json(
        &router,
        "/apiStats/api/get-key-id",
        json!({ "apiKey": secret }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["id"], json!(record.id));

    // 缺字段 → 400
    let (status, _) = post_json(&router, "/apiStats/api/get-key-id", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 未知密钥 → 401
    let (status, body) = post_json(
        &router,
        "/apiStats/api/get-key-id",
        json!({ "apiKey": "crs_not-a-real-secret" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn user_stats_by_id_and_secret() {
    let (context, router) = build().await;
    let (record, secret) = context
        .keys
        .create_key(NewApiKey {
            name: "stats-key".to_string(),
            daily_cost_limit_micros: 2_000_000,
            ..NewApiKey::default()
        })
        .await
        .unwrap();

    let (status, body) = post_json(
        &router,
        "/apiStats/api/user-stats",
        json!({ "apiKey": secret }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], json!(record.id));
    assert_eq!(body["data"]["name"], json!("stats-key"));
    assert_eq!(body["data"]["dailyCost"]["limit"], json!("$2.000000"));
    assert_eq!(body["data"]["usage"]["lifetime"]["requests"], json!(0));

    // apiId 同样可用
    let (status, body) = post_json(
        &router,
        "/apiStats/api/user-stats",
        json!({ "apiId": record.id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], json!(record.id));

    // 非 UUID 的 apiId → 400
    let (status, _) = post_json(
        &router,
        "/apiStats/api/user-stats",
        json!({ "apiId": "not-a-uuid" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 未知 UUID → 404
    let (status, _) = post_json(
        &router,
        "/apiStats/api/user-stats",
        json!({ "apiId": "00000000-0000-4000-8000-000000000000" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_model_stats_validates_period() {
    let (context, router) = build().await;
    let (_, secret) = context.keys.create_key(NewApiKey::default()).await.unwrap();

    let (status, body) = post_json(
        &router,
        "/apiStats/api/user-model-stats",
        json!({ "apiKey": secret, "period": "monthly" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["period"], json!("monthly"));
    assert_eq!(body["data"]["models"], json!([]));

    let (status, _) = post_json(
        &router,
        "/apiStats/api/user-model-stats",
        json!({ "apiKey": secret, "period": "weekly" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_metrics() {
    let (_, router) = build().await;

    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["status"], json!("healthy"));
    assert_eq!(body["data"]["storeBackend"], json!("memory"));

    let response = router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("relay_gateway_uptime_seconds"));
}

/// 中继入口端到端：准入 → 调度 → 上游失败 → 记账释放并发。
/// 占位连接器总是报上游错误，但并发额度必须回到零、请求计数加一。
#[tokio::test]
async fn relay_path_records_and_releases_on_upstream_error() {
    let (context, router) = build().await;
    let account = UpstreamAccount {
        id: "relay-acct".to_string(),
        name: "relay".to_string(),
        is_active: true,
        status: AccountStatus::Active,
        kind: AccountKind::Shared,
        schedulable: true,
        priority: 50,
        last_used_at: None,
        rate_limit: RateLimitState::default(),
        model_support: ModelSupport::All,
        credentials: AccountCredentials::ClaudeOauth {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
        },
    };
    context.accounts.upsert_account(&account).await.unwrap();
    let (record, secret) = context.keys.create_key(NewApiKey::default()).await.unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-api-key", &secret)
                .body(Body::from(
                    json!({
                        "model": "claude-3-5-sonnet-20241022",
                        "system": "helper",
                        "messages": [{"role": "user", "content": "hi"}]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // 并发已释放，请求已计数（零 token）
    assert_eq!(context.admission.concurrency(&record.id).await.unwrap(), 0);
    let lifetime = context.usage.lifetime(&record.id).await.unwrap();
    assert_eq!(lifetime.requests, 1);
    assert_eq!(lifetime.all_tokens, 0);

    // 账户维度同样计了一次请求
    let account_usage = context.usage.account_lifetime("relay-acct").await.unwrap();
    assert_eq!(account_usage.requests, 1);

    // 缺密钥 → 401
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"model": "m"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
