//! 用量计费集成测试：计数维度、可加性、账户对称计数与释放义务。

use std::sync::Arc;

use chrono::Utc;
use relay_gateway::accounts::{
    AccountCredentials, AccountKind, AccountStatus, ModelSupport, ProviderKind, RateLimitState,
    UpstreamAccount,
};
use relay_gateway::app::AppContext;
use relay_gateway::auth::api_key::NewApiKey;
use relay_gateway::accounts::Platform;
use relay_gateway::auth::AdmissionRequest;
use relay_gateway::config::AppConfig;
use relay_gateway::management::upstream::NoopConnector;
use relay_gateway::pricing::{PriceTable, parse_formatted};
use relay_gateway::statistics::{Period, TokenUsage, UsageRecord};

async fn build_context() -> AppContext {
    let mut config = AppConfig::default();
    config.auth.pepper = "usage-pepper".to_string();
    AppContext::build(config, Arc::new(NoopConnector))
        .await
        .expect("context should build on memory store")
}

fn admission_request() -> AdmissionRequest {
    AdmissionRequest {
        request_id: "req-usage".to_string(),
        platform: Platform::Claude,
        requested_model: None,
        user_agent: None,
        client_ip: "198.51.100.3".to_string(),
    }
}

fn tokens(input: u64, output: u64, cache_create: u64, cache_read: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: input,
        output_tokens: output,
        cache_create_tokens: cache_create,
        cache_read_tokens: cache_read,
    }
}

async fn record_once(
    context: &AppContext,
    secret: &str,
    model: &str,
    usage: TokenUsage,
    account: Option<(ProviderKind, String)>,
) {
    let admission = context
        .admission
        .admit(secret, &admission_request())
        .await
        .unwrap();
    context
        .usage
        .record(
            admission.ticket,
            UsageRecord {
                request_id: "req-usage".to_string(),
                account,
                model: Some(model.to_string()),
                tokens: usage,
            },
        )
        .await;
}

#[tokio::test]
async fn counters_accumulate_across_dimensions() {
    let context = build_context().await;
    let (record, secret) = context.keys.create_key(NewApiKey::default()).await.unwrap();

    record_once(&context, &secret, "claude-3-5-sonnet-20241022", tokens(100, 50, 10, 40), None)
        .await;
    record_once(&context, &secret, "claude-3-haiku", tokens(10, 5, 0, 0), None).await;

    let lifetime = context.usage.lifetime(&record.id).await.unwrap();
    assert_eq!(lifetime.requests, 2);
    assert_eq!(lifetime.input_tokens, 110);
    assert_eq!(lifetime.output_tokens, 55);
    assert_eq!(lifetime.cache_create_tokens, 10);
    assert_eq!(lifetime.cache_read_tokens, 40);
    assert_eq!(lifetime.all_tokens, 215);

    let daily = context
        .usage
        .period_usage(&record.id, Period::Daily, Utc::now())
        .await
        .unwrap();
    assert_eq!(daily.all_tokens, 215);

    let monthly = context
        .usage
        .period_usage(&record.id, Period::Monthly, Utc::now())
        .await
        .unwrap();
    assert_eq!(monthly.requests, 2);

    // 按模型维度降序
    let rows = context
        .usage
        .model_usage(&record.id, Period::Daily, Utc::now())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].model, "claude-3-5-sonnet-20241022");
    assert_eq!(rows[0].usage.all_tokens, 200);
    assert_eq!(rows[1].model, "claude-3-haiku");
    assert_eq!(rows[1].usage.all_tokens, 15);
}

/// 分两次记录 (a, b) 与一次记录 (a+b) 的计数结果一致
#[tokio::test]
async fn recording_is_additive() {
    let context = build_context().await;
    let (split_key, split_secret) =
        context.keys.create_key(NewApiKey::default()).await.unwrap();
    let (whole_key, whole_secret) =
        context.keys.create_key(NewApiKey::default()).await.unwrap();

    record_once(&context, &split_secret, "m", tokens(30, 7, 0, 0), None).await;
    record_once(&context, &split_secret, "m", tokens(70, 13, 0, 0), None).await;
    record_once(&context, &whole_secret, "m", tokens(100, 20, 0, 0), None).await;

    let split = context.usage.lifetime(&split_key.id).await.unwrap();
    let whole = context.usage.lifetime(&whole_key.id).await.unwrap();
    assert_eq!(split.input_tokens, whole.input_tokens);
    assert_eq!(split.output_tokens, whole.output_tokens);
    assert_eq!(split.all_tokens, whole.all_tokens);
    // 请求数按调用次数计
    assert_eq!(split.requests, 2);
    assert_eq!(whole.requests, 1);
}

/// 提供 accountId 时账户计数与密钥计数对称增长，并刷新账户 last_used_at
#[tokio::test]
async fn account_counters_mirror_key_counters() {
    let context = build_context().await;
    let account = UpstreamAccount {
        id: "acct-stats".to_string(),
        name: "acct".to_string(),
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

    record_once(
        &context,
        &secret,
        "m",
        tokens(11, 22, 0, 0),
        Some((ProviderKind::ClaudeOauth, "acct-stats".to_string())),
    )
    .await;
    // 无账户的记录不触碰账户计数
    record_once(&context, &secret, "m", tokens(5, 5, 0, 0), None).await;

    let key_usage = context.usage.lifetime(&record.id).await.unwrap();
    assert_eq!(key_usage.all_tokens, 43);

    let account_usage = context.usage.account_lifetime("acct-stats").await.unwrap();
    assert_eq!(account_usage.requests, 1);
    assert_eq!(account_usage.all_tokens, 33);

    let stored = context
        .accounts
        .get_account(ProviderKind::ClaudeOauth, "acct-stats")
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_used_at.is_some());

    // 密钥 last_used_at 也被刷新
    let stored_key = context.keys.get_key(&record.id).await.unwrap().unwrap();
    assert!(stored_key.last_used_at.is_some());
}

/// 费用按价格表累计，格式化往返无损
#[tokio::test]
async fn cost_accumulates_with_pricing() {
    let context = build_context().await;
    context.pricing.swap(
        PriceTable::from_json_str(
            r#"{"metered": {"input": 3.0, "output": 15.0}}"#,
        )
        .unwrap(),
    );
    let (record, secret) = context.keys.create_key(NewApiKey::default()).await.unwrap();

    record_once(&context, &secret, "metered", tokens(1000, 500, 0, 0), None).await;

    // 1000×3 + 500×15 = 10500 微美元
    let lifetime = context.usage.lifetime(&record.id).await.unwrap();
    assert_eq!(lifetime.cost_micros, 10_500);

    let spent = context
        .usage
        .daily_cost_micros(&record.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(spent, 10_500);
    assert_eq!(
        parse_formatted(&relay_gateway::pricing::format_micros(spent)),
        Some(10_500)
    );
}

/// 零 token 中止记录仍计一次请求并释放并发
#[tokio::test]
async fn abort_record_releases_concurrency() {
    let context = build_context().await;
    let (record, secret) = context
        .keys
        .create_key(NewApiKey {
            concurrency_limit: 1,
            ..NewApiKey::default()
        })
        .await
        .unwrap();

    let admission = context
        .admission
        .admit(&secret, &admission_request())
        .await
        .unwrap();
    assert_eq!(context.admission.concurrency(&record.id).await.unwrap(), 1);

    context
        .usage
        .record(
            admission.ticket,
            UsageRecord {
                request_id: "req-abort".to_string(),
                account: None,
                model: None,
                tokens: TokenUsage::default(),
            },
        )
        .await;

    assert_eq!(context.admission.concurrency(&record.id).await.unwrap(), 0);
    let lifetime = context.usage.lifetime(&record.id).await.unwrap();
    assert_eq!(lifetime.requests, 1);
    assert_eq!(lifetime.all_tokens, 0);
}
