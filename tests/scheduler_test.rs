//! 统一调度器集成测试：绑定/分组/粘滞/共享池优先序与排序规则。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_gateway::accounts::{
    AccountCredentials, AccountGroup, AccountKind, AccountStatus, ModelSupport, Platform,
    ProviderKind, RateLimitState, UpstreamAccount,
};
use relay_gateway::app::AppContext;
use relay_gateway::auth::api_key::NewApiKey;
use relay_gateway::auth::{ApiKeyRecord, PlatformBindings};
use relay_gateway::config::AppConfig;
use relay_gateway::error::GatewayError;
use relay_gateway::management::upstream::NoopConnector;
use relay_gateway::scheduler::{ScheduleRequest, SessionMap, SessionMapping};

async fn build_context() -> AppContext {
    let mut config = AppConfig::default();
    config.auth.pepper = "scheduler-pepper".to_string();
    AppContext::build(config, Arc::new(NoopConnector))
        .await
        .expect("context should build on memory store")
}

fn claude_account(
    id: &str,
    priority: i32,
    last_used_at: Option<DateTime<Utc>>,
) -> UpstreamAccount {
    UpstreamAccount {
        id: id.to_string(),
        name: id.to_string(),
        is_active: true,
        status: AccountStatus::Active,
        kind: AccountKind::Shared,
        schedulable: true,
        priority,
        last_used_at,
        rate_limit: RateLimitState::default(),
        model_support: ModelSupport::All,
        credentials: AccountCredentials::ClaudeOauth {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
        },
    }
}

fn openai_account(id: &str, priority: i32, models: ModelSupport) -> UpstreamAccount {
    UpstreamAccount {
        id: id.to_string(),
        name: id.to_string(),
        is_active: true,
        status: AccountStatus::Active,
        kind: AccountKind::Shared,
        schedulable: true,
        priority,
        last_used_at: None,
        rate_limit: RateLimitState::default(),
        model_support: models,
        credentials: AccountCredentials::Openai {
            api_key: "sk-upstream".to_string(),
        },
    }
}

async fn plain_key(context: &AppContext) -> ApiKeyRecord {
    context
        .keys
        .create_key(NewApiKey::default())
        .await
        .unwrap()
        .0
}

async fn bound_key(context: &AppContext, bindings: PlatformBindings) -> ApiKeyRecord {
    context
        .keys
        .create_key(NewApiKey {
            bindings,
            ..NewApiKey::default()
        })
        .await
        .unwrap()
        .0
}

fn schedule<'a>(
    key: &'a ApiKeyRecord,
    platform: Platform,
    session_hash: Option<&'a str>,
    model: Option<&'a str>,
) -> ScheduleRequest<'a> {
    ScheduleRequest {
        request_id: "req-sched",
        key,
        platform,
        session_hash,
        requested_model: model,
    }
}

fn session_map(context: &AppContext) -> SessionMap {
    SessionMap::new(context.store.clone(), Duration::from_secs(3600))
}

/// 种子场景 1：专属绑定优先于粘滞，且不改写既有映射
#[tokio::test]
async fn dedicated_binding_wins_over_sticky() {
    let context = build_context().await;
    let a1 = claude_account("a1", 50, None);
    let a2 = claude_account("a2", 50, None);
    context.accounts.upsert_account(&a1).await.unwrap();
    context.accounts.upsert_account(&a2).await.unwrap();

    let key = bound_key(
        &context,
        PlatformBindings {
            claude_oauth: Some("a1".to_string()),
            ..PlatformBindings::default()
        },
    )
    .await;

    // 会话 H 先前映射到 a2
    let sessions = session_map(&context);
    let mapping = SessionMapping {
        account_id: "a2".to_string(),
        account_type: ProviderKind::ClaudeOauth,
    };
    sessions.set(Platform::Claude, "H", &mapping).await.unwrap();

    let selection = context
        .scheduler
        .select(&schedule(
            &key,
            Platform::Claude,
            Some("H"),
            Some("claude-3-5-sonnet-20241022"),
        ))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "a1");

    // 映射未被改写
    assert_eq!(
        sessions.get(Platform::Claude, "H").await.unwrap(),
        Some(mapping)
    );
}

/// 种子场景 2：TTL 内的粘滞复用同一账户
#[tokio::test]
async fn sticky_session_within_ttl() {
    let context = build_context().await;
    let now = Utc::now();
    context
        .accounts
        .upsert_account(&claude_account(
            "a3",
            50,
            Some(now - chrono::Duration::seconds(10)),
        ))
        .await
        .unwrap();
    context
        .accounts
        .upsert_account(&claude_account(
            "a4",
            50,
            Some(now - chrono::Duration::seconds(5)),
        ))
        .await
        .unwrap();

    let key = plain_key(&context).await;

    // 首次：LRU 选中 a3 并建立映射
    let first = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, Some("h1"), None))
        .await
        .unwrap();
    assert_eq!(first.account_id, "a3");

    // a3 的 last_used_at 被计费端推后也不影响粘滞
    context
        .accounts
        .touch_last_used(ProviderKind::ClaudeOauth, "a3", Utc::now())
        .await
        .unwrap();

    let second = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, Some("h1"), None))
        .await
        .unwrap();
    assert_eq!(second.account_id, "a3");
}

/// 种子场景 3：映射账户被限流后换到候补并删除旧映射
#[tokio::test]
async fn rate_limited_sticky_falls_over() {
    let context = build_context().await;
    let now = Utc::now();
    context
        .accounts
        .upsert_account(&claude_account(
            "a3",
            50,
            Some(now - chrono::Duration::seconds(10)),
        ))
        .await
        .unwrap();
    context
        .accounts
        .upsert_account(&claude_account(
            "a4",
            50,
            Some(now - chrono::Duration::seconds(5)),
        ))
        .await
        .unwrap();

    let key = plain_key(&context).await;
    let first = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, Some("h1"), None))
        .await
        .unwrap();
    assert_eq!(first.account_id, "a3");

    context
        .accounts
        .mark_limited(ProviderKind::ClaudeOauth, "a3")
        .await
        .unwrap();

    let second = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, Some("h1"), None))
        .await
        .unwrap();
    assert_eq!(second.account_id, "a4");

    // 新映射指向 a4
    let sessions = session_map(&context);
    assert_eq!(
        sessions
            .get(Platform::Claude, "h1")
            .await
            .unwrap()
            .unwrap()
            .account_id,
        "a4"
    );
}

/// 种子场景 4：priority 优先于 LRU
#[tokio::test]
async fn priority_beats_lru() {
    let context = build_context().await;
    context
        .accounts
        .upsert_account(&claude_account("a5", 10, Some(Utc::now())))
        .await
        .unwrap();
    context
        .accounts
        .upsert_account(&claude_account("a6", 50, None))
        .await
        .unwrap();

    let key = plain_key(&context).await;
    let selection = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, None))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "a5");
}

/// 种子场景 5：模型过滤剔除不支持的账户，空声明放行全部
#[tokio::test]
async fn model_filter_prefers_supporting_account() {
    let context = build_context().await;
    context
        .accounts
        .upsert_account(&openai_account(
            "a7",
            50,
            ModelSupport::Allowed(vec!["gpt-4o".to_string()]),
        ))
        .await
        .unwrap();
    context
        .accounts
        .upsert_account(&openai_account("a8", 50, ModelSupport::Allowed(vec![])))
        .await
        .unwrap();

    let key = plain_key(&context).await;
    let selection = context
        .scheduler
        .select(&schedule(&key, Platform::OpenAi, None, Some("gpt-4o-mini")))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "a8");
}

/// 分组绑定把候选池限定到组内成员
#[tokio::test]
async fn group_binding_restricts_pool() {
    let context = build_context().await;
    // 组外还有一个更高优先级账户，不应被选中
    context
        .accounts
        .upsert_account(&claude_account("outside", 1, None))
        .await
        .unwrap();
    context
        .accounts
        .upsert_account(&claude_account("member-1", 50, None))
        .await
        .unwrap();

    context
        .accounts
        .upsert_group(&AccountGroup {
            id: "g1".to_string(),
            name: "组一".to_string(),
            platform: Platform::Claude,
            members: vec![(ProviderKind::ClaudeOauth, "member-1".to_string())],
        })
        .await
        .unwrap();

    let key = bound_key(
        &context,
        PlatformBindings {
            claude_oauth: Some("group:g1".to_string()),
            ..PlatformBindings::default()
        },
    )
    .await;

    let selection = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, None))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "member-1");
}

/// 分组缺失/平台不符/为空对请求是致命的
#[tokio::test]
async fn group_misconfiguration_is_fatal() {
    let context = build_context().await;
    let key = bound_key(
        &context,
        PlatformBindings {
            claude_oauth: Some("group:missing".to_string()),
            ..PlatformBindings::default()
        },
    )
    .await;

    let err = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::GroupMisconfigured { .. }));

    // 平台不匹配
    context
        .accounts
        .upsert_group(&AccountGroup {
            id: "g-openai".to_string(),
            name: "openai 组".to_string(),
            platform: Platform::OpenAi,
            members: vec![(ProviderKind::OpenAi, "whatever".to_string())],
        })
        .await
        .unwrap();
    let key2 = bound_key(
        &context,
        PlatformBindings {
            claude_oauth: Some("group:g-openai".to_string()),
            ..PlatformBindings::default()
        },
    )
    .await;
    let err = context
        .scheduler
        .select(&schedule(&key2, Platform::Claude, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::GroupMisconfigured { .. }));
}

/// 个体绑定指向缺失账户时降级到共享池
#[tokio::test]
async fn missing_bound_account_falls_back_to_pool() {
    let context = build_context().await;
    context
        .accounts
        .upsert_account(&claude_account("pool-1", 50, None))
        .await
        .unwrap();

    let key = bound_key(
        &context,
        PlatformBindings {
            claude_oauth: Some("ghost".to_string()),
            ..PlatformBindings::default()
        },
    )
    .await;

    let selection = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, None))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "pool-1");
}

/// 空池返回 NoAvailableAccounts，且消息包含请求模型
#[tokio::test]
async fn empty_pool_is_no_available_accounts() {
    let context = build_context().await;
    let key = plain_key(&context).await;

    let err = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, Some("gpt-4o")))
        .await
        .unwrap_err();
    match err {
        GatewayError::NoAvailableAccounts { message } => {
            assert!(message.contains("gpt-4o"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// 专属账户不进入共享池
#[tokio::test]
async fn dedicated_accounts_stay_out_of_shared_pool() {
    let context = build_context().await;
    let mut dedicated = claude_account("ded-1", 1, None);
    dedicated.kind = AccountKind::Dedicated;
    context.accounts.upsert_account(&dedicated).await.unwrap();
    context
        .accounts
        .upsert_account(&claude_account("shared-1", 99, None))
        .await
        .unwrap();

    let key = plain_key(&context).await;
    let selection = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, None))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "shared-1");
}

/// 不可调度（排水）与停用账户被过滤
#[tokio::test]
async fn drained_and_inactive_accounts_are_filtered() {
    let context = build_context().await;
    let mut drained = claude_account("drained", 1, None);
    drained.schedulable = false;
    let mut inactive = claude_account("inactive", 1, None);
    inactive.is_active = false;
    let mut errored = claude_account("errored", 1, None);
    errored.status = AccountStatus::Error;
    context.accounts.upsert_account(&drained).await.unwrap();
    context.accounts.upsert_account(&inactive).await.unwrap();
    context.accounts.upsert_account(&errored).await.unwrap();
    context
        .accounts
        .upsert_account(&claude_account("healthy", 99, None))
        .await
        .unwrap();

    let key = plain_key(&context).await;
    let selection = context
        .scheduler
        .select(&schedule(&key, Platform::Claude, None, None))
        .await
        .unwrap();
    assert_eq!(selection.account_id, "healthy");
}
