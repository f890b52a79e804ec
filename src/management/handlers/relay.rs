//! # 中继入口
//!
//! 转发前管线：准入（C4）→ 调度（C5）→ 上游转发 → 记账（C8）。
//! 一旦准入成功，并发预定必须在所有路径上恰好释放一次——包括
//! 调度失败、转发超时与上游错误；释放动作统一收敛在 `record` 里。

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::accounts::Platform;
use crate::auth::{Admission, AdmissionRequest};
use crate::error::GatewayError;
use crate::logging::{LogComponent, LogStage};
use crate::management::response;
use crate::management::server::AppState;
use crate::management::upstream::DispatchContext;
use crate::scheduler::ScheduleRequest;
use crate::statistics::{TokenUsage, UsageRecord};
use crate::{ldebug, lwarn};

/// `POST /api/v1/messages` 与 `POST /claude/v1/messages`
pub async fn relay_claude(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<Value>,
) -> Response {
    relay(state, Platform::Claude, headers, body).await
}

/// `POST /openai/v1/chat/completions`
pub async fn relay_openai(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<Value>,
) -> Response {
    relay(state, Platform::OpenAi, headers, body).await
}

/// `POST /gemini/v1/generate`
pub async fn relay_gemini(
    state: State<AppState>,
    headers: HeaderMap,
    body: Json<Value>,
) -> Response {
    relay(state, Platform::Gemini, headers, body).await
}

async fn relay(
    State(state): State<AppState>,
    platform: Platform,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let context = &state.context;
    let request_id = Uuid::new_v4().to_string();

    let Some(secret) = extract_secret(&headers) else {
        return response::error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing api key",
        );
    };

    let requested_model = body
        .get("model")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    // 准入
    let admission_request = AdmissionRequest {
        request_id: request_id.clone(),
        platform,
        requested_model: requested_model.clone(),
        user_agent: header_value(&headers, "user-agent"),
        client_ip: client_ip(&headers),
    };
    let Admission { key, ticket } = match context.admission.admit(&secret, &admission_request).await
    {
        Ok(admission) => admission,
        Err(err) => return response::app_error(&err),
    };

    // 调度。此刻起并发预定已生效，所有退出路径都经由 record 释放。
    let session_hash = derive_session_hash(&body);
    let schedule_request = ScheduleRequest {
        request_id: &request_id,
        key: &key,
        platform,
        session_hash: session_hash.as_deref(),
        requested_model: requested_model.as_deref(),
    };
    let selection = match context.scheduler.select(&schedule_request).await {
        Ok(selection) => selection,
        Err(err) => {
            context
                .usage
                .record(
                    ticket,
                    UsageRecord {
                        request_id: request_id.clone(),
                        account: None,
                        model: requested_model,
                        tokens: TokenUsage::default(),
                    },
                )
                .await;
            return response::app_error(&err);
        }
    };

    let account = match context
        .accounts
        .get_account(selection.account_type, &selection.account_id)
        .await
    {
        Ok(Some(account)) => account,
        Ok(None) => {
            // 选择与读取之间账户被删除
            lwarn!(
                &request_id,
                LogStage::Scheduling,
                LogComponent::Relay,
                "selected_account_vanished",
                "Selected account disappeared before dispatch",
                account_id = %selection.account_id,
            );
            context
                .usage
                .record(
                    ticket,
                    UsageRecord {
                        request_id: request_id.clone(),
                        account: None,
                        model: requested_model,
                        tokens: TokenUsage::default(),
                    },
                )
                .await;
            return response::app_error(&GatewayError::no_available_accounts(
                "No available upstream accounts",
            ));
        }
        Err(err) => {
            context
                .usage
                .record(
                    ticket,
                    UsageRecord {
                        request_id: request_id.clone(),
                        account: None,
                        model: requested_model,
                        tokens: TokenUsage::default(),
                    },
                )
                .await;
            return response::app_error(&err);
        }
    };

    // 转发（整体受请求超时约束）
    let timeout = Duration::from_secs(context.config.server.request_timeout_secs);
    let dispatch = tokio::time::timeout(
        timeout,
        context.connector.dispatch(DispatchContext {
            request_id: &request_id,
            account: &account,
            requested_model: requested_model.as_deref(),
            body: &body,
        }),
    )
    .await;

    let outcome = match dispatch {
        Ok(result) => result,
        Err(_) => Err(GatewayError::upstream(format!(
            "upstream timeout after {}s",
            timeout.as_secs()
        ))),
    };

    match outcome {
        Ok(upstream) => {
            if upstream.rate_limited {
                // 429 类信号：标记账户限流并立刻散开该会话
                let _ = context
                    .accounts
                    .mark_limited(selection.account_type, &selection.account_id)
                    .await;
                if let Some(hash) = session_hash.as_deref() {
                    let _ = context.scheduler.invalidate_session(platform, hash).await;
                }
            }
            context
                .usage
                .record(
                    ticket,
                    UsageRecord {
                        request_id: request_id.clone(),
                        account: Some((selection.account_type, selection.account_id.clone())),
                        model: requested_model,
                        tokens: upstream.tokens,
                    },
                )
                .await;

            ldebug!(
                &request_id,
                LogStage::ExternalApi,
                LogComponent::Relay,
                "relay_complete",
                "Relay round trip complete",
                account_id = %selection.account_id,
                status = upstream.status,
            );

            let status =
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(upstream.body)).into_response()
        }
        Err(err) => {
            // 上游失败：零 token 记账并释放并发
            context
                .usage
                .record(
                    ticket,
                    UsageRecord {
                        request_id: request_id.clone(),
                        account: Some((selection.account_type, selection.account_id)),
                        model: requested_model,
                        tokens: TokenUsage::default(),
                    },
                )
                .await;
            response::app_error(&err)
        }
    }
}

/// 从请求头取 API 密钥：`x-api-key` 优先，其次 `Authorization: Bearer`
fn extract_secret(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }
    header_value(headers, "authorization")
        .and_then(|auth| auth.strip_prefix("Bearer ").map(ToString::to_string))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// 客户端 IP：`x-forwarded-for` 首项，缺省 unknown
fn client_ip(headers: &HeaderMap) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|raw| raw.split(',').next().map(|ip| ip.trim().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// 请求指纹：SHA-256(系统提示词 ‖ 首条用户消息)
///
/// 两者都缺失的请求没有会话语义，返回 None。
fn derive_session_hash(body: &Value) -> Option<String> {
    let system = body.get("system").map(flatten_content);
    let first_user = body
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages.iter().find(|message| {
                message.get("role").and_then(Value::as_str) == Some("user")
            })
        })
        .and_then(|message| message.get("content"))
        .map(flatten_content);

    if system.is_none() && first_user.is_none() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(system.unwrap_or_default().as_bytes());
    hasher.update(first_user.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();

    use std::fmt::Write;
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    Some(out)
}

/// 文本内容展平：字符串原样，分块内容拼接 text 字段
fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
