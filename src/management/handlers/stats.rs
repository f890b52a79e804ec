//! # 密钥自助统计接口
//!
//! 呈现方以 apiKey（明文密文）或 apiId（UUID）自证身份，查询自己的
//! 身份、限额与用量。响应不区分"未知密钥"与"哈希不匹配"。

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ApiKeyRecord;
use crate::error::GatewayError;
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::management::response;
use crate::management::server::AppState;
use crate::pricing::format_micros;
use crate::statistics::{ModelUsageRow, Period, UsageSnapshot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyIdentityRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_id: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyIdPayload {
    id: String,
}

/// `POST /apiStats/api/get-key-id`
pub async fn get_key_id(
    State(state): State<AppState>,
    Json(body): Json<KeyIdentityRequest>,
) -> Response {
    let Some(secret) = body.api_key.as_deref().map(str::trim).filter(|s| !s.is_empty())
    else {
        return response::app_error(&GatewayError::malformed("apiKey required"));
    };
    if !state.context.keys.is_valid_secret_format(secret) {
        return response::app_error(&GatewayError::malformed("apiKey malformed"));
    }
    match state.context.keys.find_by_secret(secret).await {
        Ok(Some(record)) => response::success(KeyIdPayload { id: record.id }),
        Ok(None) => {
            lwarn!(
                "system",
                LogStage::Authentication,
                LogComponent::Security,
                "stats_unknown_api_key",
                "Stats query with unknown api key",
            );
            response::app_error(&GatewayError::unauthorized("unknown key"))
        }
        Err(err) => response::app_error(&err),
    }
}

/// 身份解析：apiKey 优先，其次 apiId
async fn resolve_key(
    state: &AppState,
    body: &KeyIdentityRequest,
) -> Result<ApiKeyRecord, Response> {
    if let Some(secret) = body.api_key.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if !state.context.keys.is_valid_secret_format(secret) {
            return Err(response::app_error(&GatewayError::malformed(
                "apiKey malformed",
            )));
        }
        return match state.context.keys.find_by_secret(secret).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(response::app_error(&GatewayError::unauthorized("unknown key"))),
            Err(err) => Err(response::app_error(&err)),
        };
    }

    if let Some(api_id) = body.api_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if Uuid::parse_str(api_id).is_err() {
            return Err(response::app_error(&GatewayError::malformed(
                "apiId must be a uuid",
            )));
        }
        return match state.context.keys.get_key(api_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(response::error(
                StatusCode::NOT_FOUND,
                "KEY_NOT_FOUND",
                "no key with this id",
            )),
            Err(err) => Err(response::app_error(&err)),
        };
    }

    Err(response::app_error(&GatewayError::malformed(
        "apiKey or apiId required",
    )))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LimitsView {
    token_limit: u64,
    concurrency_limit: u32,
    rate_limit_window_secs: u64,
    rate_limit_requests: u64,
    daily_cost_limit: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RestrictionsView {
    model_restriction_enabled: bool,
    restricted_models: Vec<String>,
    client_restriction_enabled: bool,
    allowed_clients: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageView {
    lifetime: UsageSnapshot,
    daily: UsageSnapshot,
    monthly: UsageSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DailyCostView {
    spent: String,
    spent_micros: u64,
    limit: String,
    limit_micros: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserStatsPayload {
    id: String,
    name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    permissions: String,
    tags: Vec<String>,
    limits: LimitsView,
    restrictions: RestrictionsView,
    usage: UsageView,
    daily_cost: DailyCostView,
}

/// `POST /apiStats/api/user-stats`
pub async fn user_stats(
    State(state): State<AppState>,
    Json(body): Json<KeyIdentityRequest>,
) -> Response {
    let record = match resolve_key(&state, &body).await {
        Ok(record) => record,
        Err(response) => return response,
    };

    let now = Utc::now();
    let usage = &state.context.usage;
    let (lifetime, daily, monthly, spent_micros) = match tokio::try_join!(
        usage.lifetime(&record.id),
        usage.period_usage(&record.id, Period::Daily, now),
        usage.period_usage(&record.id, Period::Monthly, now),
        usage.daily_cost_micros(&record.id, now),
    ) {
        Ok(parts) => parts,
        Err(err) => return response::app_error(&err),
    };

    response::success(UserStatsPayload {
        id: record.id.clone(),
        name: record.name.clone(),
        is_active: record.is_active,
        created_at: record.created_at,
        expires_at: record.expires_at,
        last_used_at: record.last_used_at,
        permissions: record.permissions.to_string(),
        tags: record.tags.clone(),
        limits: LimitsView {
            token_limit: record.token_limit,
            concurrency_limit: record.concurrency_limit,
            rate_limit_window_secs: record.rate_limit_window_secs,
            rate_limit_requests: record.rate_limit_requests,
            daily_cost_limit: format_micros(record.daily_cost_limit_micros),
        },
        restrictions: RestrictionsView {
            model_restriction_enabled: record.model_restriction.enabled,
            restricted_models: record.model_restriction.restricted_models.clone(),
            client_restriction_enabled: record.client_restriction.enabled,
            allowed_clients: record.client_restriction.allowed_clients.clone(),
        },
        usage: UsageView {
            lifetime,
            daily,
            monthly,
        },
        daily_cost: DailyCostView {
            spent: format_micros(spent_micros),
            spent_micros,
            limit: format_micros(record.daily_cost_limit_micros),
            limit_micros: record.daily_cost_limit_micros,
        },
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelStatsPayload {
    period: String,
    models: Vec<ModelUsageRow>,
}

/// `POST /apiStats/api/user-model-stats`
pub async fn user_model_stats(
    State(state): State<AppState>,
    Json(body): Json<KeyIdentityRequest>,
) -> Response {
    let record = match resolve_key(&state, &body).await {
        Ok(record) => record,
        Err(response) => return response,
    };

    let period = match body.period.as_deref() {
        None => Period::Daily,
        Some(raw) => match raw.parse::<Period>() {
            Ok(period) => period,
            Err(_) => {
                return response::app_error(&GatewayError::malformed(
                    "period must be daily or monthly",
                ));
            }
        },
    };

    match state
        .context
        .usage
        .model_usage(&record.id, period, Utc::now())
        .await
    {
        Ok(models) => response::success(ModelStatsPayload {
            period: period.to_string(),
            models,
        }),
        Err(err) => response::app_error(&err),
    }
}
