//! # 后台任务
//!
//! 过期密钥惰性清理与价格表热重载，均按配置间隔在独立任务中运行。

use std::time::Duration;

use chrono::Utc;

use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

use super::context::AppContext;

/// 启动全部后台任务
pub fn spawn_background_tasks(context: &AppContext) {
    spawn_expired_key_sweep(context);
    spawn_price_table_reload(context);
}

/// 过期密钥清理：把 `expires_at` 已过的激活密钥翻转为停用
fn spawn_expired_key_sweep(context: &AppContext) {
    let keys = context.keys.clone();
    let interval_secs = context.config.auth.cleanup_interval_secs;
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match keys.disable_expired_keys(Utc::now()).await {
                Ok(0) => {}
                Ok(flipped) => {
                    linfo!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::ApiKey,
                        "expired_keys_swept",
                        "Disabled expired api keys",
                        count = flipped,
                    );
                }
                Err(err) => {
                    lwarn!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::ApiKey,
                        "expired_key_sweep_failed",
                        "Expired key sweep failed",
                        error = %err,
                    );
                }
            }
        }
    });
}

/// 价格表热重载：按间隔重新读取文件并整体换新
fn spawn_price_table_reload(context: &AppContext) {
    let pricing = context.pricing.clone();
    let path = context.config.pricing.table_path.clone();
    let interval_secs = context.config.pricing.reload_interval_secs;
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match pricing.reload_from_file(&path) {
                Ok(()) => {
                    ldebug!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::Pricing,
                        "price_table_reloaded",
                        "Reloaded price table",
                        models = pricing.snapshot().len(),
                    );
                }
                Err(err) => {
                    lwarn!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::Pricing,
                        "price_table_reload_failed",
                        "Price table reload failed, keeping previous table",
                        error = %err,
                    );
                }
            }
        }
    });
}
