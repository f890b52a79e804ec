//! # 每密钥滑动窗口限流
//!
//! 以 1 秒为桶粒度在存储 hash 中计数；准入时对窗口内桶求和与
//! 配额比较。检查与记录非事务化，轻微超量是文档化契约。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::{StoreManager, keys::StoreKey};

/// 窗口键 TTL 的冗余量：保证最老的桶在被统计前不会整键过期
const WINDOW_TTL_SLACK_SECS: u64 = 60;

/// 滑动窗口检查结果
#[derive(Debug, Clone, Copy)]
pub struct WindowOutcome {
    pub allowed: bool,
    pub current: u64,
    pub limit: u64,
}

/// 滑动窗口限流器
pub struct SlidingWindowLimiter {
    store: Arc<StoreManager>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub const fn new(store: Arc<StoreManager>) -> Self {
        Self { store }
    }

    /// 统计窗口内已计请求数并与上限比较
    ///
    /// `limit == 0` 表示不限流，直接放行。顺带清理窗口外的旧桶。
    pub async fn check(
        &self,
        key_id: &str,
        window_secs: u64,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome> {
        if limit == 0 || window_secs == 0 {
            return Ok(WindowOutcome {
                allowed: true,
                current: 0,
                limit,
            });
        }

        let key = StoreKey::RateLimitWindow {
            key_id: key_id.to_string(),
        }
        .build();
        let buckets = self.store.hash_get_all(&key).await?;

        let now_sec = now.timestamp();
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        let floor = now_sec - window;

        let mut current: u64 = 0;
        let mut stale = Vec::new();
        for (bucket, count) in &buckets {
            let Ok(bucket_sec) = bucket.parse::<i64>() else {
                stale.push(bucket.clone());
                continue;
            };
            if bucket_sec > floor {
                current += count.parse::<u64>().unwrap_or(0);
            } else {
                stale.push(bucket.clone());
            }
        }

        // 旧桶清理为尽力而为
        for bucket in stale {
            let _ = self.store.hash_delete(&key, &bucket).await;
        }

        Ok(WindowOutcome {
            allowed: current < limit,
            current,
            limit,
        })
    }

    /// 把一次已准入请求计入当前秒的桶
    pub async fn record(&self, key_id: &str, window_secs: u64, now: DateTime<Utc>) -> Result<()> {
        if window_secs == 0 {
            return Ok(());
        }
        let key = StoreKey::RateLimitWindow {
            key_id: key_id.to_string(),
        }
        .build();
        self.store
            .hash_incr_by(&key, &now.timestamp().to_string(), 1)
            .await?;
        self.store
            .expire(
                &key,
                Duration::from_secs(window_secs + WINDOW_TTL_SLACK_SECS),
            )
            .await?;
        Ok(())
    }
}
