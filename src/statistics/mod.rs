//! # 用量统计模块
//!
//! 计数器字段集、多维原子自增与请求后计费管线（C2 + C8）。

pub mod types;
pub mod usage;

pub use types::{ModelUsageRow, Period, TokenUsage, UsageSnapshot};
pub use usage::{UsageRecord, UsageService};
