//! # 统一账户调度器模块
//!
//! 在绑定、分组、会话粘滞与共享池之间按固定优先序为每个请求
//! 选出一个上游账户。

pub mod session;
pub mod types;
pub mod unified;

pub use session::{SessionMap, SessionMapping};
pub use types::{ScheduleRequest, Selection};
pub use unified::UnifiedScheduler;
