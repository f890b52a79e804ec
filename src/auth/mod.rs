//! # 密钥准入模块
//!
//! API 密钥的记录模型、生成与校验、滑动窗口限流，以及请求准入管线。

pub mod admission;
pub mod api_key;
pub mod rate_limit;
pub mod types;

pub use admission::{Admission, AdmissionRequest, AdmissionService, AdmissionTicket};
pub use api_key::KeyService;
pub use rate_limit::SlidingWindowLimiter;
pub use types::{
    AccountBinding, ApiKeyRecord, ClientRestriction, ModelRestriction, Permissions,
    PlatformBindings,
};
