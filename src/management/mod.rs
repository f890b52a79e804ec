//! # HTTP 服务模块
//!
//! 对外暴露统计查询、中继入口与运维端点；响应统一 JSON 信封。

pub mod handlers;
pub mod response;
pub mod routes;
pub mod server;
pub mod upstream;

pub use server::AppState;
pub use upstream::{DispatchContext, NoopConnector, UpstreamConnector, UpstreamResponse};
