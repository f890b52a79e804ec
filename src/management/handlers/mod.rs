//! # HTTP 处理器

pub mod relay;
pub mod stats;
pub mod system;
