//! Handlers 模块
//!
//! 处理 HTTP 请求。

pub mod temporal_handler;
