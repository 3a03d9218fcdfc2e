//! Tempora - NGSI-LD 时态查询服务
//!
//! 将时态实体查询（时间关系、属性过滤、地理过滤）编译为针对只追加属性日志的
//! 区间计算，并重建在这些区间内成立的实体历史表示。

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod interval;
pub mod models;
pub mod observability;
pub mod query;
pub mod services;
pub mod storage;
