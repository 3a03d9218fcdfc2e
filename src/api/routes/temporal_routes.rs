//! Temporal Routes
//!
//! 定义时态实体查询路由。

use axum::{Router, routing::get};

use crate::api::app_state::AppState;
use crate::api::handlers::temporal_handler::*;

/// 创建时态查询路由器
pub fn create_temporal_router() -> Router<AppState> {
    Router::new()
        .route("/temporal/entities", get(query_temporal_entities))
        .route("/temporal/entities/:id", get(retrieve_temporal_entity))
}
