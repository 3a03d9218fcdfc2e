//! 可观测性模块
//!
//! 提供请求计数、结构化日志和健康检查。

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::config::LoggingConfig;
use crate::error::{AppError, Result};

// ===== Simple Metrics =====

/// 简单应用指标
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub temporal_queries_total: AtomicU64,
    pub temporal_query_duration_ms_sum: AtomicU64,
    pub limited_responses_total: AtomicU64,
    pub errors_total: AtomicU64,
}

impl AppMetrics {
    /// 记录一次时态查询
    pub fn record_temporal_query(&self, duration_ms: u64, limited: bool) {
        self.temporal_queries_total.fetch_add(1, Ordering::Relaxed);
        self.temporal_query_duration_ms_sum
            .fetch_add(duration_ms, Ordering::Relaxed);
        if limited {
            self.limited_responses_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 记录错误
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成 Prometheus 文本格式指标
    pub fn gather(&self) -> String {
        let queries = self.temporal_queries_total.load(Ordering::Relaxed);
        format!(
            r#"# HELP temporal_queries_total Total temporal queries served
# TYPE temporal_queries_total counter
temporal_queries_total {}
# HELP temporal_query_duration_seconds Temporal query duration in seconds
# TYPE temporal_query_duration_seconds summary
temporal_query_duration_seconds_sum {}
temporal_query_duration_seconds_count {}
# HELP temporal_limited_responses_total Responses truncated by the instance governor
# TYPE temporal_limited_responses_total counter
temporal_limited_responses_total {}
# HELP errors_total Total errors
# TYPE errors_total counter
errors_total {}
"#,
            queries,
            self.temporal_query_duration_ms_sum.load(Ordering::Relaxed) as f64 / 1000.0,
            queries,
            self.limited_responses_total.load(Ordering::Relaxed),
            self.errors_total.load(Ordering::Relaxed),
        )
    }
}

// ===== Health Check =====

/// 健康检查状态
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: f64,
}

/// 可观测性路由状态
#[derive(Debug, Clone)]
pub struct ObservabilityState {
    pub metrics: Arc<AppMetrics>,
    pub start_time: DateTime<Utc>,
    pub version: String,
}

impl ObservabilityState {
    pub fn new(metrics: Arc<AppMetrics>, version: &str) -> Self {
        Self {
            metrics,
            start_time: Utc::now(),
            version: version.to_string(),
        }
    }

    /// 获取应用正常运行时间
    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.start_time).num_seconds() as f64
    }
}

/// 健康状态
pub async fn health_check(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Prometheus 指标端点
pub async fn metrics(State(state): State<Arc<ObservabilityState>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, state.metrics.gather())
}

/// 创建可观测性路由
pub fn create_observability_router(state: Arc<ObservabilityState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
}

// ===== Structured Logging =====

/// 初始化日志；`RUST_LOG` 优先于配置中的级别
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Config(format!("invalid log level '{}': {e}", config.level)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.structured {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()
    };
    result.map_err(|e| AppError::Internal(format!("failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::Request};
    use tower::ServiceExt;

    #[test]
    fn test_metrics_gather() {
        let metrics = AppMetrics::default();
        metrics.record_temporal_query(100, false);
        metrics.record_temporal_query(300, true);
        metrics.record_error();

        let output = metrics.gather();
        assert!(output.contains("temporal_queries_total 2"));
        assert!(output.contains("temporal_query_duration_seconds_sum 0.4"));
        assert!(output.contains("temporal_limited_responses_total 1"));
        assert!(output.contains("errors_total 1"));
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = Arc::new(AppMetrics::default());
        metrics.record_temporal_query(5, false);
        let router = create_observability_router(Arc::new(ObservabilityState::new(metrics, "0.1.0")));

        let response = router
            .oneshot(Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("temporal_queries_total 1"));
    }
}
