//! 错误处理模块
//!
//! 定义应用程序的错误类型，以及到统一错误响应（problem details）的映射。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ERROR_TYPE_BASE: &str = "https://uri.etsi.org/ngsi-ld/errors/";

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// timerel / time / endTime 组合无效
    #[error("无效的时间关系: {0}")]
    InvalidTimeRelation(String),

    /// 查询语句（q、geo、分页参数）无法解析
    #[error("无效的查询: {0}")]
    InvalidQuery(String),

    /// 属性或类型无法在上下文中展开
    #[error("属性展开失败: {0}")]
    AttributeExpansionFailure(String),

    /// 上下文文档无法获取或解析
    #[error("上下文获取失败: {0}")]
    ContextRetrievalFailure(String),

    /// 存储结果无法转换
    #[error("持久化数据读取失败: {0}")]
    PersistenceRetrievalFailure(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// 错误类型短名，拼接到 problem type URI 中
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidTimeRelation(_) | AppError::InvalidQuery(_) => "BadRequestData",
            AppError::AttributeExpansionFailure(_) => "InvalidRequest",
            AppError::ContextRetrievalFailure(_) => "LdContextNotAvailable",
            AppError::NotFound(_) => "ResourceNotFound",
            AppError::PersistenceRetrievalFailure(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => "InternalError",
        }
    }

    /// HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidTimeRelation(_)
            | AppError::InvalidQuery(_)
            | AppError::AttributeExpansionFailure(_) => StatusCode::BAD_REQUEST,
            AppError::ContextRetrievalFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PersistenceRetrievalFailure(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 是否属于服务端错误（细节只写日志，不暴露给调用方）
    pub fn is_internal(&self) -> bool {
        self.status().is_server_error() && !matches!(self, AppError::ContextRetrievalFailure(_))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(e: sea_orm::DbErr) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::PersistenceRetrievalFailure(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::ContextRetrievalFailure(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// Axum response implementation for AppError
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if self.is_internal() {
            tracing::error!(error = %self, "request failed");
            "An unexpected error occurred while processing the request".to_string()
        } else {
            self.to_string()
        };
        let body = ProblemDetails::new(self.kind(), status.as_u16(), &detail);
        (status, Json(body)).into_response()
    }
}

/// 统一错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// 错误类型 URI
    #[serde(rename = "type")]
    pub problem_type: String,
    /// 错误标题
    pub title: String,
    /// HTTP 状态码
    pub status: u16,
    /// 详细信息
    pub detail: String,
    /// 出错的实例标识
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    /// 创建新错误响应
    pub fn new(kind: &str, status: u16, detail: &str) -> Self {
        Self {
            problem_type: format!("{ERROR_TYPE_BASE}{kind}"),
            title: title_for(kind).to_string(),
            status,
            detail: detail.to_string(),
            instance: None,
        }
    }

    /// 添加实例标识
    pub fn with_instance(mut self, instance: &str) -> Self {
        self.instance = Some(instance.to_string());
        self
    }
}

fn title_for(kind: &str) -> &'static str {
    match kind {
        "BadRequestData" => "The request includes input data which does not meet the requirements of the operation",
        "InvalidRequest" => "The request associated to the operation is syntactically invalid",
        "LdContextNotAvailable" => "A remote JSON-LD @context referenced in a request cannot be retrieved",
        "ResourceNotFound" => "The referred resource has not been found",
        _ => "There has been an error during the operation execution",
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::InvalidTimeRelation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ContextRetrievalFailure("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PersistenceRetrievalFailure("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        assert!(AppError::PersistenceRetrievalFailure("column missing".into()).is_internal());
        assert!(!AppError::ContextRetrievalFailure("timeout".into()).is_internal());
        assert!(!AppError::NotFound("urn:a".into()).is_internal());
    }

    #[test]
    fn test_problem_details_serialization() {
        let problem = ProblemDetails::new("ResourceNotFound", 404, "urn:ngsi-ld:A:1")
            .with_instance("urn:ngsi-ld:A:1");
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(
            json["type"],
            "https://uri.etsi.org/ngsi-ld/errors/ResourceNotFound"
        );
        assert_eq!(json["status"], 404);
        assert_eq!(json["instance"], "urn:ngsi-ld:A:1");
    }
}
