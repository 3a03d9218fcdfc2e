//! 上下文文档加载器

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AppError, Result};

/// 按 URL 获取上下文文档
#[async_trait]
pub trait ContextLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<Value>;
}

/// 通过 HTTP 获取上下文文档
#[derive(Clone)]
pub struct HttpContextLoader {
    client: reqwest::Client,
}

impl HttpContextLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContextLoader for HttpContextLoader {
    async fn load(&self, url: &str) -> Result<Value> {
        tracing::debug!("Fetching context document: {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/ld+json, application/json")
            .send()
            .await
            .map_err(|e| AppError::ContextRetrievalFailure(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::ContextRetrievalFailure(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::ContextRetrievalFailure(format!("{url}: invalid JSON: {e}")))
    }
}

/// 预置文档的加载器，未知 URL 视为获取失败
#[derive(Debug, Clone, Default)]
pub struct StaticContextLoader {
    documents: HashMap<String, Value>,
}

impl StaticContextLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, url: &str, document: Value) -> Self {
        self.documents.insert(url.to_string(), document);
        self
    }
}

#[async_trait]
impl ContextLoader for StaticContextLoader {
    async fn load(&self, url: &str) -> Result<Value> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::ContextRetrievalFailure(format!("{url} is not available")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_loader_fetches_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ctx.jsonld"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"@context": {"a": "ex:a"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let loader = HttpContextLoader::new(Duration::from_secs(2)).unwrap();
        let document = loader
            .load(&format!("{}/ctx.jsonld", server.uri()))
            .await
            .unwrap();
        assert_eq!(document["@context"]["a"], "ex:a");
    }

    #[tokio::test]
    async fn test_http_loader_maps_status_to_retrieval_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let loader = HttpContextLoader::new(Duration::from_secs(2)).unwrap();
        let err = loader
            .load(&format!("{}/missing.jsonld", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ContextRetrievalFailure(_)));
    }

    #[tokio::test]
    async fn test_static_loader_unknown_url() {
        let loader = StaticContextLoader::new();
        assert!(loader.load("https://example.org/none").await.is_err());
    }
}
