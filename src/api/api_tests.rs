#[cfg(test)]
mod temporal_handler_tests {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::api::{app_state::AppState, create_router};
    use crate::config::config::QueryConfig;
    use crate::context::{ContextCache, StaticContextLoader};
    use crate::models::attribute::{AttributeInstance, AttributeValue, OperationMode};
    use crate::models::entity_record::EntityRecord;
    use crate::observability::AppMetrics;
    use crate::services::create_temporal_query_service;
    use crate::storage::MemoryRepository;

    const CORE: &str = "https://example.org/core.jsonld";

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn app(ceiling: u32) -> Router {
        let repository = MemoryRepository::new();
        for entity in ["urn:ngsi-ld:Sensor:1", "urn:ngsi-ld:Sensor:2", "urn:ngsi-ld:Sensor:3"] {
            repository.insert_record(EntityRecord {
                entity_id: entity.into(),
                entity_type: "https://example.org/vocab/Sensor".into(),
                operation_mode: OperationMode::Create,
                ts: at(0),
            });
            for minute in 0..5 {
                repository.insert_instance(AttributeInstance {
                    instance_id: format!("{entity}-{minute}"),
                    entity_id: entity.into(),
                    attribute_id: "https://example.org/vocab/temperature".into(),
                    operation_mode: if minute == 0 {
                        OperationMode::Create
                    } else {
                        OperationMode::Update
                    },
                    value: Some(AttributeValue::Number(18.0 + minute as f64)),
                    observed_at: Some(at(minute)),
                    ts: at(minute),
                    dataset_id: None,
                    unit_code: Some("CEL".into()),
                    has_sub_attributes: false,
                });
            }
        }

        let loader = StaticContextLoader::new().with_document(
            CORE,
            json!({"@context": {"@vocab": "https://example.org/vocab/"}}),
        );
        let contexts = Arc::new(ContextCache::new(Arc::new(loader), 8, None));
        let service = create_temporal_query_service(
            Arc::new(repository),
            contexts,
            QueryConfig {
                result_ceiling: ceiling,
                default_page_size: 30,
                max_page_size: 100,
                inclusive_bounds: true,
            },
            CORE,
        );
        create_router(AppState::new(service, Arc::new(AppMetrics::default())))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_query_returns_entities_with_pagination_headers() {
        let (status, headers, body) = get(
            app(1000),
            "/ngsi-ld/v1/temporal/entities?type=Sensor&timerel=between&time=2024-01-01T00:00:00Z&endTime=2024-01-01T00:10:00Z&pageSize=2&count=true",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["id"], "urn:ngsi-ld:Sensor:1");
        assert_eq!(body[0]["type"], "Sensor");
        assert_eq!(body[0]["temperature"].as_array().unwrap().len(), 5);
        assert_eq!(headers["ngsild-results-count"], "3");
        let link = headers["link"].to_str().unwrap();
        assert!(link.contains("pageAnchor=urn%3Angsi-ld%3ASensor%3A3"));
        assert!(link.contains("rel=\"next\""));
    }

    #[tokio::test]
    async fn test_governor_limit_returns_partial_content() {
        let (status, _, body) = get(
            app(6),
            "/ngsi-ld/v1/temporal/entities?type=Sensor&timerel=after&time=2024-01-01T00:00:00Z&lastN=5",
        )
        .await;

        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body[0]["temperature"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_time_relation_is_bad_request() {
        let (status, _, body) = get(
            app(1000),
            "/ngsi-ld/v1/temporal/entities?timerel=before&time=2024-01-01T00:00:00Z&endTime=2024-01-02T00:00:00Z",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "https://uri.etsi.org/ngsi-ld/errors/BadRequestData");
    }

    #[tokio::test]
    async fn test_retrieve_entity_with_temporal_values() {
        let (status, _, body) = get(
            app(1000),
            "/ngsi-ld/v1/temporal/entities/urn:ngsi-ld:Sensor:2?options=temporalValues",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "urn:ngsi-ld:Sensor:2");
        let values = body["temperature"]["values"].as_array().unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0][0], json!(18.0));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let (status, _, body) = get(app(1000), "/ngsi-ld/v1/temporal/entities/urn:ngsi-ld:Sensor:9").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "https://uri.etsi.org/ngsi-ld/errors/ResourceNotFound");
    }
}
