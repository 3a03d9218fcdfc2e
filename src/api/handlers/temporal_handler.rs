use axum::{
    Json,
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::debug;

use crate::{
    api::{
        app_state::AppState,
        dto::temporal_dto::{RESULTS_COUNT_HEADER, TemporalQueryDto, link_context, page_link},
    },
    error::AppError,
};

pub const TEMPORAL_ENTITIES_PATH: &str = "/ngsi-ld/v1/temporal/entities";

fn status_for(limited: bool) -> StatusCode {
    if limited {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    }
}

pub async fn query_temporal_entities(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<TemporalQueryDto>,
) -> Result<Response, AppError> {
    debug!(query = ?raw_query, "Querying temporal entities");
    let started = Instant::now();

    let result = state
        .temporal_service
        .query_entities(params.into_params(link_context(&headers)))
        .await
        .inspect_err(|_| state.metrics.record_error())?;
    state
        .metrics
        .record_temporal_query(started.elapsed().as_millis() as u64, result.limited);

    let mut response_headers = HeaderMap::new();
    let links: Vec<String> = [
        (result.prev_anchor.as_deref(), "prev"),
        (result.next_anchor.as_deref(), "next"),
    ]
    .into_iter()
    .filter_map(|(anchor, rel)| {
        anchor.map(|a| page_link(TEMPORAL_ENTITIES_PATH, raw_query.as_deref(), a, rel))
    })
    .collect();
    if !links.is_empty()
        && let Ok(value) = HeaderValue::from_str(&links.join(", "))
    {
        response_headers.insert(header::LINK, value);
    }
    if let Some(total) = result.total {
        response_headers.insert(
            HeaderName::from_static(RESULTS_COUNT_HEADER),
            HeaderValue::from(total),
        );
    }

    Ok((
        status_for(result.limited),
        response_headers,
        Json(result.entities),
    )
        .into_response())
}

pub async fn retrieve_temporal_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<TemporalQueryDto>,
) -> Result<Response, AppError> {
    debug!("Retrieving temporal entity: {}", id);
    let started = Instant::now();

    let result = state
        .temporal_service
        .retrieve_entity(&id, params.into_params(link_context(&headers)))
        .await
        .inspect_err(|_| state.metrics.record_error())?;
    state
        .metrics
        .record_temporal_query(started.elapsed().as_millis() as u64, result.limited);

    Ok((status_for(result.limited), Json(result.entity)).into_response())
}
