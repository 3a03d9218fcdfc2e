//! 时态查询服务
//!
//! 校验请求参数、解析上下文，构造区间查询，再交给重建器生成实体表示。

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::config::config::QueryConfig;
use crate::context::{ContextCache, ResolvedContext};
use crate::error::{AppError, Result};
use crate::interval::{IntervalPlan, ResultGovernor};
use crate::models::entity_record::state_at;
use crate::models::temporal_entity::RenderOptions;
use crate::query::geo::GeoQuery;
use crate::query::parser::QueryParser;
use crate::query::time::TimeQuery;
use crate::services::reconstruction::{ReconstructionRequest, TemporalEntityReconstructor};
use crate::storage::repository::{EntityFilter, IntervalQuery, PageRequest, TemporalRepository};

/// 请求参数（已从 HTTP 层解出，尚未校验）
#[derive(Debug, Clone, Default)]
pub struct TemporalQueryParams {
    /// 逗号分隔的实体 ID
    pub id: Option<String>,
    pub id_pattern: Option<String>,
    /// 逗号分隔的实体类型短名
    pub entity_type: Option<String>,
    /// 逗号分隔的属性短名
    pub attrs: Option<String>,
    pub q: Option<String>,
    pub georel: Option<String>,
    pub geometry: Option<String>,
    pub coordinates: Option<String>,
    pub geoproperty: Option<String>,
    pub timerel: Option<String>,
    pub timeproperty: Option<String>,
    pub time: Option<String>,
    pub end_time: Option<String>,
    pub last_n: Option<u32>,
    /// 逗号分隔的选项：sysAttrs、temporalValues
    pub options: Option<String>,
    pub page_size: Option<u32>,
    pub page_anchor: Option<String>,
    pub count: bool,
    /// Link 头给出的上下文地址
    pub link_context: Option<String>,
}

/// 列表查询结果
#[derive(Debug, Clone, Default)]
pub struct TemporalQueryResult {
    pub entities: Vec<Value>,
    /// 每个属性的实例被截断
    pub limited: bool,
    pub next_anchor: Option<String>,
    pub prev_anchor: Option<String>,
    pub total: Option<u64>,
    pub page_size: u32,
}

/// 单实体查询结果
#[derive(Debug, Clone)]
pub struct TemporalEntityResult {
    pub entity: Value,
    pub limited: bool,
}

/// 时态查询服务 trait
#[async_trait]
pub trait TemporalQueryService: Send + Sync {
    /// 查询实体列表（分页）
    async fn query_entities(&self, params: TemporalQueryParams) -> Result<TemporalQueryResult>;

    /// 查询单个实体
    async fn retrieve_entity(
        &self,
        entity_id: &str,
        params: TemporalQueryParams,
    ) -> Result<TemporalEntityResult>;
}

/// 时态查询服务实现
pub struct TemporalQueryServiceImpl {
    repository: Arc<dyn TemporalRepository>,
    contexts: Arc<ContextCache>,
    reconstructor: TemporalEntityReconstructor,
    config: QueryConfig,
    core_context_url: String,
}

impl TemporalQueryServiceImpl {
    pub fn new(
        repository: Arc<dyn TemporalRepository>,
        contexts: Arc<ContextCache>,
        config: QueryConfig,
        core_context_url: &str,
    ) -> Self {
        let governor = ResultGovernor::new(config.result_ceiling);
        Self {
            reconstructor: TemporalEntityReconstructor::new(repository.clone(), governor),
            repository,
            contexts,
            config,
            core_context_url: core_context_url.to_string(),
        }
    }

    /// 请求上下文在前，核心上下文最后
    fn context_urls(&self, params: &TemporalQueryParams) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(link) = params.link_context.as_deref().filter(|l| !l.is_empty())
            && link != self.core_context_url
        {
            urls.push(link.to_string());
        }
        urls.push(self.core_context_url.clone());
        urls
    }

    fn time_query(&self, params: &TemporalQueryParams) -> Result<TimeQuery> {
        TimeQuery::new(
            params.timerel.as_deref(),
            params.time.as_deref(),
            params.end_time.as_deref(),
            params.timeproperty.as_deref(),
            self.config.inclusive_bounds,
        )
    }

    fn render_options(params: &TemporalQueryParams, time: &TimeQuery) -> RenderOptions {
        let mut options = RenderOptions {
            time_property: time.property(),
            ..RenderOptions::default()
        };
        for option in split_list(params.options.as_deref()) {
            match option {
                "sysAttrs" => options.sys_attrs = true,
                "temporalValues" => options.temporal_values = true,
                other => tracing::debug!(option = other, "ignoring unsupported option"),
            }
        }
        options
    }

    fn page_size(&self, params: &TemporalQueryParams) -> Result<u32> {
        let size = params.page_size.unwrap_or(self.config.default_page_size);
        if size == 0 || size > self.config.max_page_size {
            return Err(AppError::InvalidQuery(format!(
                "pageSize must be between 1 and {}",
                self.config.max_page_size
            )));
        }
        Ok(size)
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn expand_list(context: &ResolvedContext, raw: Option<&str>) -> Result<Vec<String>> {
    split_list(raw).map(|name| context.expand(name)).collect()
}

fn geo_query(params: &TemporalQueryParams, context: &ResolvedContext) -> Result<Option<GeoQuery>> {
    match (
        params.georel.as_deref(),
        params.geometry.as_deref(),
        params.coordinates.as_deref(),
    ) {
        (None, None, None) => Ok(None),
        (Some(georel), Some(geometry), Some(coordinates)) => GeoQuery::new(
            georel,
            geometry,
            coordinates,
            params.geoproperty.as_deref(),
            context,
        )
        .map(Some),
        _ => Err(AppError::InvalidQuery(
            "georel, geometry and coordinates must be provided together".to_string(),
        )),
    }
}

#[async_trait]
impl TemporalQueryService for TemporalQueryServiceImpl {
    async fn query_entities(&self, params: TemporalQueryParams) -> Result<TemporalQueryResult> {
        let time = self.time_query(&params)?;
        let page_size = self.page_size(&params)?;
        let urls = self.context_urls(&params);
        let context = self.contexts.resolve_all(&urls).await?;

        let term = params
            .q
            .as_deref()
            .map(|q| QueryParser::new(&context).parse(q))
            .transpose()?;
        let geo = geo_query(&params, &context)?;
        if (term.is_some() || geo.is_some()) && time.is_unbounded() {
            return Err(AppError::InvalidTimeRelation(
                "filtered temporal queries require timerel and time".to_string(),
            ));
        }

        let filter = EntityFilter {
            ids: split_list(params.id.as_deref()).map(str::to_string).collect(),
            id_pattern: params.id_pattern.clone(),
            types: expand_list(&context, params.entity_type.as_deref())?,
        };
        filter.compiled_pattern()?;
        let attributes = expand_list(&context, params.attrs.as_deref())?;
        let plan = IntervalPlan::build(term.as_ref(), geo.as_ref());
        tracing::debug!(
            ?filter,
            leaves = plan.as_ref().map(|p| p.attributes().len()).unwrap_or(0),
            property = %time.property(),
            "temporal query compiled"
        );

        let page = self
            .repository
            .find_intervals(&IntervalQuery {
                filter,
                time: time.clone(),
                plan,
                page: Some(PageRequest {
                    anchor: params.page_anchor.clone(),
                    size: page_size,
                    count: params.count,
                }),
            })
            .await?;

        let reconstruction = self
            .reconstructor
            .reconstruct(
                &page.intervals,
                &ReconstructionRequest {
                    time: &time,
                    attributes: &attributes,
                    last_n: params.last_n,
                },
            )
            .await?;

        let options = Self::render_options(&params, &time);
        let entities = reconstruction
            .entities
            .iter()
            .map(|entity| entity.to_json(&options, &context, &urls))
            .collect();
        Ok(TemporalQueryResult {
            entities,
            limited: reconstruction.limited,
            next_anchor: page.next_anchor,
            prev_anchor: page.prev_anchor,
            total: page.total_entities,
            page_size,
        })
    }

    async fn retrieve_entity(
        &self,
        entity_id: &str,
        params: TemporalQueryParams,
    ) -> Result<TemporalEntityResult> {
        let time = self.time_query(&params)?;
        let urls = self.context_urls(&params);
        let context = self.contexts.resolve_all(&urls).await?;
        let attributes = expand_list(&context, params.attrs.as_deref())?;

        let records = self.repository.entity_records(entity_id).await?;
        if state_at(&records, Utc::now()).is_none() {
            return Err(AppError::NotFound(format!("entity {entity_id}")));
        }

        let page = self
            .repository
            .find_intervals(&IntervalQuery {
                filter: EntityFilter {
                    ids: vec![entity_id.to_string()],
                    ..Default::default()
                },
                time: time.clone(),
                plan: None,
                page: None,
            })
            .await?;
        let reconstruction = self
            .reconstructor
            .reconstruct(
                &page.intervals,
                &ReconstructionRequest {
                    time: &time,
                    attributes: &attributes,
                    last_n: params.last_n,
                },
            )
            .await?;

        let entity = reconstruction
            .entities
            .into_iter()
            .find(|e| e.id == entity_id && e.instance_count() > 0)
            .ok_or_else(|| {
                AppError::NotFound(format!("entity {entity_id} has no matching instances"))
            })?;
        let options = Self::render_options(&params, &time);
        Ok(TemporalEntityResult {
            entity: entity.to_json(&options, &context, &urls),
            limited: reconstruction.limited,
        })
    }
}

/// 创建时态查询服务
pub fn create_temporal_query_service(
    repository: Arc<dyn TemporalRepository>,
    contexts: Arc<ContextCache>,
    config: QueryConfig,
    core_context_url: &str,
) -> Arc<dyn TemporalQueryService> {
    Arc::new(TemporalQueryServiceImpl::new(
        repository,
        contexts,
        config,
        core_context_url,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContextLoader;
    use crate::storage::repository::MockTemporalRepository;
    use serde_json::json;

    const CORE: &str = "https://example.org/core.jsonld";

    fn contexts() -> Arc<ContextCache> {
        let loader = StaticContextLoader::new().with_document(
            CORE,
            json!({"@context": {"@vocab": "https://example.org/vocab/"}}),
        );
        Arc::new(ContextCache::new(Arc::new(loader), 16, None))
    }

    fn config() -> QueryConfig {
        QueryConfig {
            result_ceiling: 1000,
            default_page_size: 30,
            max_page_size: 100,
            inclusive_bounds: true,
        }
    }

    fn service(repository: MockTemporalRepository) -> TemporalQueryServiceImpl {
        TemporalQueryServiceImpl::new(Arc::new(repository), contexts(), config(), CORE)
    }

    #[tokio::test]
    async fn test_invalid_time_relation_rejected_before_store_access() {
        let service = service(MockTemporalRepository::new());
        let result = service
            .query_entities(TemporalQueryParams {
                timerel: Some("between".into()),
                time: Some("2024-01-01T00:00:00Z".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidTimeRelation(_))));
    }

    #[tokio::test]
    async fn test_filter_requires_time_bounds() {
        let service = service(MockTemporalRepository::new());
        let result = service
            .query_entities(TemporalQueryParams {
                q: Some("temperature>20".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidTimeRelation(_))));
    }

    #[tokio::test]
    async fn test_incomplete_geo_and_bad_page_size() {
        let service = service(MockTemporalRepository::new());
        let geo = service
            .query_entities(TemporalQueryParams {
                georel: Some("near;maxDistance==10".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(geo, Err(AppError::InvalidQuery(_))));

        let page = service
            .query_entities(TemporalQueryParams {
                page_size: Some(500),
                ..Default::default()
            })
            .await;
        assert!(matches!(page, Err(AppError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_query_passes_expanded_filter_to_store() {
        let mut repository = MockTemporalRepository::new();
        repository
            .expect_find_intervals()
            .withf(|query| {
                query.filter.types == vec!["https://example.org/vocab/Sensor".to_string()]
                    && query.plan.is_some()
                    && query.page.as_ref().is_some_and(|p| p.size == 30)
            })
            .returning(|_| Ok(Default::default()));
        let service = service(repository);
        let result = service
            .query_entities(TemporalQueryParams {
                entity_type: Some("Sensor".into()),
                q: Some("temperature>20".into()),
                timerel: Some("after".into()),
                time: Some("2024-01-01T00:00:00Z".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.entities.is_empty());
        assert!(!result.limited);
    }

    #[tokio::test]
    async fn test_deleted_entity_is_not_found() {
        let mut repository = MockTemporalRepository::new();
        repository.expect_entity_records().returning(|_| Ok(vec![]));
        let service = service(repository);
        let result = service
            .retrieve_entity("urn:ngsi-ld:Sensor:1", TemporalQueryParams::default())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
